use chrono::{DateTime, Utc};
use shared::{AnalysisType, RequestStatus};
use std::future::Future;
use uuid::Uuid;

use super::models::{AnalysisRequestRecord, NewUser, User};
use crate::admin::stats::DashboardCounts;
use crate::pipeline::types::AnalysisResult;

pub type RequestId = Uuid;
pub type ResultId = Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

/// Narrow contract the analysis pipeline uses to record request lifecycles.
pub trait PersistenceGateway: Send + Sync {
    fn create_request(
        &self,
        user_id: Option<Uuid>,
        image_ref: &str,
        analysis_type: AnalysisType,
    ) -> impl Future<Output = Result<RequestId, PersistenceError>> + Send;

    fn update_status(
        &self,
        request_id: RequestId,
        status: RequestStatus,
        processing_time_ms: Option<i64>,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn save_result(
        &self,
        request_id: RequestId,
        result: &AnalysisResult,
    ) -> impl Future<Output = Result<ResultId, PersistenceError>> + Send;

    /// Newest first.
    fn get_history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<AnalysisRequestRecord>, PersistenceError>> + Send;
}

/// Account lookups used by the auth routes.
pub trait UserStore: Send + Sync {
    fn create_user(&self, user: &NewUser) -> impl Future<Output = Result<User, PersistenceError>> + Send;

    fn get_user_by_id(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Option<User>, PersistenceError>> + Send;

    /// Matches the username first, then the email.
    fn get_user_by_login(
        &self,
        login: &str,
    ) -> impl Future<Output = Result<Option<User>, PersistenceError>> + Send;

    fn username_exists(&self, username: &str) -> impl Future<Output = Result<bool, PersistenceError>> + Send;

    fn email_exists(&self, email: &str) -> impl Future<Output = Result<bool, PersistenceError>> + Send;

    fn update_last_login(&self, user_id: Uuid) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}

/// Raw figures behind the admin dashboard.
pub trait DashboardSource: Send + Sync {
    fn dashboard_counts(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<DashboardCounts, PersistenceError>> + Send;
}
