//! In-memory gateway used by the pipeline and route tests.

use chrono::{DateTime, Duration, Utc};
use shared::{AnalysisType, ProcessingStatus, RequestStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::gateway::{
    DashboardSource, PersistenceError, PersistenceGateway, RequestId, ResultId, UserStore,
};
use super::models::{AnalysisRequestRecord, NewUser, User};
use crate::admin::stats::DashboardCounts;
use crate::pipeline::types::AnalysisResult;

#[derive(Debug, Clone)]
pub struct StoredResult {
    pub request_id: RequestId,
    pub status: ProcessingStatus,
    pub total_detections: usize,
    pub detection_data: serde_json::Value,
}

#[derive(Clone, Default)]
pub struct MemoryGateway {
    requests: Arc<Mutex<Vec<AnalysisRequestRecord>>>,
    results: Arc<Mutex<Vec<StoredResult>>>,
    status_log: Arc<Mutex<Vec<(RequestId, RequestStatus)>>>,
    users: Arc<Mutex<Vec<User>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails from now on.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<AnalysisRequestRecord> {
        self.requests.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<StoredResult> {
        self.results.lock().unwrap().clone()
    }

    /// Stores an account as-is, bypassing registration.
    pub fn insert_user(&self, user: User) {
        self.users.lock().unwrap().push(user);
    }

    pub fn users(&self) -> Vec<User> {
        self.users.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<RequestStatus> {
        self.status_log.lock().unwrap().iter().map(|(_, s)| *s).collect()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PersistenceError::InvalidData("gateway offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl PersistenceGateway for MemoryGateway {
    async fn create_request(
        &self,
        user_id: Option<Uuid>,
        image_ref: &str,
        analysis_type: AnalysisType,
    ) -> Result<RequestId, PersistenceError> {
        self.check()?;
        let record = AnalysisRequestRecord::new(user_id, image_ref, analysis_type);
        let id = record.id;
        self.requests.lock().unwrap().push(record);
        self.status_log.lock().unwrap().push((id, RequestStatus::Pending));
        Ok(id)
    }

    async fn update_status(
        &self,
        request_id: RequestId,
        status: RequestStatus,
        processing_time_ms: Option<i64>,
    ) -> Result<(), PersistenceError> {
        self.check()?;
        let mut requests = self.requests.lock().unwrap();
        let record = requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or(PersistenceError::NotFound)?;
        record.status = status;
        if processing_time_ms.is_some() {
            record.processing_time_ms = processing_time_ms;
        }
        self.status_log.lock().unwrap().push((request_id, status));
        Ok(())
    }

    async fn save_result(
        &self,
        request_id: RequestId,
        result: &AnalysisResult,
    ) -> Result<ResultId, PersistenceError> {
        self.check()?;
        let stored = StoredResult {
            request_id,
            status: result.status,
            total_detections: result.total_detections(),
            detection_data: serde_json::to_value(result.detections())?,
        };
        self.results.lock().unwrap().push(stored);
        Ok(Uuid::new_v4())
    }

    async fn get_history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AnalysisRequestRecord>, PersistenceError> {
        self.check()?;
        let mut history: Vec<AnalysisRequestRecord> = self
            .requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.user_id == Some(user_id))
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.truncate(limit.max(0) as usize);
        Ok(history)
    }
}

impl UserStore for MemoryGateway {
    async fn create_user(&self, user: &NewUser) -> Result<User, PersistenceError> {
        self.check()?;
        let created = User {
            id: Uuid::new_v4(),
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        };
        self.users.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, PersistenceError> {
        self.check()?;
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == user_id).cloned())
    }

    async fn get_user_by_login(&self, login: &str) -> Result<Option<User>, PersistenceError> {
        self.check()?;
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .find(|u| u.username == login)
            .or_else(|| users.iter().find(|u| u.email == login))
            .cloned())
    }

    async fn username_exists(&self, username: &str) -> Result<bool, PersistenceError> {
        self.check()?;
        Ok(self.users.lock().unwrap().iter().any(|u| u.username == username))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, PersistenceError> {
        self.check()?;
        Ok(self.users.lock().unwrap().iter().any(|u| u.email == email))
    }

    async fn update_last_login(&self, user_id: Uuid) -> Result<(), PersistenceError> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(PersistenceError::NotFound)?;
        user.last_login = Some(Utc::now());
        Ok(())
    }
}

impl DashboardSource for MemoryGateway {
    async fn dashboard_counts(&self, now: DateTime<Utc>) -> Result<DashboardCounts, PersistenceError> {
        self.check()?;
        let since = now - Duration::days(30);
        let users = self.users.lock().unwrap();
        let requests = self.requests.lock().unwrap();

        let mut counts = DashboardCounts {
            total_users: users.len() as i64,
            active_users: users.iter().filter(|u| u.is_active).count() as i64,
            new_users_30d: users.iter().filter(|u| u.created_at >= since).count() as i64,
            total_analyses: requests.len() as i64,
            analyses_30d: requests.iter().filter(|r| r.created_at >= since).count() as i64,
            today_analyses: requests
                .iter()
                .filter(|r| r.created_at.date_naive() == now.date_naive())
                .count() as i64,
            completed_analyses: requests
                .iter()
                .filter(|r| r.status == RequestStatus::Completed)
                .count() as i64,
            detection_data: self
                .results
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.status.is_success())
                .map(|r| r.detection_data.clone())
                .collect(),
            ..DashboardCounts::default()
        };
        for user in users.iter() {
            *counts.users_by_role.entry(user.role.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
