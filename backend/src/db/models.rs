use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{AnalysisType, HistoryEntry, RequestStatus, UserProfile, UserRole};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.id.to_string(),
            username: self.username.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
            is_active: self.is_active,
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub role: UserRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequestRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub image_ref: String,
    pub analysis_type: AnalysisType,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub processing_time_ms: Option<i64>,
}

impl AnalysisRequestRecord {
    pub fn new(user_id: Option<Uuid>, image_ref: &str, analysis_type: AnalysisType) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            image_ref: image_ref.to_string(),
            analysis_type,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            processing_time_ms: None,
        }
    }

    pub fn to_history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id.to_string(),
            image_ref: self.image_ref.clone(),
            analysis_type: self.analysis_type,
            status: self.status,
            created_at: self.created_at.to_rfc3339(),
            processing_time_ms: self.processing_time_ms,
        }
    }
}
