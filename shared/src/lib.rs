use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

#[derive(Serialize, Deserialize, Clone)]
pub struct AnalyzeRequest {
    pub image_base64: String,
}

/// One detected region paired with the disease classification of the image.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DetectionDto {
    pub bbox: [i32; 4],
    pub crop_type: String,
    pub disease_status: String,
    pub disease_confidence: f32,
    pub yolo_confidence: f32,
    pub label: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeResponse {
    pub image_base64: String,
    pub detections: Vec<DetectionDto>,
    pub total_detections: usize,
    /// Present only when the run was degraded, e.g. `DETECTOR_UNAVAILABLE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<ProcessingStatus>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SingleAnalyzeResponse {
    pub crop_type: String,
    pub disease_status: String,
    pub confidence: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HistoryEntry {
    pub id: String,
    pub image_ref: String,
    pub analysis_type: AnalysisType,
    pub status: RequestStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: String,
}

/// `username` accepts either the username or the email address.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
pub enum RequestStatus {
    #[serde(rename = "PENDING")]
    #[strum(serialize = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    #[strum(serialize = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    #[strum(serialize = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    #[strum(serialize = "FAILED")]
    Failed,
}

impl Default for RequestStatus {
    fn default() -> Self {
        RequestStatus::Pending
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
pub enum AnalysisType {
    #[serde(rename = "PIPELINE")]
    #[strum(serialize = "PIPELINE")]
    Pipeline,
    #[serde(rename = "SINGLE")]
    #[strum(serialize = "SINGLE")]
    Single,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
pub enum UserRole {
    #[serde(rename = "USER")]
    #[strum(serialize = "USER")]
    User,
    #[serde(rename = "FARMER")]
    #[strum(serialize = "FARMER")]
    Farmer,
    #[serde(rename = "ADMIN")]
    #[strum(serialize = "ADMIN")]
    Admin,
}

/// Terminal status of one pipeline run.
///
/// `DetectorUnavailable` is a degraded success: the request completes with
/// zero detections instead of failing.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, EnumIter)]
pub enum ProcessingStatus {
    #[serde(rename = "SUCCEEDED")]
    #[strum(serialize = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "VALIDATION_FAILED")]
    #[strum(serialize = "VALIDATION_FAILED")]
    ValidationFailed,
    #[serde(rename = "DETECTOR_UNAVAILABLE")]
    #[strum(serialize = "DETECTOR_UNAVAILABLE")]
    DetectorUnavailable,
    #[serde(rename = "FAILED")]
    #[strum(serialize = "FAILED")]
    Failed,
}

impl ProcessingStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Succeeded | ProcessingStatus::DetectorUnavailable
        )
    }
}
