//! Aggregates for the admin dashboard.
//!
//! Counting happens in SQL; everything derived from the stored detection JSON
//! is computed here so it can be tested without a database.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::ProcessingStatus;
use std::collections::BTreeMap;
use strum::IntoEnumIterator;

use crate::inference::labels::{CropKind, Disease};

/// Raw figures read from the database.
#[derive(Debug, Clone, Default)]
pub struct DashboardCounts {
    pub total_users: i64,
    pub active_users: i64,
    pub new_users_30d: i64,
    pub users_by_role: BTreeMap<String, i64>,
    pub total_analyses: i64,
    pub analyses_30d: i64,
    pub today_analyses: i64,
    pub completed_analyses: i64,
    /// `detection_data` of every successful result.
    pub detection_data: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserStats {
    pub total_users: i64,
    pub active_users: i64,
    pub new_users_30d: i64,
    pub user_types: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisStats {
    pub total_analyses: i64,
    pub analyses_30d: i64,
    pub today_analyses: i64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetectionSummary {
    pub total_detections: i64,
    pub normal_rate: f64,
    pub disease_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardStats {
    pub user_stats: UserStats,
    pub analysis_stats: AnalysisStats,
    pub crop_stats: BTreeMap<String, i64>,
    pub disease_stats: BTreeMap<String, i64>,
    pub detection_summary: DetectionSummary,
    pub last_updated: String,
}

/// Result statuses whose detections count towards the dashboard.
pub fn counted_statuses() -> Vec<String> {
    ProcessingStatus::iter()
        .filter(ProcessingStatus::is_success)
        .map(|status| status.to_string())
        .collect()
}

/// Percentage rounded to one decimal; zero when `whole` is zero.
pub fn percent(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}

pub fn summarize(counts: DashboardCounts, now: DateTime<Utc>) -> DashboardStats {
    let mut crop_stats: BTreeMap<String, i64> =
        CropKind::iter().map(|crop| (crop.to_string(), 0)).collect();
    let mut disease_stats: BTreeMap<String, i64> = CropKind::iter()
        .flat_map(|crop| crop.diseases().iter())
        .map(|disease| (disease.display_label().to_string(), 0))
        .collect();

    let mut total = 0;
    let mut normal = 0;
    for detection in counts
        .detection_data
        .iter()
        .filter_map(|data| data.as_array())
        .flatten()
    {
        total += 1;
        if let Some(crop) = detection.get("crop_type").and_then(|v| v.as_str()) {
            *crop_stats.entry(crop.to_string()).or_default() += 1;
        }
        let status = detection
            .get("disease_status")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if Disease::from_display_label(status)
            .is_some_and(|disease| disease.is_healthy())
        {
            normal += 1;
        }
        if !status.is_empty() {
            *disease_stats.entry(status.to_string()).or_default() += 1;
        }
    }

    DashboardStats {
        user_stats: UserStats {
            total_users: counts.total_users,
            active_users: counts.active_users,
            new_users_30d: counts.new_users_30d,
            user_types: counts.users_by_role,
        },
        analysis_stats: AnalysisStats {
            total_analyses: counts.total_analyses,
            analyses_30d: counts.analyses_30d,
            today_analyses: counts.today_analyses,
            success_rate: percent(counts.completed_analyses, counts.total_analyses),
        },
        crop_stats,
        disease_stats,
        detection_summary: DetectionSummary {
            total_detections: total,
            normal_rate: percent(normal, total),
            disease_rate: percent(total - normal, total),
        },
        last_updated: now.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}
