use shared::{AnalyzeResponse, DetectionDto, ProcessingStatus, SingleAnalyzeResponse};
use strum::Display;

use super::filter::FilteredDetection;
use crate::imaging::codec::CodecError;
use crate::inference::labels::{CropKind, Disease};
use crate::inference::{ClassificationResult, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineStage {
    Received,
    Validating,
    Detecting,
    Classifying,
    Assembling,
    Succeeded,
    Failed,
}

/// A filtered region paired with the classification broadcast to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedRegion {
    pub region: FilteredDetection,
    pub classification: ClassificationResult,
}

impl AnalyzedRegion {
    pub fn label(&self) -> String {
        format!(
            "{}: {}",
            self.region.crop,
            self.classification.disease.display_label()
        )
    }

    pub fn to_dto(&self) -> DetectionDto {
        DetectionDto {
            bbox: self.region.bbox.to_pixels(),
            crop_type: self.region.crop.to_string(),
            disease_status: self.classification.disease.display_label().to_string(),
            disease_confidence: self.classification.confidence,
            yolo_confidence: self.region.confidence,
            label: self.label(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub regions: Vec<AnalyzedRegion>,
    pub status: ProcessingStatus,
    pub detail: Option<String>,
    pub image_base64: String,
}

impl AnalysisResult {
    pub fn total_detections(&self) -> usize {
        self.regions.len()
    }

    pub fn detections(&self) -> Vec<DetectionDto> {
        self.regions.iter().map(AnalyzedRegion::to_dto).collect()
    }

    pub fn to_response(&self) -> AnalyzeResponse {
        AnalyzeResponse {
            image_base64: self.image_base64.clone(),
            detections: self.detections(),
            total_detections: self.total_detections(),
            processing_status: (self.status != ProcessingStatus::Succeeded).then_some(self.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleAnalysis {
    pub crop: CropKind,
    pub disease: Disease,
    pub confidence: f32,
}

impl SingleAnalysis {
    pub fn to_response(&self) -> SingleAnalyzeResponse {
        SingleAnalyzeResponse {
            crop_type: self.crop.to_string(),
            disease_status: self.disease.display_label().to_string(),
            confidence: self.confidence,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("image validation failed: {width}x{height} {color}")]
    Validation {
        width: u32,
        height: u32,
        color: String,
    },
    #[error("disease classification failed: {0}")]
    Classification(#[from] ModelError),
    #[error("result encoding failed: {0}")]
    Encode(#[from] CodecError),
}

impl PipelineError {
    pub fn status(&self) -> ProcessingStatus {
        match self {
            PipelineError::Validation { .. } => ProcessingStatus::ValidationFailed,
            _ => ProcessingStatus::Failed,
        }
    }

    /// Short reason safe to show to API clients.
    pub fn reason(&self) -> String {
        match self {
            PipelineError::Validation { .. } => format!(
                "image must be RGB, RGBA or grayscale and between 32 and 4096 pixels per side ({self})"
            ),
            PipelineError::Classification(ModelError::UnsupportedCrop(crop)) => {
                format!("crop '{crop}' is not supported")
            }
            PipelineError::Classification(ModelError::Timeout(_)) => {
                "disease classification timed out".to_string()
            }
            PipelineError::Classification(ModelError::Busy(_)) => {
                "analysis capacity exhausted, retry later".to_string()
            }
            PipelineError::Classification(_) => "disease classification failed".to_string(),
            PipelineError::Encode(_) => "result image could not be encoded".to_string(),
        }
    }
}
