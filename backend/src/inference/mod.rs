pub mod labels;
pub mod postprocess;
pub mod preprocess;
pub mod registry;
#[cfg(feature = "torch")]
pub mod torch;

use image::DynamicImage;
use serde::Serialize;
use std::time::Duration;

use labels::{CropKind, Disease};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported crop: {0}")]
    UnsupportedCrop(String),
    #[error("preprocessing error: {0}")]
    Preprocessing(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("no inference slot freed up within {0:?}")]
    Busy(Duration),
}

/// Axis-aligned box in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Zero for inverted or degenerate boxes.
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn clip(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f32, height as f32);
        BoundingBox {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let overlap = BoundingBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        }
        .area();
        let union = self.area() + other.area() - overlap;
        if union <= 0.0 { 0.0 } else { overlap / union }
    }

    pub fn to_pixels(&self) -> [i32; 4] {
        [
            self.x1 as i32,
            self.y1 as i32,
            self.x2 as i32,
            self.y2 as i32,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub crop: CropKind,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub crop: CropKind,
    pub disease: Disease,
    pub confidence: f32,
}

/// Finds candidate crop regions in an image.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, ModelError>;
}

/// Classifies the disease state of one crop from a whole image.
pub trait DiseaseClassifier: Send + Sync {
    fn crop(&self) -> CropKind;
    fn classify(&self, image: &DynamicImage) -> Result<ClassificationResult, ModelError>;
}
