//! Turns raw detector output into a small, ranked candidate set.
//!
//! Three stages run in order, each over the survivors of the previous one:
//! confidence gate, area-ratio gate on the clipped box, then a stable
//! confidence-descending sort truncated to `top_k`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::inference::labels::CropKind;
use crate::inference::{BoundingBox, RawDetection};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    pub min_confidence: f32,
    pub min_area_ratio: f32,
    pub max_area_ratio: f32,
    pub top_k: usize,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_area_ratio: 0.005,
            max_area_ratio: 0.8,
            top_k: 5,
        }
    }
}

impl FilterPolicy {
    pub fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(format!("min_confidence {} outside [0, 1]", self.min_confidence));
        }
        if !(0.0..=1.0).contains(&self.min_area_ratio)
            || !(0.0..=1.0).contains(&self.max_area_ratio)
            || self.min_area_ratio > self.max_area_ratio
        {
            return Err(format!(
                "area ratio bounds [{}, {}] are not an interval within [0, 1]",
                self.min_area_ratio, self.max_area_ratio
            ));
        }
        if self.top_k == 0 {
            return Err("top_k must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredDetection {
    /// Clipped to the image bounds.
    pub bbox: BoundingBox,
    pub crop: CropKind,
    pub confidence: f32,
    pub area_ratio: f32,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionFilter {
    policy: FilterPolicy,
}

impl DetectionFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        Self { policy }
    }

    pub fn apply(&self, detections: &[RawDetection], width: u32, height: u32) -> Vec<FilteredDetection> {
        if detections.is_empty() {
            return Vec::new();
        }

        let confident: Vec<&RawDetection> = detections
            .iter()
            .filter(|d| d.confidence >= self.policy.min_confidence)
            .collect();
        log::debug!(
            "confidence gate: {}/{} detections >= {}",
            confident.len(),
            detections.len(),
            self.policy.min_confidence
        );

        let image_area = width as f32 * height as f32;
        let mut sized: Vec<FilteredDetection> = confident
            .into_iter()
            .filter_map(|d| {
                let bbox = d.bbox.clip(width, height);
                let area = bbox.area();
                if area <= 0.0 || image_area <= 0.0 {
                    log::debug!("area gate: rejected zero-area box {:?}", d.bbox);
                    return None;
                }
                let area_ratio = area / image_area;
                if area_ratio < self.policy.min_area_ratio || area_ratio > self.policy.max_area_ratio {
                    log::debug!("area gate: rejected ratio {:.3}", area_ratio);
                    return None;
                }
                Some(FilteredDetection {
                    bbox,
                    crop: d.crop,
                    confidence: d.confidence,
                    area_ratio,
                })
            })
            .collect();

        // sort_by is stable, so equal confidences keep detector order
        sized.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
        sized.truncate(self.policy.top_k);

        log::debug!("top-k: kept {} detections", sized.len());
        sized
    }
}
