use ndarray::ArrayView2;

use super::labels::CropKind;
use super::preprocess::Letterbox;
use super::{BoundingBox, ClassificationResult, ModelError, RawDetection};

/// Picks the highest-scoring class and resolves it against the crop's label table.
pub fn classification_from_scores(
    crop: CropKind,
    scores: &[f32],
) -> Result<ClassificationResult, ModelError> {
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ModelError::Inference("non-finite classifier output".to_string()));
    }

    let (class_index, confidence) = scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((i, score)),
        })
        .ok_or_else(|| ModelError::Inference("empty classifier output".to_string()))?;

    let disease = crop.disease_at(class_index).ok_or_else(|| {
        ModelError::Inference(format!(
            "class index {class_index} out of range for {crop} ({} classes)",
            crop.diseases().len()
        ))
    })?;

    Ok(ClassificationResult {
        crop,
        disease,
        confidence,
    })
}

/// Decoding parameters for a YOLO detection head.
#[derive(Debug, Clone, Copy)]
pub struct DetectionDecode {
    pub num_classes: usize,
    pub score_floor: f32,
    pub iou_threshold: f32,
}

impl Default for DetectionDecode {
    fn default() -> Self {
        Self {
            num_classes: 1,
            score_floor: 0.25,
            iou_threshold: 0.7,
        }
    }
}

/// Decodes a `[4 + num_classes (+ mask coefficients), anchors]` YOLO output
/// into source-image detections, applying non-maximum suppression.
pub fn decode_detections(
    output: ArrayView2<'_, f32>,
    geometry: &Letterbox,
    crop: CropKind,
    params: &DetectionDecode,
) -> Result<Vec<RawDetection>, ModelError> {
    let rows = output.nrows();
    if rows < 4 + params.num_classes {
        return Err(ModelError::Inference(format!(
            "detector output has {rows} rows, expected at least {}",
            4 + params.num_classes
        )));
    }

    let mut candidates = Vec::new();
    for anchor in output.columns() {
        let score = (4..4 + params.num_classes)
            .map(|row| anchor[row])
            .fold(f32::NEG_INFINITY, f32::max);
        if score.is_nan() || score < params.score_floor {
            continue;
        }

        let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
        let (x1, y1) = geometry.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.to_source(cx + w / 2.0, cy + h / 2.0);
        candidates.push(RawDetection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            crop,
            confidence: score.min(1.0),
        });
    }

    Ok(non_maximum_suppression(candidates, params.iou_threshold))
}

fn non_maximum_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for detection in detections {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&detection.bbox) <= iou_threshold)
        {
            kept.push(detection);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::labels::Disease;
    use ndarray::Array2;

    fn identity_geometry() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            size: 640,
        }
    }

    #[test]
    fn picks_argmax_label() {
        let result = classification_from_scores(CropKind::Pepper, &[0.1, 0.2, 0.7]).unwrap();
        assert_eq!(result.disease, Disease::PepperNormal);
        assert!((result.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn first_index_wins_ties() {
        let result = classification_from_scores(CropKind::Pepper, &[0.4, 0.4, 0.2]).unwrap();
        assert_eq!(result.disease, Disease::PepperBacterialSpot);
    }

    #[test]
    fn rejects_bad_classifier_output() {
        assert!(classification_from_scores(CropKind::Pepper, &[]).is_err());
        assert!(classification_from_scores(CropKind::Pepper, &[0.1, f32::NAN, 0.2]).is_err());
        assert!(classification_from_scores(CropKind::Pepper, &[0.1, 0.1, 0.1, 0.7]).is_err());
        assert!(classification_from_scores(CropKind::Tomato, &[1.0]).is_err());
    }

    #[test]
    fn decodes_and_suppresses_overlaps() {
        // columns: two overlapping boxes and one separate low-score box
        let output = Array2::from_shape_vec(
            (5, 3),
            vec![
                50.0, 52.0, 300.0, // cx
                50.0, 50.0, 300.0, // cy
                40.0, 40.0, 20.0, // w
                40.0, 40.0, 20.0, // h
                0.9, 0.8, 0.1, // score
            ],
        )
        .unwrap();
        let detections = decode_detections(
            output.view(),
            &identity_geometry(),
            CropKind::Pepper,
            &DetectionDecode::default(),
        )
        .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(30.0, 30.0, 70.0, 70.0));
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn rejects_short_output() {
        let output = Array2::<f32>::zeros((3, 10));
        let err = decode_detections(
            output.view(),
            &identity_geometry(),
            CropKind::Pepper,
            &DetectionDecode::default(),
        );
        assert!(err.is_err());
    }
}
