use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::labels::CropKind;
use super::{DiseaseClassifier, ModelError, RegionDetector};
use crate::config::InferenceConfig;

/// Model handles loaded once at startup and shared read-only by every request.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    detector: Option<Arc<dyn RegionDetector>>,
    classifiers: HashMap<CropKind, Arc<dyn DiseaseClassifier>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(mut self, detector: Arc<dyn RegionDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn DiseaseClassifier>) -> Self {
        self.classifiers.insert(classifier.crop(), classifier);
        self
    }

    pub fn detector(&self) -> Option<Arc<dyn RegionDetector>> {
        self.detector.clone()
    }

    pub fn classifier(&self, crop: CropKind) -> Result<Arc<dyn DiseaseClassifier>, ModelError> {
        if crop.diseases().is_empty() {
            return Err(ModelError::UnsupportedCrop(crop.to_string()));
        }
        self.classifiers
            .get(&crop)
            .cloned()
            .ok_or_else(|| ModelError::Unavailable(format!("{crop} classifier is not loaded")))
    }

    pub fn available_crops(&self) -> Vec<CropKind> {
        let mut crops: Vec<CropKind> = self.classifiers.keys().copied().collect();
        crops.sort_by_key(|c| c.to_string());
        crops
    }

    /// Loads every configured model from `model_dir`. Failures are logged and
    /// leave the corresponding slot empty.
    #[cfg(feature = "torch")]
    pub fn load(model_dir: &Path, config: &InferenceConfig) -> Self {
        use super::torch::{TorchClassifier, TorchDetector};
        use std::str::FromStr;

        let mut registry = Self::new();

        let detector_path = model_dir.join(&config.detector_model);
        match TorchDetector::load(&detector_path, config.detector_input_size, CropKind::Pepper) {
            Ok(detector) => {
                log::info!("Loaded region detector from {}", detector_path.display());
                registry = registry.with_detector(Arc::new(detector));
            }
            Err(e) => log::error!(
                "Failed to load region detector {}: {}",
                detector_path.display(),
                e
            ),
        }

        for (crop_name, file) in &config.classifier_models {
            let crop = match CropKind::from_str(crop_name) {
                Ok(crop) => crop,
                Err(_) => {
                    log::warn!("Ignoring classifier for unknown crop '{}'", crop_name);
                    continue;
                }
            };
            let path = model_dir.join(file);
            match TorchClassifier::load(&path, crop) {
                Ok(classifier) => {
                    log::info!("Loaded {} classifier from {}", crop, path.display());
                    registry = registry.with_classifier(Arc::new(classifier));
                }
                Err(e) => log::error!("Failed to load {} classifier {}: {}", crop, path.display(), e),
            }
        }

        registry
    }

    #[cfg(not(feature = "torch"))]
    pub fn load(model_dir: &Path, config: &InferenceConfig) -> Self {
        log::warn!(
            "Built without the `torch` feature; {} model(s) in {} will not be loaded",
            config.classifier_models.len() + 1,
            model_dir.display()
        );
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ClassificationResult;
    use crate::inference::labels::Disease;
    use image::DynamicImage;

    struct FixedClassifier;

    impl DiseaseClassifier for FixedClassifier {
        fn crop(&self) -> CropKind {
            CropKind::Pepper
        }

        fn classify(&self, _image: &DynamicImage) -> Result<ClassificationResult, ModelError> {
            Ok(ClassificationResult {
                crop: CropKind::Pepper,
                disease: Disease::PepperNormal,
                confidence: 1.0,
            })
        }
    }

    #[test]
    fn empty_registry_reports_unavailable() {
        let registry = ModelRegistry::new();
        assert!(registry.detector().is_none());
        assert!(matches!(
            registry.classifier(CropKind::Pepper),
            Err(ModelError::Unavailable(_))
        ));
        assert!(registry.available_crops().is_empty());
    }

    #[test]
    fn crops_without_label_tables_are_unsupported() {
        let registry = ModelRegistry::new().with_classifier(Arc::new(FixedClassifier));
        assert!(matches!(
            registry.classifier(CropKind::Tomato),
            Err(ModelError::UnsupportedCrop(_))
        ));
        assert!(registry.classifier(CropKind::Pepper).is_ok());
        assert_eq!(registry.available_crops(), vec![CropKind::Pepper]);
    }
}
