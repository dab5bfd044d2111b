//! TorchScript-backed detector and classifier.
//!
//! A `CModule` is not safe to run concurrently, so each handle serializes
//! its forward passes through a mutex.

use image::DynamicImage;
use ndarray::{Array2, Array4};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tch::{CModule, Device, IValue, Kind, Tensor};

use super::labels::CropKind;
use super::postprocess::{DetectionDecode, classification_from_scores, decode_detections};
use super::preprocess::{classifier_input, letterbox};
use super::{ClassificationResult, DiseaseClassifier, ModelError, RawDetection, RegionDetector};

impl From<tch::TchError> for ModelError {
    fn from(err: tch::TchError) -> Self {
        ModelError::Inference(err.to_string())
    }
}

fn load_module(path: &Path, device: Device) -> Result<Arc<Mutex<CModule>>, ModelError> {
    let mut module = CModule::load_on_device(path, device)
        .map_err(|e| ModelError::Unavailable(format!("{}: {}", path.display(), e)))?;
    module.set_eval();
    Ok(Arc::new(Mutex::new(module)))
}

fn to_tensor(array: &Array4<f32>, device: Device) -> Result<Tensor, ModelError> {
    let data = array
        .as_slice()
        .ok_or_else(|| ModelError::Preprocessing("input tensor is not contiguous".to_string()))?;
    let shape: Vec<i64> = array.shape().iter().map(|d| *d as i64).collect();
    Ok(Tensor::from_slice(data).reshape(shape).to_device(device))
}

fn to_vec(tensor: &Tensor) -> Vec<f32> {
    let flat = tensor.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
    let num_elements = flat.size()[0] as usize;
    let mut values = vec![0.0f32; num_elements];
    flat.copy_data(&mut values, num_elements);
    values
}

fn forward(model: &Mutex<CModule>, input: Tensor) -> Result<Tensor, ModelError> {
    let model = model
        .lock()
        .map_err(|_| ModelError::Inference("model lock poisoned".to_string()))?;
    let output = tch::no_grad(|| model.forward_is(&[IValue::Tensor(input)]))?;
    match output {
        IValue::Tensor(tensor) => Ok(tensor),
        // segmentation heads return (detections, mask prototypes)
        IValue::Tuple(mut values) if !values.is_empty() => match values.swap_remove(0) {
            IValue::Tensor(tensor) => Ok(tensor),
            other => Err(ModelError::Inference(format!("unexpected output: {other:?}"))),
        },
        other => Err(ModelError::Inference(format!("unexpected output: {other:?}"))),
    }
}

#[derive(Clone)]
pub struct TorchDetector {
    model: Arc<Mutex<CModule>>,
    device: Device,
    input_size: u32,
    crop: CropKind,
    decode: DetectionDecode,
}

impl TorchDetector {
    pub fn load(path: &Path, input_size: u32, crop: CropKind) -> Result<Self, ModelError> {
        let device = Device::cuda_if_available();
        Ok(Self {
            model: load_module(path, device)?,
            device,
            input_size,
            crop,
            decode: DetectionDecode::default(),
        })
    }
}

impl RegionDetector for TorchDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, ModelError> {
        let (input, geometry) = letterbox(image, self.input_size);
        let output = forward(&self.model, to_tensor(&input, self.device)?)?;

        let size = output.size();
        let (rows, anchors) = match size.as_slice() {
            [1, rows, anchors] | [rows, anchors] => (*rows as usize, *anchors as usize),
            other => {
                return Err(ModelError::Inference(format!(
                    "unexpected detector output shape {other:?}"
                )));
            }
        };
        let output = Array2::from_shape_vec((rows, anchors), to_vec(&output))
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        decode_detections(output.view(), &geometry, self.crop, &self.decode)
    }
}

/// Expects a module whose output is already a probability vector.
#[derive(Clone)]
pub struct TorchClassifier {
    model: Arc<Mutex<CModule>>,
    device: Device,
    crop: CropKind,
}

impl TorchClassifier {
    pub fn load(path: &Path, crop: CropKind) -> Result<Self, ModelError> {
        let device = Device::cuda_if_available();
        Ok(Self {
            model: load_module(path, device)?,
            device,
            crop,
        })
    }
}

impl DiseaseClassifier for TorchClassifier {
    fn crop(&self) -> CropKind {
        self.crop
    }

    fn classify(&self, image: &DynamicImage) -> Result<ClassificationResult, ModelError> {
        let input = classifier_input(image);
        let output = forward(&self.model, to_tensor(&input, self.device)?)?;
        classification_from_scores(self.crop, &to_vec(&output))
    }
}
