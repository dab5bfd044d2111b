//! Per-request analysis state machine.
//!
//! `RECEIVED -> VALIDATING -> DETECTING -> CLASSIFYING -> ASSEMBLING`, ending
//! in `SUCCEEDED` or `FAILED`. Detector problems are not fatal: the run goes on
//! with zero regions and is marked `DETECTOR_UNAVAILABLE`. Classifier problems
//! are fatal and nothing partial is returned or stored.

use image::DynamicImage;
use shared::{AnalysisType, ProcessingStatus, RequestStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::filter::{DetectionFilter, FilteredDetection};
use super::types::{AnalysisResult, AnalyzedRegion, PipelineError, PipelineStage, SingleAnalysis};
use crate::db::gateway::{PersistenceGateway, RequestId};
use crate::imaging::codec::{self, DecodedImage, EncodeFormat};
use crate::inference::labels::CropKind;
use crate::inference::registry::ModelRegistry;
use crate::inference::{ModelError, RawDetection};

const DEFAULT_INFERENCE_SLOTS: usize = 2;

#[derive(Clone)]
pub struct AnalysisPipeline<G> {
    models: Arc<ModelRegistry>,
    filter: DetectionFilter,
    gateway: G,
    timeout: Duration,
    /// A permit is held until the blocking job returns, even after its caller timed out.
    slots: Arc<Semaphore>,
}

impl<G: PersistenceGateway> AnalysisPipeline<G> {
    pub fn new(models: Arc<ModelRegistry>, filter: DetectionFilter, gateway: G, timeout: Duration) -> Self {
        Self {
            models,
            filter,
            gateway,
            timeout,
            slots: Arc::new(Semaphore::new(DEFAULT_INFERENCE_SLOTS)),
        }
    }

    pub fn with_inference_slots(mut self, slots: usize) -> Self {
        self.slots = Arc::new(Semaphore::new(slots.max(1)));
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Full detect, filter and classify run over one image.
    pub async fn analyze(
        &self,
        user_id: Option<Uuid>,
        decoded: DecodedImage,
    ) -> Result<AnalysisResult, PipelineError> {
        let started = Instant::now();
        log::debug!("analysis stage: {}", PipelineStage::Received);
        let request_id = self
            .open_request(user_id, &decoded.content_ref, AnalysisType::Pipeline)
            .await;

        let outcome = self.run(Arc::new(decoded.image)).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;
        log::debug!("analysis stage: {}", final_stage(&outcome));

        match &outcome {
            Ok(result) => {
                log::info!(
                    "Analysis finished with {} ({} regions) in {} ms",
                    result.status,
                    result.total_detections(),
                    elapsed_ms
                );
                if let Some(id) = request_id {
                    if let Err(e) = self.gateway.save_result(id, result).await {
                        log::warn!("Failed to store result for request {}: {}", id, e);
                    }
                    self.close_request(id, RequestStatus::Completed, elapsed_ms).await;
                }
            }
            Err(e) => {
                log::warn!("Analysis ended {} after {} ms: {}", e.status(), elapsed_ms, e);
                if let Some(id) = request_id {
                    self.close_request(id, RequestStatus::Failed, elapsed_ms).await;
                }
            }
        }
        outcome
    }

    /// Classifies the whole image once for a caller-chosen crop, skipping detection.
    pub async fn analyze_single(
        &self,
        user_id: Option<Uuid>,
        decoded: DecodedImage,
        crop: CropKind,
    ) -> Result<SingleAnalysis, PipelineError> {
        let started = Instant::now();
        let request_id = self
            .open_request(user_id, &decoded.content_ref, AnalysisType::Single)
            .await;

        let outcome = self.run_single(Arc::new(decoded.image), crop).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;
        log::debug!("single analysis stage: {}", final_stage(&outcome));

        let status = match &outcome {
            Ok(single) => {
                log::info!(
                    "Single analysis for {}: {} ({:.3}) in {} ms",
                    single.crop,
                    single.disease.native_label(),
                    single.confidence,
                    elapsed_ms
                );
                RequestStatus::Completed
            }
            Err(e) => {
                log::warn!("Single analysis for {} failed after {} ms: {}", crop, elapsed_ms, e);
                RequestStatus::Failed
            }
        };
        if let Some(id) = request_id {
            self.close_request(id, status, elapsed_ms).await;
        }
        outcome
    }

    async fn run(&self, image: Arc<DynamicImage>) -> Result<AnalysisResult, PipelineError> {
        log::debug!("analysis stage: {}", PipelineStage::Validating);
        check_image(&image)?;

        log::debug!("analysis stage: {}", PipelineStage::Detecting);
        let (raw, status, detail) = self.detect(&image).await;
        let regions = self.filter.apply(&raw, image.width(), image.height());

        log::debug!("analysis stage: {}", PipelineStage::Classifying);
        let regions = self.classify_regions(&image, regions).await?;

        log::debug!("analysis stage: {}", PipelineStage::Assembling);
        let image_base64 = codec::encode(&image, EncodeFormat::Jpeg)?;

        Ok(AnalysisResult {
            regions,
            status,
            detail,
            image_base64,
        })
    }

    async fn run_single(
        &self,
        image: Arc<DynamicImage>,
        crop: CropKind,
    ) -> Result<SingleAnalysis, PipelineError> {
        check_image(&image)?;
        let classifier = self.models.classifier(crop)?;
        let classification = self.run_blocking(move || classifier.classify(&image)).await?;
        Ok(SingleAnalysis {
            crop,
            disease: classification.disease,
            confidence: classification.confidence,
        })
    }

    async fn detect(
        &self,
        image: &Arc<DynamicImage>,
    ) -> (Vec<RawDetection>, ProcessingStatus, Option<String>) {
        let Some(detector) = self.models.detector() else {
            log::warn!("Region detector is not loaded, continuing without detections");
            return (
                Vec::new(),
                ProcessingStatus::DetectorUnavailable,
                Some("region detector is not loaded".to_string()),
            );
        };

        let image = Arc::clone(image);
        match self.run_blocking(move || detector.detect(&image)).await {
            Ok(raw) => {
                log::debug!("detector returned {} candidate regions", raw.len());
                (raw, ProcessingStatus::Succeeded, None)
            }
            Err(e) => {
                log::warn!("Region detection failed, continuing without detections: {}", e);
                (Vec::new(), ProcessingStatus::DetectorUnavailable, Some(e.to_string()))
            }
        }
    }

    /// Runs the classifier once on the whole image and attaches its verdict
    /// to every region. The crop comes from the most confident region.
    async fn classify_regions(
        &self,
        image: &Arc<DynamicImage>,
        regions: Vec<FilteredDetection>,
    ) -> Result<Vec<AnalyzedRegion>, PipelineError> {
        let Some(top) = regions.first() else {
            return Ok(Vec::new());
        };

        let classifier = self.models.classifier(top.crop)?;
        let image = Arc::clone(image);
        let classification = self.run_blocking(move || classifier.classify(&image)).await?;

        Ok(regions
            .into_iter()
            .map(|region| AnalyzedRegion {
                region,
                classification: classification.clone(),
            })
            .collect())
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T, ModelError>
    where
        F: FnOnce() -> Result<T, ModelError> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let permit = match tokio::time::timeout_at(deadline, Arc::clone(&self.slots).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ModelError::Unavailable("inference slots closed".to_string())),
            Err(_) => {
                log::warn!("All inference slots stayed busy for {:?}", self.timeout);
                return Err(ModelError::Busy(self.timeout));
            }
        };

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });
        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ModelError::Inference(format!(
                "inference task aborted: {join_error}"
            ))),
            Err(_) => Err(ModelError::Timeout(self.timeout)),
        }
    }

    async fn open_request(
        &self,
        user_id: Option<Uuid>,
        image_ref: &str,
        analysis_type: AnalysisType,
    ) -> Option<RequestId> {
        let id = match self.gateway.create_request(user_id, image_ref, analysis_type).await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Failed to record analysis request: {}", e);
                return None;
            }
        };
        if let Err(e) = self
            .gateway
            .update_status(id, RequestStatus::Processing, None)
            .await
        {
            log::warn!("Failed to mark request {} as processing: {}", id, e);
        }
        Some(id)
    }

    async fn close_request(&self, id: RequestId, status: RequestStatus, elapsed_ms: i64) {
        if let Err(e) = self.gateway.update_status(id, status, Some(elapsed_ms)).await {
            log::warn!("Failed to mark request {} as {}: {}", id, status, e);
        }
    }
}

fn final_stage<T>(outcome: &Result<T, PipelineError>) -> PipelineStage {
    match outcome {
        Ok(_) => PipelineStage::Succeeded,
        Err(_) => PipelineStage::Failed,
    }
}

fn check_image(image: &DynamicImage) -> Result<(), PipelineError> {
    if codec::validate(image) {
        return Ok(());
    }
    Err(PipelineError::Validation {
        width: image.width(),
        height: image.height(),
        color: format!("{:?}", image.color()),
    })
}
