use actix_multipart::Multipart;
use actix_web::{web, Error, HttpResponse};
use futures::TryStreamExt;
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use shared::{AnalyzeRequest, ErrorResponse, HistoryEntry};
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::middleware::{AuthMiddleware, AuthenticatedUser, OptionalUser};
use crate::db::gateway::PersistenceGateway;
use crate::imaging::codec::{self, DecodedImage};
use crate::inference::labels::CropKind;
use crate::pipeline::orchestrator::AnalysisPipeline;

/// Request bodies carry base64 images, so the JSON limit is raised well above
/// actix's default.
pub const MAX_JSON_BYTES: usize = 20 * 1024 * 1024;
pub const MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

const DEFAULT_HISTORY_LIMIT: i64 = 10;
const MAX_HISTORY_LIMIT: i64 = 100;

pub fn error_body(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse {
        error: message.into(),
    }
}

/// Gateways the analysis handlers can be mounted over.
pub trait AnalysisStore: PersistenceGateway + Clone + 'static {}

impl<T: PersistenceGateway + Clone + 'static> AnalysisStore for T {}

pub fn configure_routes<G>(cfg: &mut web::ServiceConfig, auth_middleware: AuthMiddleware)
where
    G: AnalysisStore,
{
    cfg.service(web::resource("/health").route(web::get().to(health::<G>)))
        .service(web::resource("/analyze").route(web::post().to(analyze::<G>)))
        .service(web::resource("/analyze_single").route(web::post().to(analyze_single::<G>)))
        .service(web::resource("/analyze_web").route(web::post().to(analyze_web::<G>)))
        .service(
            web::resource("/analyze/history")
                .wrap(auth_middleware)
                .route(web::get().to(history::<G>)),
        );
}

#[derive(Deserialize)]
struct SingleQuery {
    crop_type: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

fn parse_crop(raw: Option<&str>) -> Result<CropKind, HttpResponse> {
    let name = raw.unwrap_or("pepper").trim().to_ascii_lowercase();
    CropKind::from_str(&name).map_err(|_| {
        HttpResponse::BadRequest().json(error_body(format!("Unknown crop type: {name}")))
    })
}

async fn health<G: AnalysisStore>(
    pipeline: web::Data<AnalysisPipeline<G>>,
) -> HttpResponse {
    let models = pipeline.models();
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "detector_loaded": models.detector().is_some(),
        "classifiers": models.available_crops(),
    }))
}

async fn run_pipeline<G: AnalysisStore>(
    pipeline: &AnalysisPipeline<G>,
    user_id: Option<Uuid>,
    decoded: DecodedImage,
) -> HttpResponse {
    match pipeline.analyze(user_id, decoded).await {
        Ok(result) => HttpResponse::Ok().json(result.to_response()),
        Err(e) => {
            error!("Pipeline analysis failed: {}", e);
            HttpResponse::InternalServerError().json(error_body(e.reason()))
        }
    }
}

async fn run_single<G: AnalysisStore>(
    pipeline: &AnalysisPipeline<G>,
    user_id: Option<Uuid>,
    decoded: DecodedImage,
    crop: CropKind,
) -> HttpResponse {
    match pipeline.analyze_single(user_id, decoded, crop).await {
        Ok(single) => HttpResponse::Ok().json(single.to_response()),
        Err(e) => {
            error!("Single analysis failed: {}", e);
            HttpResponse::InternalServerError().json(error_body(e.reason()))
        }
    }
}

async fn analyze<G: AnalysisStore>(
    user: OptionalUser,
    pipeline: web::Data<AnalysisPipeline<G>>,
    body: web::Json<AnalyzeRequest>,
) -> HttpResponse {
    let decoded = match codec::decode(&body.image_base64) {
        Ok(decoded) => decoded,
        Err(e) => {
            info!("Rejected /analyze payload: {}", e);
            return HttpResponse::BadRequest().json(error_body(e.to_string()));
        }
    };
    run_pipeline(&pipeline, user.0, decoded).await
}

async fn analyze_single<G: AnalysisStore>(
    user: OptionalUser,
    pipeline: web::Data<AnalysisPipeline<G>>,
    query: web::Query<SingleQuery>,
    body: web::Json<AnalyzeRequest>,
) -> HttpResponse {
    let crop = match parse_crop(query.crop_type.as_deref()) {
        Ok(crop) => crop,
        Err(response) => return response,
    };
    let decoded = match codec::decode(&body.image_base64) {
        Ok(decoded) => decoded,
        Err(e) => {
            info!("Rejected /analyze_single payload: {}", e);
            return HttpResponse::BadRequest().json(error_body(e.to_string()));
        }
    };
    run_single(&pipeline, user.0, decoded, crop).await
}

/// Browser upload: multipart `file`, optional `analysis_type` and `crop_type`.
async fn analyze_web<G: AnalysisStore>(
    user: OptionalUser,
    pipeline: web::Data<AnalysisPipeline<G>>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let mut file: Option<Vec<u8>> = None;
    let mut analysis_type = String::from("pipeline");
    let mut crop_type: Option<String> = None;

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Ok(HttpResponse::PayloadTooLarge().json(error_body("Uploaded file is too large")));
            }
            data.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "file" => file = Some(data),
            "analysis_type" => analysis_type = String::from_utf8_lossy(&data).trim().to_lowercase(),
            "crop_type" => crop_type = Some(String::from_utf8_lossy(&data).into_owned()),
            other => log::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let Some(bytes) = file.filter(|bytes| !bytes.is_empty()) else {
        return Ok(HttpResponse::BadRequest().json(error_body("No image file uploaded")));
    };
    let decoded = match codec::decode_bytes(&bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            info!("Rejected /analyze_web upload: {}", e);
            return Ok(HttpResponse::BadRequest().json(error_body(e.to_string())));
        }
    };

    let response = match analysis_type.as_str() {
        "pipeline" => run_pipeline(&pipeline, user.0, decoded).await,
        "single" => match parse_crop(crop_type.as_deref()) {
            Ok(crop) => run_single(&pipeline, user.0, decoded, crop).await,
            Err(response) => response,
        },
        other => HttpResponse::BadRequest().json(error_body(format!("Unknown analysis type: {other}"))),
    };
    Ok(response)
}

async fn history<G: AnalysisStore>(
    user: AuthenticatedUser,
    pipeline: web::Data<AnalysisPipeline<G>>,
    query: web::Query<HistoryQuery>,
) -> HttpResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    match pipeline.gateway().get_history(user.0, limit).await {
        Ok(records) => {
            let entries: Vec<HistoryEntry> = records.iter().map(|r| r.to_history_entry()).collect();
            HttpResponse::Ok().json(entries)
        }
        Err(e) => {
            error!("Failed to load history for {}: {}", user.0, e);
            HttpResponse::InternalServerError().json(error_body("Failed to load analysis history"))
        }
    }
}
