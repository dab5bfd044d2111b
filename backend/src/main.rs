mod admin;
mod auth;
mod config;
mod db;
mod imaging;
mod inference;
mod pipeline;
mod routes;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use auth::jwt::JwtService;
use auth::middleware::AuthMiddleware;
use config::AppConfig;
use db::postgres::PgRepository;
use inference::registry::ModelRegistry;
use pipeline::filter::DetectionFilter;
use pipeline::orchestrator::AnalysisPipeline;
use routes::configure_routes;
use std::sync::Arc;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::other(format!("{context}: {err}"))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|e| startup_error("Invalid configuration", e))?;
    log::info!(
        "Pipeline config v{}: {:?}, inference timeout {:?}",
        config.pipeline.version,
        config.pipeline.filter,
        config.pipeline.inference.timeout()
    );

    let db_repo = PgRepository::connect(&config.database_url)
        .await
        .map_err(|e| startup_error("Database connection failed", e))?;
    db_repo
        .migrate()
        .await
        .map_err(|e| startup_error("Database migration failed", e))?;
    db_repo
        .seed_reference_data()
        .await
        .map_err(|e| startup_error("Seeding reference data failed", e))?;

    let models = ModelRegistry::load(&config.model_dir, &config.pipeline.inference);
    if models.detector().is_none() {
        log::warn!("No region detector loaded; analyses will report DETECTOR_UNAVAILABLE");
    }
    log::info!("Classifiers loaded for: {:?}", models.available_crops());

    let pipeline = AnalysisPipeline::new(
        Arc::new(models),
        DetectionFilter::new(config.pipeline.filter),
        db_repo.clone(),
        config.pipeline.inference.timeout(),
    )
    .with_inference_slots(config.pipeline.inference.max_concurrent_jobs);

    let jwt_service = JwtService::new(&config.jwt_secret, config.access_token_expire_minutes);
    let auth_middleware = AuthMiddleware::new(jwt_service.clone());

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::JsonConfig::default().limit(routes::MAX_JSON_BYTES))
            .app_data(web::Data::new(pipeline.clone()))
            .app_data(web::Data::new(db_repo.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .configure(|cfg| configure_routes::<PgRepository>(cfg, auth_middleware.clone()))
            .configure(|cfg| auth::routes::configure::<PgRepository>(cfg, auth_middleware.clone()))
            .configure(|cfg| admin::configure::<PgRepository>(cfg, auth_middleware.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
