use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::filter::FilterPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
    #[error("Failed to read pipeline config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse pipeline config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid pipeline config: {0}")]
    Invalid(String),
}

/// Tunables for the analysis pipeline, read from an optional YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: f32,
    pub filter: FilterPolicy,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub timeout_secs: u64,
    /// Upper bound on inference jobs running on blocking threads at once.
    pub max_concurrent_jobs: usize,
    pub detector_model: String,
    pub detector_input_size: u32,
    /// Crop name to TorchScript file, relative to the model directory.
    pub classifier_models: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: 1.0,
            filter: FilterPolicy::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let mut classifier_models = HashMap::new();
        classifier_models.insert("pepper".to_string(), "pepper_disease_model.pt".to_string());
        Self {
            timeout_secs: 30,
            max_concurrent_jobs: 2,
            detector_model: "yolo_v1.torchscript".to_string(),
            detector_input_size: 640,
            classifier_models,
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(config_str)?;
        config.filter.check().map_err(ConfigError::Invalid)?;
        if config.inference.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "inference.timeout_secs must be positive".to_string(),
            ));
        }
        if config.inference.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "inference.max_concurrent_jobs must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub access_token_expire_minutes: i64,
    pub port: String,
    pub model_dir: PathBuf,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Reads the process environment. Call `dotenv::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let access_token_expire_minutes = match env::var("ACCESS_TOKEN_EXPIRE_MINUTES") {
            Ok(value) => value.parse::<i64>().ok().filter(|m| *m > 0).ok_or(
                ConfigError::InvalidVar {
                    name: "ACCESS_TOKEN_EXPIRE_MINUTES",
                    value,
                },
            )?,
            Err(_) => 30,
        };

        let port = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
        let model_dir = env::var("MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));

        let pipeline = match env::var("PIPELINE_CONFIG") {
            Ok(path) => {
                log::info!("Loading pipeline config from {}", path);
                PipelineConfig::load(Path::new(&path))?
            }
            Err(_) => PipelineConfig::default(),
        };

        Ok(Self {
            database_url,
            jwt_secret,
            access_token_expire_minutes,
            port,
            model_dir,
            pipeline,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name))
}
