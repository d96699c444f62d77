//! Configuration for the recommender service
//!
//! Every option is read from the environment as `RECOMMENDER_<KEY>`, falling
//! back to the bare `<KEY>`, with a documented default when neither is set.
//! Override hierarchy: defaults < .env < environment.
//!
//! # Environment Variables
//!
//! - `MODEL_FILE` (default: `lightfm_model.bin`): model weights artifact
//! - `DATASET_FILE` (default: `dataset.bin`): registry and vocabulary artifact
//! - `ITEM_FEATURES_FILE` (default: `item_features.bin`): item-feature matrix artifact
//! - `MODEL_LOSS` (default: `logistic`): `logistic` or `bpr`
//! - `MODEL_NO_COMPONENTS` (default: 64): latent dimensionality
//! - `MODEL_EPOCHS` (default: 20)
//! - `MODEL_LEARNING_RATE` (default: 0.05)
//! - `MODEL_REGULARIZATION` (default: 0.0)
//! - `MODEL_SEED` (default: 42)
//! - `TRAIN_COOLDOWN_SECS` (default: 120)
//! - `DUPLICATE_POLICY` (default: `keep_all`): `keep_all` or `last_wins`
//! - `PERSIST_ON_TRAIN` (default: true)
//! - `DEFAULT_NUM_RECOMMENDATIONS` (default: 20)
//! - `HOST` / `PORT` (default: `0.0.0.0` / 8000)
//! - `LOG_LEVEL` (default: `info`)

use crate::error::{RecommenderError, Result};
use crate::interactions::DuplicatePolicy;
use crate::matrix_factorization::{FactorizationConfig, Loss};
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "RECOMMENDER_";

/// Locations of the three artifacts that describe one persisted generation
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub model_file: PathBuf,
    pub dataset_file: PathBuf,
    pub item_features_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_file: PathBuf::from("lightfm_model.bin"),
            dataset_file: PathBuf::from("dataset.bin"),
            item_features_file: PathBuf::from("item_features.bin"),
        }
    }
}

impl StorageConfig {
    /// All three artifacts under one directory with their default file names
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let defaults = Self::default();
        Self {
            model_file: dir.join(defaults.model_file),
            dataset_file: dir.join(defaults.dataset_file),
            item_features_file: dir.join(defaults.item_features_file),
        }
    }
}

/// Training lifecycle policy
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Minimum wait between successive completed training runs
    pub cooldown: Duration,
    pub duplicate_policy: DuplicatePolicy,
    /// Save every successfully trained generation before it goes live
    pub persist_on_train: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(120),
            duplicate_policy: DuplicatePolicy::KeepAll,
            persist_on_train: true,
        }
    }
}

/// Request layer settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub default_num_recommendations: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            default_num_recommendations: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommenderConfig {
    pub model: FactorizationConfig,
    pub storage: StorageConfig,
    pub training: TrainingConfig,
    pub server: ServerConfig,
}

impl RecommenderConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if a value is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let model = FactorizationConfig {
            loss: parse_env_var::<Loss>("MODEL_LOSS", defaults.model.loss)?,
            no_components: parse_env_var("MODEL_NO_COMPONENTS", defaults.model.no_components)?,
            learning_rate: parse_env_var("MODEL_LEARNING_RATE", defaults.model.learning_rate)?,
            epochs: parse_env_var("MODEL_EPOCHS", defaults.model.epochs)?,
            regularization: parse_env_var(
                "MODEL_REGULARIZATION",
                defaults.model.regularization,
            )?,
            seed: parse_env_var("MODEL_SEED", defaults.model.seed)?,
        };

        let storage = StorageConfig {
            model_file: env_value("MODEL_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.model_file),
            dataset_file: env_value("DATASET_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.dataset_file),
            item_features_file: env_value("ITEM_FEATURES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.item_features_file),
        };

        let cooldown_secs = parse_env_var(
            "TRAIN_COOLDOWN_SECS",
            defaults.training.cooldown.as_secs(),
        )?;
        let training = TrainingConfig {
            cooldown: Duration::from_secs(cooldown_secs),
            duplicate_policy: parse_env_var("DUPLICATE_POLICY", defaults.training.duplicate_policy)?,
            persist_on_train: parse_env_var("PERSIST_ON_TRAIN", defaults.training.persist_on_train)?,
        };

        let server = ServerConfig {
            host: env_value("HOST").unwrap_or(defaults.server.host),
            port: parse_env_var("PORT", defaults.server.port)?,
            log_level: env_value("LOG_LEVEL").unwrap_or(defaults.server.log_level),
            default_num_recommendations: parse_env_var(
                "DEFAULT_NUM_RECOMMENDATIONS",
                defaults.server.default_num_recommendations,
            )?,
        };

        Ok(Self {
            model,
            storage,
            training,
            server,
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.model.no_components == 0 {
            return Err(config_error(
                "no_components must be greater than 0",
                "MODEL_NO_COMPONENTS",
            ));
        }

        if self.model.epochs == 0 {
            return Err(config_error("epochs must be greater than 0", "MODEL_EPOCHS"));
        }

        if !self.model.learning_rate.is_finite() || self.model.learning_rate <= 0.0 {
            return Err(config_error(
                format!(
                    "learning_rate must be a positive number, got {}",
                    self.model.learning_rate
                ),
                "MODEL_LEARNING_RATE",
            ));
        }

        if !self.model.regularization.is_finite() || self.model.regularization < 0.0 {
            return Err(config_error(
                "regularization must be a non-negative number",
                "MODEL_REGULARIZATION",
            ));
        }

        if self.server.default_num_recommendations == 0 {
            return Err(config_error(
                "default_num_recommendations must be greater than 0",
                "DEFAULT_NUM_RECOMMENDATIONS",
            ));
        }

        let paths = [
            &self.storage.model_file,
            &self.storage.dataset_file,
            &self.storage.item_features_file,
        ];
        for (i, a) in paths.iter().enumerate() {
            if a.as_os_str().is_empty() {
                return Err(config_error("storage paths must not be empty", "MODEL_FILE"));
            }
            if paths[i + 1..].contains(a) {
                return Err(config_error(
                    format!("storage path {} is used for more than one artifact", a.display()),
                    "MODEL_FILE",
                ));
            }
        }

        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> RecommenderError {
    RecommenderError::Configuration {
        message: message.into(),
        key: Some(format!("{}{}", ENV_PREFIX, key)),
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse environment variable with default value
fn parse_env_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_value(key)
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| RecommenderError::Configuration {
                message: format!("Failed to parse {}: {}", key, e),
                key: Some(format!("{}{}", ENV_PREFIX, key)),
            })
        })
        .unwrap_or(Ok(default))
}

/// Load .env file if present
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }
}
