use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

pub type Result<T> = std::result::Result<T, RecommenderError>;

#[derive(Debug, thiserror::Error)]
pub enum RecommenderError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Training is already in progress")]
    TrainingInProgress,

    #[error("Training cooldown in effect, retry in {remaining_seconds}s")]
    CooldownActive { remaining_seconds: u64 },

    #[error("Training set is empty: {0}")]
    EmptyTrainingSet(String),

    #[error("Invalid release_date '{value}' for item '{item_id}'")]
    FeatureBuild { item_id: String, value: String },

    #[error("Model not trained yet")]
    ModelNotTrained,

    #[error("User '{0}' not found in the dataset, train again with this user data")]
    UserNotFound(String),

    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("Internal index {0} is out of range")]
    IndexOutOfRange(usize),

    #[error("Corrupt persisted state in {artifact}: {reason}")]
    CorruptPersistedState { artifact: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String, key: Option<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecommenderError {
    pub fn corrupt(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        RecommenderError::CorruptPersistedState {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RecommenderError::Validation(_) => "validation_error",
            RecommenderError::TrainingInProgress => "training_in_progress",
            RecommenderError::CooldownActive { .. } => "cooldown_active",
            RecommenderError::EmptyTrainingSet(_) => "empty_training_set",
            RecommenderError::FeatureBuild { .. } => "feature_build_error",
            RecommenderError::ModelNotTrained => "model_not_trained",
            RecommenderError::UserNotFound(_) => "user_not_found",
            RecommenderError::UnknownIdentifier(_) => "unknown_identifier",
            RecommenderError::IndexOutOfRange(_) => "index_out_of_range",
            RecommenderError::CorruptPersistedState { .. } => "corrupt_persisted_state",
            RecommenderError::Configuration { .. } => "configuration_error",
            RecommenderError::Io(_) => "io_error",
            RecommenderError::Internal(_) => "internal_error",
        }
    }
}

impl From<bincode::Error> for RecommenderError {
    fn from(err: bincode::Error) -> Self {
        RecommenderError::Internal(format!("serialization failed: {}", err))
    }
}

impl ResponseError for RecommenderError {
    fn status_code(&self) -> StatusCode {
        match self {
            RecommenderError::Validation(_)
            | RecommenderError::EmptyTrainingSet(_)
            | RecommenderError::FeatureBuild { .. } => StatusCode::BAD_REQUEST,
            RecommenderError::TrainingInProgress => StatusCode::LOCKED,
            RecommenderError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
            RecommenderError::ModelNotTrained
            | RecommenderError::UserNotFound(_)
            | RecommenderError::UnknownIdentifier(_) => StatusCode::NOT_FOUND,
            RecommenderError::IndexOutOfRange(_)
            | RecommenderError::CorruptPersistedState { .. }
            | RecommenderError::Configuration { .. }
            | RecommenderError::Io(_)
            | RecommenderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            RecommenderError::CooldownActive { remaining_seconds } => HttpResponse::build(status)
                .insert_header(("Retry-After", remaining_seconds.to_string()))
                .json(serde_json::json!({
                    "error": self.code(),
                    "message": "Training cooldown in effect",
                    "remaining_seconds": remaining_seconds
                })),
            _ if status.is_server_error() => HttpResponse::build(status).json(serde_json::json!({
                "error": self.code(),
                "message": "Internal server error"
            })),
            _ => HttpResponse::build(status).json(serde_json::json!({
                "error": self.code(),
                "message": self.to_string()
            })),
        }
    }
}
