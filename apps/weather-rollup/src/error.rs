use crate::rollup::Granularity;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Why an inbound payload was dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` is not a number")]
    NotNumeric(&'static str),

    #[error("field `{0}` is not finite")]
    NotFinite(&'static str),

    #[error("field `{0}` is not a string")]
    NotString(&'static str),

    #[error("field `placeId` is empty")]
    EmptyLocation,
}

impl ValidationError {
    /// Short label used in logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::Malformed(_) | ValidationError::NotAnObject => "malformed",
            ValidationError::MissingField(_) | ValidationError::EmptyLocation => "missing_field",
            ValidationError::NotNumeric(_)
            | ValidationError::NotFinite(_)
            | ValidationError::NotString(_) => "invalid_field",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store rejected write to {table}: {reason}")]
    Rejected { table: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("MQTT connection failed after {attempts} attempts: {last_error}")]
    ConnectionLost { attempts: u32, last_error: String },

    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn map_store_error(err: StoreError, granularity: Granularity) -> AppError {
    tracing::error!(error = %err, table = granularity.table_name(), "aggregate store query failed");
    AppError::unavailable("Aggregate store unavailable")
}
