use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{DataSource, SourceErrorKind};

// ============ Data Model Errors ============

/// Raised when a scored value is constructed outside its documented range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// A confidence or score fell outside `[min, max]`.
    #[error("{field} must be between {min} and {max}, got {value}")]
    ScoreOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// A sequential pattern must list its own base number.
    #[error("pattern numbers must include the base number {0}")]
    BaseNotInPattern(String),
}

impl ModelError {
    /// Check `value` against an inclusive range, rejecting NaN.
    pub(crate) fn check_range(
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<f64, ModelError> {
        if value.is_nan() || value < min || value > max {
            return Err(ModelError::ScoreOutOfRange {
                field,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }
}

// ============ Phone Parsing Errors ============

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("unknown region code '{0}'")]
    UnknownRegion(String),
    #[error("could not parse '{input}': {reason}")]
    Unparseable { input: String, reason: String },
}

// ============ Source Adapter Errors ============

/// Failure reported by a single source adapter.
///
/// These never leave the aggregator: the dispatch boundary converts each one
/// into a failed `IntelligenceResult`.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The raw input could not be parsed as a phone number for the region.
    #[error("phone number could not be parsed: {0}")]
    Parse(String),
    /// The source does not handle this kind of number (e.g. region-specific scrapers).
    #[error("source not applicable: {0}")]
    NotApplicable(String),
    /// Credentials or configuration for the source are missing.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// Transport-level failure talking to the provider.
    #[error("request failed: {0}")]
    Http(String),
    /// Provider answered with a non-success status.
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Provider payload could not be decoded.
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    /// The circuit breaker guarding this provider is open.
    #[error("circuit open after repeated failures")]
    CircuitOpen,
    /// The provider had nothing to say about this number.
    #[error("no data: {0}")]
    NoData(String),
}

impl AdapterError {
    /// Tag recorded on the failed result.
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            AdapterError::Parse(_) => SourceErrorKind::Parse,
            AdapterError::NotApplicable(_) => SourceErrorKind::NotApplicable,
            AdapterError::Unavailable(_) => SourceErrorKind::Unavailable,
            AdapterError::Http(_) => SourceErrorKind::Http,
            AdapterError::Status { .. } => SourceErrorKind::Status,
            AdapterError::Decode(_) => SourceErrorKind::Decode,
            AdapterError::CircuitOpen => SourceErrorKind::CircuitOpen,
            AdapterError::NoData(_) => SourceErrorKind::NoData,
        }
    }
}

impl From<PhoneError> for AdapterError {
    fn from(err: PhoneError) -> Self {
        AdapterError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdapterError::Decode(err.to_string())
        } else {
            AdapterError::Http(err.to_string())
        }
    }
}

// ============ Aggregator Errors ============

/// Programmer errors raised by the aggregator. Data and network failures are
/// never reported through this type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregatorError {
    /// A requested source has no weight, timeout or adapter configured.
    #[error("unknown or unconfigured data source: {0}")]
    UnknownSource(DataSource),
    /// Source weights must lie in (0, 1].
    #[error("weight for {data_source} must be in (0, 1], got {weight}")]
    InvalidWeight { data_source: DataSource, weight: f64 },
    /// Source timeouts must be strictly positive.
    #[error("timeout for {0} must be greater than zero")]
    InvalidTimeout(DataSource),
    /// A scoring constant was outside its allowed range.
    #[error(transparent)]
    Model(#[from] ModelError),
}

// ============ HTTP Errors ============

/// Errors surfaced by the HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Resource not found error.
    NotFound(String),
    /// Internal server error.
    InternalError(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<AggregatorError> for AppError {
    fn from(err: AggregatorError) -> Self {
        match err {
            AggregatorError::UnknownSource(_) => AppError::BadRequest(err.to_string()),
            other => AppError::InternalError(other.to_string()),
        }
    }
}
