use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the service.
///
/// Ingest-layer kinds (`MalformedTick`, `MalformedCandle`) are absorbed at
/// the point of ingestion with a counter bump and never reach a request;
/// `InsufficientHistory`/`StaleData` map to HOLD inside scoring rather than
/// erroring. The remaining kinds surface over HTTP.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("malformed tick: {0}")]
    MalformedTick(String),

    #[error("malformed candle: {0}")]
    MalformedCandle(String),

    #[error("insufficient history: {0}")]
    InsufficientHistory(String),

    #[error("stale data: {0}")]
    StaleData(String),

    #[error("liquidity floor not met: {0}")]
    LiquidityFail(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no data ingested for {0}")]
    NoData(String),

    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NoData(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalInvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        Self::ProviderUnavailable(e.to_string())
    }
}
