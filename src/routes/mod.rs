pub mod score;
pub mod snapshot;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::{now_ms, AppState, IngestStats};

/// Assemble the API router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(score::routes())
        .merge(snapshot::routes())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let ingest = &state.ingest;
    Json(json!({
        "status": "ok",
        "provider": state.provider_id,
        "uptime_s": (now_ms() - state.started_at_ms) / 1_000,
        "ingest": {
            "ticks_total": IngestStats::get(&ingest.ticks_total),
            "ticks_invalid": IngestStats::get(&ingest.ticks_invalid),
            "ticks_stale": IngestStats::get(&ingest.ticks_stale),
            "candles_rejected": IngestStats::get(&ingest.candles_rejected),
            "ws_reconnects": IngestStats::get(&ingest.ws_reconnects),
            "rest_refreshes": IngestStats::get(&ingest.rest_refreshes),
            "rest_errors": IngestStats::get(&ingest.rest_errors),
        },
    }))
}

/// Resolve and validate the ticker for a request: explicit `?ticker=` wins,
/// else the configured primary; missing both or a malformed value is a 400.
pub(crate) fn resolve_ticker(
    raw: Option<&str>,
    default: &str,
) -> Result<String, AppError> {
    let candidate = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.to_ascii_uppercase(),
        None if !default.is_empty() => default.to_ascii_uppercase(),
        None => return Err(AppError::InvalidRequest("ticker is required".to_string())),
    };
    let ok_len = (1..=20).contains(&candidate.len());
    let ok_chars = candidate
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !ok_len || !ok_chars {
        return Err(AppError::InvalidRequest(format!(
            "malformed ticker '{candidate}'"
        )));
    }
    Ok(candidate)
}
