use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::resolve_ticker;
use crate::scoring::{score_symbol, ScoreParams, ScoreResult};
use crate::state::{now_ms, AppState};

#[derive(Debug, Deserialize)]
pub struct ScoreQuery {
    ticker: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/score", get(score))
}

/// GET /score?ticker=SYMBOL — run the full pipeline (indicators, tape,
/// state machine, gates) against a read-consistent view of the store.
async fn score(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ScoreQuery>,
) -> Result<Json<ScoreResult>, AppError> {
    let ticker = resolve_ticker(q.ticker.as_deref(), &state.config.primary_ticker)?;

    let store = state.store.read().await;
    if !store.has_any_data(&ticker) {
        return Err(AppError::NoData(ticker));
    }

    let params = ScoreParams {
        symbol: ticker,
        spy_symbol: state.config.spy_symbol.clone(),
        qqq_symbol: state.config.qqq_symbol.clone(),
        liquidity_floor_usd: state.config.liquidity_floor_usd,
    };
    let result = score_symbol(&store, &params, now_ms())?;
    Ok(Json(result))
}
