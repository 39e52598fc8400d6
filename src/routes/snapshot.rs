use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::indicators::{self, IndicatorSet};
use crate::model::{Candle, Timeframe};
use crate::routes::resolve_ticker;
use crate::state::{now_ms, AppState};
use crate::store::Freshness;
use crate::tape::{compute_tape, TapeSnapshot};

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    ticker: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
struct TfSnapshot {
    candles: Vec<Candle>,
    indicators: IndicatorSet,
    freshness: Freshness,
    gaps: usize,
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    ticker: String,
    per_tf: BTreeMap<&'static str, TfSnapshot>,
    missing_timeframes: Vec<&'static str>,
    tape: TapeSnapshot,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/snapshot", get(snapshot))
}

/// GET /snapshot?ticker=SYMBOL — recent candles (closed plus any forming
/// bar), the indicator set, and freshness per timeframe.
async fn snapshot(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SnapshotQuery>,
) -> Result<Json<SnapshotResponse>, AppError> {
    let ticker = resolve_ticker(q.ticker.as_deref(), &state.config.primary_ticker)?;
    let limit = q.limit.clamp(10, 200);
    let now = now_ms();

    let store = state.store.read().await;
    if !store.has_any_data(&ticker) {
        return Err(AppError::NoData(ticker));
    }

    let mut per_tf = BTreeMap::new();
    let mut missing = Vec::new();
    for tf in Timeframe::ALL {
        let closed = store.snapshot_series(&ticker, tf);
        let indicators = indicators::compute(tf, &closed);
        let freshness = store.freshness(&ticker, tf, now);
        if freshness == Freshness::Missing {
            missing.push(tf.as_str());
        }

        let skip = closed.len().saturating_sub(limit);
        let mut candles: Vec<Candle> = closed[skip..].to_vec();
        if let Some(forming) = store.forming(&ticker, tf) {
            candles.push(forming.clone());
        }

        per_tf.insert(
            tf.as_str(),
            TfSnapshot {
                candles,
                indicators,
                freshness,
                gaps: store.gap_count(&ticker, tf),
            },
        );
    }

    let (tape, _) = compute_tape(
        &store,
        &ticker,
        &state.config.spy_symbol,
        &state.config.qqq_symbol,
        now,
    );

    Ok(Json(SnapshotResponse {
        ticker,
        per_tf,
        missing_timeframes: missing,
        tape,
    }))
}
