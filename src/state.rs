use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::Config;
use crate::store::CandleStore;

/// Ingest-side drop/error counters. Malformed input never fails a request;
/// it lands here and in debug logs.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub ticks_total: AtomicU64,
    pub ticks_invalid: AtomicU64,
    pub ticks_stale: AtomicU64,
    pub candles_rejected: AtomicU64,
    pub ws_reconnects: AtomicU64,
    pub rest_refreshes: AtomicU64,
    pub rest_errors: AtomicU64,
}

impl IngestStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Shared application state, passed to all route handlers via
/// `axum::extract::State`.
///
/// The store is the only shared mutable piece: the WS ingest task is the
/// sole writer of 1m/5m series, the REST refresh task the sole writer of
/// 15m and above; request handlers read under the lock and clone.
pub struct AppState {
    pub config: Config,
    pub store: RwLock<CandleStore>,
    pub ingest: Arc<IngestStats>,
    pub provider_id: String,
    pub started_at_ms: i64,
}

impl AppState {
    pub fn new(config: Config, provider_id: String, now_ms: i64) -> Arc<Self> {
        let store = CandleStore::new(config.retention.clone());
        Arc::new(Self {
            config,
            store: RwLock::new(store),
            ingest: Arc::new(IngestStats::default()),
            provider_id,
            started_at_ms: now_ms,
        })
    }
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
