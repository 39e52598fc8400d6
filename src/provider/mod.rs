pub mod eodhd;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::AppError;
use crate::model::{Candle, Tick, Timeframe};

/// Capability contract every market-data adapter implements.
///
/// `fetch_candles` yields only closed bars (the consumer drops anything
/// else defensively). `stream_ticks` establishes one WS session and returns
/// a receiver that ends when the session dies — reconnecting is the
/// caller's job.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn id(&self) -> &'static str;

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, AppError>;

    async fn stream_ticks(&self, symbols: &[String]) -> Result<mpsc::Receiver<Tick>, AppError>;
}

/// Select the adapter named by `PROVIDER`. The single place that knows
/// about concrete providers.
pub fn load_provider(cfg: &Config) -> Result<Arc<dyn MarketDataProvider>, AppError> {
    match cfg.provider.trim().to_ascii_uppercase().as_str() {
        "EODHD" => Ok(Arc::new(eodhd::EodhdProvider::new(cfg)?)),
        other => Err(AppError::ProviderUnavailable(format!(
            "unknown PROVIDER '{other}' (expected: EODHD)"
        ))),
    }
}
