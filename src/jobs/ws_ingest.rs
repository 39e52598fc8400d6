use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::builder::CandleBuilder;
use crate::provider::MarketDataProvider;
use crate::state::{now_ms, AppState, IngestStats};

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Long-lived WS ingest activity: stream ticks through the builder into the
/// store. Sole writer of the 1m/5m series.
///
/// Disconnects (including the idle timeout) trigger exponential backoff with
/// full jitter and a fresh subscribe. Ticks missed during an outage are not
/// recovered; the affected bars surface as gaps.
pub async fn ws_ingest_loop(
    state: Arc<AppState>,
    provider: Arc<dyn MarketDataProvider>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut builder = CandleBuilder::new(Arc::clone(&state.ingest), state.config.forming_15m);
    let symbols = state.config.ws_symbols.clone();
    let idle = Duration::from_secs(state.config.ws_idle_timeout_s);
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }
        match provider.stream_ticks(&symbols).await {
            Ok(mut ticks) => {
                tracing::info!(symbols = symbols.len(), "tick stream established");
                attempt = 0;
                loop {
                    tokio::select! {
                        res = shutdown.changed() => {
                            if res.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                        next = tokio::time::timeout(idle, ticks.recv()) => match next {
                            Ok(Some(tick)) => {
                                let now = now_ms();
                                let mut store = state.store.write().await;
                                builder.on_tick(&mut store, &tick, now);
                            }
                            Ok(None) => {
                                tracing::warn!("tick stream ended");
                                break;
                            }
                            Err(_) => {
                                tracing::warn!(idle_s = idle.as_secs(), "tick stream idle, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("tick stream connect failed: {e}"),
        }

        IngestStats::bump(&state.ingest.ws_reconnects);
        attempt = attempt.saturating_add(1);
        let delay = backoff_with_jitter(attempt);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Full jitter: uniform in [0, min(cap, base · 2^attempt)].
fn backoff_with_jitter(attempt: u32) -> Duration {
    let ceiling = BACKOFF_BASE_MS
        .saturating_mul(2u64.saturating_pow(attempt.min(16)))
        .min(BACKOFF_CAP_MS);
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded_by_cap() {
        for attempt in 0..40 {
            let d = backoff_with_jitter(attempt);
            assert!(d <= Duration::from_millis(BACKOFF_CAP_MS));
        }
    }

    #[test]
    fn early_attempts_stay_under_doubled_base() {
        for _ in 0..50 {
            let d = backoff_with_jitter(1);
            assert!(d <= Duration::from_millis(BACKOFF_BASE_MS * 2));
        }
    }
}
