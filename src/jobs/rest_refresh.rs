use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::model::{Candle, Timeframe};
use crate::provider::MarketDataProvider;
use crate::state::{now_ms, AppState, IngestStats};
use crate::store::AppendOutcome;

/// Timer-driven refresh of closed higher-timeframe bars for the primary and
/// reference instruments. Sole writer of the 15m/1h/4h/1d series.
pub async fn rest_refresh_loop(
    state: Arc<AppState>,
    provider: Arc<dyn MarketDataProvider>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_millis(state.config.refresh_interval_ms);
    let mut symbols = vec![state.config.primary_ticker.clone()];
    for s in [&state.config.spy_symbol, &state.config.qqq_symbol] {
        if !symbols.contains(s) {
            symbols.push(s.clone());
        }
    }

    loop {
        if *shutdown.borrow() {
            return;
        }
        refresh_once(&state, provider.as_ref(), &symbols).await;
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn refresh_once(state: &AppState, provider: &dyn MarketDataProvider, symbols: &[String]) {
    let now = now_ms();
    for symbol in symbols {
        let mut h1_bars: Vec<Candle> = Vec::new();
        for tf in [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1] {
            let retention = state
                .config
                .retention
                .get(&tf)
                .copied()
                .unwrap_or_else(|| tf.default_retention());
            let from = now - (retention as i64 + 5) * tf.ms();

            let fetched = match provider.fetch_candles(symbol, tf, from, now).await {
                Ok(bars) => bars,
                Err(e) if tf == Timeframe::H4 && !h1_bars.is_empty() => {
                    tracing::debug!(%symbol, "4h fetch unavailable ({e}); aggregating from 1h");
                    aggregate_1h_to_4h(&h1_bars, now)
                }
                Err(e) => {
                    IngestStats::bump(&state.ingest.rest_errors);
                    tracing::warn!(%symbol, tf = %tf, "REST refresh failed: {e}");
                    continue;
                }
            };

            if tf == Timeframe::H1 {
                h1_bars = fetched.clone();
            }

            let mut store = state.store.write().await;
            for candle in fetched {
                // Provider yields closed bars; drop anything else defensively.
                if !candle.is_closed || candle.end_ts() > now {
                    continue;
                }
                match store.append(candle, now) {
                    AppendOutcome::Appended | AppendOutcome::Replaced => {}
                    AppendOutcome::RejectedStale => {} // already retained
                    _ => IngestStats::bump(&state.ingest.candles_rejected),
                }
            }
        }
    }
    IngestStats::bump(&state.ingest.rest_refreshes);
}

/// Pure 1h→4h reduction for providers without a native 4h interval.
/// Only fully-elapsed 4h buckets are emitted.
fn aggregate_1h_to_4h(h1_bars: &[Candle], now: i64) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::new();
    let mut bucket: Vec<&Candle> = Vec::new();

    let flush = |bucket: &[&Candle], out: &mut Vec<Candle>| {
        let Some(first) = bucket.first() else { return };
        let last = bucket.last().expect("non-empty bucket");
        let start = Timeframe::H4.bucket(first.start_ts);
        if start + Timeframe::H4.ms() > now {
            return; // still forming
        }
        out.push(Candle {
            symbol: first.symbol.clone(),
            timeframe: Timeframe::H4,
            start_ts: start,
            o: first.o,
            h: bucket.iter().fold(f64::MIN, |acc, c| acc.max(c.h)),
            l: bucket.iter().fold(f64::MAX, |acc, c| acc.min(c.l)),
            c: last.c,
            volume: bucket.iter().map(|c| c.volume).sum(),
            session: first.session,
            is_closed: true,
            source: crate::model::CandleSource::Rest,
        });
    };

    for candle in h1_bars {
        match bucket.first() {
            Some(first)
                if Timeframe::H4.bucket(first.start_ts) == Timeframe::H4.bucket(candle.start_ts) =>
            {
                bucket.push(candle);
            }
            Some(_) => {
                flush(&bucket, &mut out);
                bucket = vec![candle];
            }
            None => bucket = vec![candle],
        }
    }
    flush(&bucket, &mut out);
    out
}
