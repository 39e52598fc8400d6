use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::Serialize;

use crate::model::{Candle, CandleSource, Timeframe};

/// Freshness verdict for one (symbol, timeframe) series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Missing,
}

/// What happened to a candle handed to [`CandleStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Authoritative REST backfill replaced an existing bar in place.
    Replaced,
    /// Open/partial REST bar — dropped.
    RejectedPartialRest,
    /// Malformed candle — dropped.
    RejectedInvalid,
    /// Older than (or duplicate of) the series tail and not a REST replace.
    RejectedStale,
    /// Series is quarantined; appends are ignored until restart.
    Quarantined,
}

/// One bounded, strictly-ordered series of closed candles plus the set of
/// expected-but-missing slots inside the retained window.
#[derive(Debug, Default)]
struct CandleSeries {
    candles: VecDeque<Candle>,
    gaps: BTreeSet<i64>,
    quarantined: bool,
}

impl CandleSeries {
    fn evict_to(&mut self, cap: usize) {
        while self.candles.len() > cap {
            self.candles.pop_front();
        }
        if let Some(oldest) = self.candles.front().map(|c| c.start_ts) {
            self.gaps.retain(|&g| g >= oldest);
        }
    }
}

/// In-memory source of truth for all candle data.
///
/// One writer per series (WS ingest for 1m/5m, REST refresh for 15m and up);
/// readers clone what they need under the outer lock. Closed bars live in the
/// ring; at most one forming bar per series sits in a side slot so snapshots
/// and last-price resolution can see in-progress data.
pub struct CandleStore {
    series: HashMap<(String, Timeframe), CandleSeries>,
    forming: HashMap<(String, Timeframe), Candle>,
    retention: HashMap<Timeframe, usize>,
}

impl CandleStore {
    pub fn new(retention: HashMap<Timeframe, usize>) -> Self {
        Self {
            series: HashMap::new(),
            forming: HashMap::new(),
            retention,
        }
    }

    fn cap(&self, tf: Timeframe) -> usize {
        self.retention
            .get(&tf)
            .copied()
            .unwrap_or_else(|| tf.default_retention())
    }

    /// Append a closed candle, or replace an existing bar in place when the
    /// incoming candle is an authoritative (closed) REST backfill for the
    /// same slot.
    pub fn append(&mut self, candle: Candle, now_ms: i64) -> AppendOutcome {
        if candle.source == CandleSource::Rest && !candle.is_closed {
            return AppendOutcome::RejectedPartialRest;
        }
        if let Err(e) = candle.validate(now_ms) {
            tracing::debug!(symbol = %candle.symbol, tf = %candle.timeframe, "rejecting candle: {e}");
            return AppendOutcome::RejectedInvalid;
        }

        let tf = candle.timeframe;
        let key = (candle.symbol.clone(), tf);
        let cap = self.cap(tf);
        let series = self.series.entry(key.clone()).or_default();
        if series.quarantined {
            return AppendOutcome::Quarantined;
        }

        let outcome = match series.candles.back().map(|c| c.start_ts) {
            Some(last) if candle.start_ts <= last => {
                if candle.source == CandleSource::Rest && candle.is_closed {
                    match series.candles.iter_mut().find(|c| c.start_ts == candle.start_ts) {
                        Some(slot) => {
                            *slot = candle;
                            AppendOutcome::Replaced
                        }
                        None => AppendOutcome::RejectedStale,
                    }
                } else {
                    AppendOutcome::RejectedStale
                }
            }
            last => {
                if let Some(last) = last {
                    let mut slot = last + tf.ms();
                    while slot < candle.start_ts {
                        series.gaps.insert(slot);
                        slot += tf.ms();
                    }
                }
                series.candles.push_back(candle);
                series.evict_to(cap);
                AppendOutcome::Appended
            }
        };

        if !series_ordered(series) {
            series.quarantined = true;
            tracing::error!(symbol = %key.0, tf = %tf, "series ordering corrupted; quarantined");
            return AppendOutcome::Quarantined;
        }

        if outcome == AppendOutcome::Appended {
            // A committed close at or past the forming bar supersedes it.
            let forming_start = self.forming.get(&key).map(|f| f.start_ts);
            if let Some(fs) = forming_start {
                let last = self.series[&key].candles.back().map(|c| c.start_ts);
                if last.is_some_and(|l| l >= fs) {
                    self.forming.remove(&key);
                }
            }
        }
        outcome
    }

    /// Record an expected-but-missing slot (builder gap accounting for
    /// windows that never produced a bar).
    pub fn record_gap(&mut self, symbol: &str, tf: Timeframe, start_ts: i64) {
        let series = self.series.entry((symbol.to_string(), tf)).or_default();
        series.gaps.insert(start_ts);
    }

    /// Install or refresh the forming (not yet closed) bar for a series.
    pub fn set_forming(&mut self, candle: Candle) {
        debug_assert!(!candle.is_closed);
        self.forming
            .insert((candle.symbol.clone(), candle.timeframe), candle);
    }

    pub fn forming(&self, symbol: &str, tf: Timeframe) -> Option<&Candle> {
        self.forming.get(&(symbol.to_string(), tf))
    }

    /// Last up-to-`n` closed candles, newest last.
    pub fn latest(&self, symbol: &str, tf: Timeframe, n: usize) -> Vec<Candle> {
        match self.series.get(&(symbol.to_string(), tf)) {
            Some(s) => {
                let skip = s.candles.len().saturating_sub(n);
                s.candles.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Clone the whole retained closed series (read-consistent snapshot for
    /// indicator work).
    pub fn snapshot_series(&self, symbol: &str, tf: Timeframe) -> Vec<Candle> {
        self.series
            .get(&(symbol.to_string(), tf))
            .map(|s| s.candles.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn freshness(&self, symbol: &str, tf: Timeframe, now_ms: i64) -> Freshness {
        let key = (symbol.to_string(), tf);
        let current_bucket = tf.bucket(now_ms);
        if tf.is_live() {
            if let Some(f) = self.forming.get(&key) {
                if f.start_ts == current_bucket {
                    return Freshness::Fresh;
                }
            }
        }
        let last = self
            .series
            .get(&key)
            .and_then(|s| s.candles.back().map(|c| c.start_ts));
        match last {
            Some(last) if last >= current_bucket - tf.ms() => Freshness::Fresh,
            Some(_) => Freshness::Stale,
            None => {
                if self.forming.contains_key(&key) {
                    Freshness::Stale
                } else {
                    Freshness::Missing
                }
            }
        }
    }

    /// Expected-but-missing slots within the last `window` slots of the
    /// retained series.
    pub fn gaps(&self, symbol: &str, tf: Timeframe, window: usize) -> Vec<i64> {
        let Some(series) = self.series.get(&(symbol.to_string(), tf)) else {
            return Vec::new();
        };
        let Some(newest) = series.candles.back().map(|c| c.start_ts) else {
            return Vec::new();
        };
        let cutoff = newest - (window as i64) * tf.ms();
        series
            .gaps
            .iter()
            .copied()
            .filter(|&g| g >= cutoff)
            .collect()
    }

    pub fn gap_count(&self, symbol: &str, tf: Timeframe) -> usize {
        self.series
            .get(&(symbol.to_string(), tf))
            .map(|s| s.gaps.len())
            .unwrap_or(0)
    }

    pub fn is_quarantined(&self, symbol: &str, tf: Timeframe) -> bool {
        self.series
            .get(&(symbol.to_string(), tf))
            .is_some_and(|s| s.quarantined)
    }

    /// True once anything (closed or forming) has ever been stored for the
    /// symbol on any timeframe.
    pub fn has_any_data(&self, symbol: &str) -> bool {
        self.series
            .iter()
            .any(|((sym, _), s)| sym == symbol && !s.candles.is_empty())
            || self.forming.keys().any(|(sym, _)| sym == symbol)
    }
}

fn series_ordered(series: &CandleSeries) -> bool {
    series
        .candles
        .iter()
        .zip(series.candles.iter().skip(1))
        .all(|(a, b)| a.start_ts < b.start_ts)
}
