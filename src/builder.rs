use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{Candle, CandleSource, SessionTag, Tick, Timeframe};
use crate::state::IngestStats;
use crate::store::{AppendOutcome, CandleStore};

/// How far into the future a tick timestamp may run before it is dropped.
const MAX_FUTURE_SKEW_MS: i64 = 5_000;

/// Builds 1m bars from live ticks and reduces closed 1m bars into 5m bars
/// and a forming 15m view.
///
/// Holds only the open 1m accumulator and the 1m window of the current 5m
/// bucket; everything committed lives in the store. Never panics on
/// malformed input — invalid ticks are counted and dropped.
pub struct CandleBuilder {
    open_1m: HashMap<String, Candle>,
    window_5m: HashMap<String, Vec<Candle>>,
    forming_15m: bool,
    stats: Arc<IngestStats>,
}

impl CandleBuilder {
    pub fn new(stats: Arc<IngestStats>, forming_15m: bool) -> Self {
        Self {
            open_1m: HashMap::new(),
            window_5m: HashMap::new(),
            forming_15m,
            stats,
        }
    }

    pub fn on_tick(&mut self, store: &mut CandleStore, tick: &Tick, now_ms: i64) {
        if let Err(reason) = validate_tick(tick, now_ms) {
            IngestStats::bump(&self.stats.ticks_invalid);
            tracing::debug!(symbol = %tick.symbol, "dropping tick: {reason}");
            return;
        }
        IngestStats::bump(&self.stats.ticks_total);

        let bucket = Timeframe::M1.bucket(tick.t_ms);
        let open_start = self.open_1m.get(&tick.symbol).map(|b| b.start_ts);
        match open_start {
            None => {
                let bar = open_bar(tick, bucket);
                store.set_forming(bar.clone());
                self.open_1m.insert(tick.symbol.clone(), bar);
            }
            Some(start) if bucket == start => {
                let bar = self.open_1m.get_mut(&tick.symbol).expect("open bar present");
                bar.h = bar.h.max(tick.price);
                bar.l = bar.l.min(tick.price);
                bar.c = tick.price;
                bar.volume += tick.size;
                store.set_forming(bar.clone());
            }
            Some(start) if tick.t_ms < start => {
                // Belongs to an already-closed minute (or older) — unusable.
                IngestStats::bump(&self.stats.ticks_stale);
                tracing::debug!(symbol = %tick.symbol, t_ms = tick.t_ms, "dropping stale tick");
            }
            Some(_) => {
                // Minute rolled: close the open bar, then start a new one.
                let mut closed = self.open_1m.remove(&tick.symbol).expect("open bar present");
                closed.is_closed = true;
                match store.append(closed.clone(), now_ms) {
                    AppendOutcome::Appended => self.on_close_1m(store, &closed, now_ms),
                    _ => IngestStats::bump(&self.stats.candles_rejected),
                }
                let bar = open_bar(tick, bucket);
                store.set_forming(bar.clone());
                self.open_1m.insert(tick.symbol.clone(), bar);
            }
        }
    }

    /// Runs once per committed 1m close: 1m→5m reduction and the forming
    /// 15m recompute, both pure reductions over the 1m window.
    fn on_close_1m(&mut self, store: &mut CandleStore, closed: &Candle, now_ms: i64) {
        self.update_5m(store, closed, now_ms);
        if self.forming_15m {
            self.update_forming_15m(store, closed);
        }
    }

    fn update_5m(&mut self, store: &mut CandleStore, closed: &Candle, now_ms: i64) {
        let w_start = Timeframe::M5.bucket(closed.start_ts);
        let win = self.window_5m.entry(closed.symbol.clone()).or_default();

        if let Some(first) = win.first() {
            let prev_start = Timeframe::M5.bucket(first.start_ts);
            if prev_start != w_start {
                // Moved into a new 5m window without completing the old one.
                store.record_gap(&closed.symbol, Timeframe::M5, prev_start);
                win.clear();
            }
        }
        win.push(closed.clone());

        let is_window_close = closed.start_ts == w_start + 4 * Timeframe::M1.ms();
        if is_window_close {
            if window_complete(win, w_start) {
                let bar = aggregate(&closed.symbol, Timeframe::M5, w_start, win, true);
                if store.append(bar, now_ms) != AppendOutcome::Appended {
                    IngestStats::bump(&self.stats.candles_rejected);
                }
            } else {
                store.record_gap(&closed.symbol, Timeframe::M5, w_start);
            }
            self.window_5m.remove(&closed.symbol);
        } else {
            let forming = aggregate(&closed.symbol, Timeframe::M5, w_start, win, false);
            store.set_forming(forming);
        }
    }

    fn update_forming_15m(&self, store: &mut CandleStore, closed: &Candle) {
        let w_start = Timeframe::M15.bucket(closed.start_ts);
        let tail = store.latest(&closed.symbol, Timeframe::M1, 15);

        // Consecutive run of 1m closes ending at the current bucket, not
        // crossing the 15m boundary.
        let mut run: Vec<Candle> = Vec::new();
        let mut expected = closed.start_ts;
        for bar in tail.iter().rev() {
            if bar.start_ts != expected || bar.start_ts < w_start {
                break;
            }
            run.push(bar.clone());
            expected -= Timeframe::M1.ms();
        }
        if run.is_empty() {
            return;
        }
        run.reverse();
        let forming = aggregate(&closed.symbol, Timeframe::M15, w_start, &run, false);
        store.set_forming(forming);
    }
}

fn open_bar(tick: &Tick, bucket: i64) -> Candle {
    Candle {
        symbol: tick.symbol.clone(),
        timeframe: Timeframe::M1,
        start_ts: bucket,
        o: tick.price,
        h: tick.price,
        l: tick.price,
        c: tick.price,
        volume: tick.size,
        session: tick.session,
        is_closed: false,
        source: CandleSource::Ws,
    }
}

fn validate_tick(tick: &Tick, now_ms: i64) -> Result<(), &'static str> {
    if tick.symbol.trim().is_empty() {
        return Err("missing symbol");
    }
    if !tick.price.is_finite() || tick.price <= 0.0 {
        return Err("non-positive or non-finite price");
    }
    if !tick.size.is_finite() || tick.size < 0.0 {
        return Err("negative or non-finite size");
    }
    if tick.t_ms > now_ms + MAX_FUTURE_SKEW_MS {
        return Err("timestamp too far in the future");
    }
    Ok(())
}

fn window_complete(win: &[Candle], w_start: i64) -> bool {
    win.len() == 5
        && win
            .iter()
            .enumerate()
            .all(|(i, c)| c.start_ts == w_start + i as i64 * Timeframe::M1.ms())
}

/// Majority session tag across constituent bars.
fn majority_session(bars: &[Candle]) -> SessionTag {
    let rth = bars.iter().filter(|c| c.session == SessionTag::Rth).count();
    let ext = bars.iter().filter(|c| c.session == SessionTag::Ext).count();
    if rth > ext {
        SessionTag::Rth
    } else if ext > rth {
        SessionTag::Ext
    } else {
        SessionTag::Unknown
    }
}

/// Pure OHLCV reduction over an ordered, non-empty run of lower-timeframe
/// bars.
fn aggregate(symbol: &str, tf: Timeframe, start_ts: i64, bars: &[Candle], closed: bool) -> Candle {
    let first = bars.first().expect("non-empty window");
    let last = bars.last().expect("non-empty window");
    Candle {
        symbol: symbol.to_string(),
        timeframe: tf,
        start_ts,
        o: first.o,
        h: bars.iter().fold(f64::MIN, |acc, c| acc.max(c.h)),
        l: bars.iter().fold(f64::MAX, |acc, c| acc.min(c.l)),
        c: last.c,
        volume: bars.iter().map(|c| c.volume).sum(),
        session: majority_session(bars),
        is_closed: closed,
        source: CandleSource::Agg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Aligned to a 15m boundary so 1m/5m/15m bucketing all line up.
    const T0: i64 = 1_700_000_100_000;

    fn tick(symbol: &str, t_ms: i64, price: f64, size: f64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            t_ms,
            price,
            size,
            session: SessionTag::Rth,
        }
    }

    fn setup() -> (CandleBuilder, CandleStore) {
        (
            CandleBuilder::new(Arc::new(IngestStats::default()), true),
            CandleStore::new(HashMap::new()),
        )
    }

    #[test]
    fn ticks_in_one_minute_roll_into_single_candle() {
        let (mut b, mut s) = setup();
        let now = T0 + 600_000;
        b.on_tick(&mut s, &tick("TSLA.US", T0 + 1_000, 10.0, 5.0), now);
        b.on_tick(&mut s, &tick("TSLA.US", T0 + 20_000, 10.6, 2.0), now);
        b.on_tick(&mut s, &tick("TSLA.US", T0 + 45_000, 9.9, 3.0), now);
        // next-minute tick forces the close
        b.on_tick(&mut s, &tick("TSLA.US", T0 + 61_000, 10.1, 1.0), now);

        let closed = s.latest("TSLA.US", Timeframe::M1, 10);
        assert_eq!(closed.len(), 1);
        let c = &closed[0];
        assert_eq!(c.start_ts, T0);
        assert!(c.is_closed);
        assert_eq!(c.o, 10.0);
        assert_eq!(c.h, 10.6);
        assert_eq!(c.l, 9.9);
        assert_eq!(c.c, 9.9);
        assert_eq!(c.volume, 10.0);
    }

    #[test]
    fn five_one_minute_closes_emit_a_5m_bar() {
        let (mut b, mut s) = setup();
        let now = T0 + 3_600_000;
        for i in 0..6 {
            b.on_tick(&mut s, &tick("TSLA.US", T0 + i * 60_000, 10.0 + i as f64, 1.0), now);
        }
        let c5 = s.latest("TSLA.US", Timeframe::M5, 10);
        assert_eq!(c5.len(), 1);
        let c = &c5[0];
        assert_eq!(c.start_ts, T0);
        assert_eq!(c.o, 10.0);
        assert_eq!(c.c, 14.0);
        assert_eq!(c.h, 14.0);
        assert_eq!(c.volume, 5.0);
        assert_eq!(c.source, CandleSource::Agg);
        assert!(c.is_closed);
    }

    #[test]
    fn missing_one_minute_bar_records_5m_gap() {
        let (mut b, mut s) = setup();
        let now = T0 + 3_600_000;
        // minutes 0, 1, 3, 4, 5 — minute 2 never traded
        for i in [0_i64, 1, 3, 4, 5] {
            b.on_tick(&mut s, &tick("TSLA.US", T0 + i * 60_000, 10.0, 1.0), now);
        }
        assert!(s.latest("TSLA.US", Timeframe::M5, 10).is_empty());
        assert!(s.gaps("TSLA.US", Timeframe::M5, 10).contains(&T0));
    }

    #[test]
    fn forming_15m_tracks_recent_closes() {
        let (mut b, mut s) = setup();
        let now = T0 + 3_600_000;
        for i in 0..4 {
            b.on_tick(&mut s, &tick("TSLA.US", T0 + i * 60_000, 10.0 + i as f64, 1.0), now);
        }
        let f = s.forming("TSLA.US", Timeframe::M15).expect("forming 15m");
        assert!(!f.is_closed);
        assert_eq!(f.source, CandleSource::Agg);
        assert_eq!(f.start_ts, Timeframe::M15.bucket(T0));
        assert_eq!(f.o, 10.0);
        assert_eq!(f.c, 12.0); // three closed 1m bars so far
    }

    #[test]
    fn invalid_ticks_are_dropped_and_counted() {
        let stats = Arc::new(IngestStats::default());
        let mut b = CandleBuilder::new(Arc::clone(&stats), false);
        let mut s = CandleStore::new(HashMap::new());
        let now = T0 + 60_000;

        b.on_tick(&mut s, &tick("TSLA.US", T0, -1.0, 1.0), now);
        b.on_tick(&mut s, &tick("TSLA.US", T0, f64::NAN, 1.0), now);
        b.on_tick(&mut s, &tick("TSLA.US", T0, 10.0, -2.0), now);
        b.on_tick(&mut s, &tick("", T0, 10.0, 1.0), now);
        b.on_tick(&mut s, &tick("TSLA.US", now + 10_000, 10.0, 1.0), now);

        assert_eq!(IngestStats::get(&stats.ticks_invalid), 5);
        assert_eq!(IngestStats::get(&stats.ticks_total), 0);
        assert!(!s.has_any_data("TSLA.US"));
    }

    #[test]
    fn out_of_order_tick_within_open_minute_updates() {
        let (mut b, mut s) = setup();
        let now = T0 + 600_000;
        b.on_tick(&mut s, &tick("TSLA.US", T0 + 30_000, 10.0, 1.0), now);
        // earlier tick inside the same minute still lands in the open bar
        b.on_tick(&mut s, &tick("TSLA.US", T0 + 10_000, 11.0, 1.0), now);
        let f = s.forming("TSLA.US", Timeframe::M1).expect("open bar");
        assert_eq!(f.h, 11.0);
        assert_eq!(f.volume, 2.0);
    }

    #[test]
    fn tick_older_than_open_bar_is_stale() {
        let stats = Arc::new(IngestStats::default());
        let mut b = CandleBuilder::new(Arc::clone(&stats), false);
        let mut s = CandleStore::new(HashMap::new());
        let now = T0 + 600_000;
        b.on_tick(&mut s, &tick("TSLA.US", T0 + 120_000, 10.0, 1.0), now);
        b.on_tick(&mut s, &tick("TSLA.US", T0 + 30_000, 10.0, 1.0), now);
        assert_eq!(IngestStats::get(&stats.ticks_stale), 1);
    }
}
