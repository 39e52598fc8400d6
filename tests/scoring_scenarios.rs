//! End-to-end scoring scenarios: store state in, signal out.

use std::collections::HashMap;

use momoscore::indicators;
use momoscore::model::{Candle, CandleSource, SessionTag, Timeframe};
use momoscore::scoring::{score_symbol, MomoState, ScoreParams, Signal};
use momoscore::store::CandleStore;

const TICKER: &str = "TSLA.US";
const SPY: &str = "SPY.US";
const QQQ: &str = "QQQ.US";

// A Tuesday afternoon (UTC), on the 5m grid.
const NOW: i64 = 1_760_454_300_000;

fn params() -> ScoreParams {
    ScoreParams {
        symbol: TICKER.to_string(),
        spy_symbol: SPY.to_string(),
        qqq_symbol: QQQ.to_string(),
        liquidity_floor_usd: 1_000_000.0,
    }
}

fn candle(
    symbol: &str,
    tf: Timeframe,
    start_ts: i64,
    c: f64,
    half_range: f64,
    volume: f64,
    source: CandleSource,
) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timeframe: tf,
        start_ts,
        o: c,
        h: c + half_range,
        l: c - half_range,
        c,
        volume,
        session: SessionTag::Rth,
        is_closed: true,
        source,
    }
}

/// Append a contiguous closed series whose last bar is the most recent
/// expected one for `now` (fresh by construction).
fn fill(
    store: &mut CandleStore,
    symbol: &str,
    tf: Timeframe,
    now: i64,
    closes: &[f64],
    half_range: f64,
    volume: f64,
) {
    let source = if tf == Timeframe::M5 {
        CandleSource::Agg
    } else {
        CandleSource::Rest
    };
    let last_start = tf.bucket(now) - tf.ms();
    let n = closes.len() as i64;
    for (i, &c) in closes.iter().enumerate() {
        let start = last_start - (n - 1 - i as i64) * tf.ms();
        store.append(candle(symbol, tf, start, c, half_range, volume, source), now);
    }
}

fn linear(from: f64, to: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
        .collect()
}

/// Healthy reference instruments: rising 15m, fresh.
fn fill_supportive_tape(store: &mut CandleStore) {
    fill(store, SPY, Timeframe::M15, NOW, &linear(500.0, 505.0, 30), 1.0, 10_000.0);
    fill(store, QQQ, Timeframe::M15, NOW, &linear(400.0, 404.0, 30), 1.0, 10_000.0);
    fill(store, QQQ, Timeframe::M5, NOW, &vec![400.0; 10], 0.5, 10_000.0);
}

/// Primary in a gentle uptrend with deep liquidity: the BUY posture.
fn fill_buy_posture(store: &mut CandleStore) {
    fill(store, TICKER, Timeframe::M5, NOW, &linear(99.0, 100.0, 40), 0.6, 50_000.0);
    fill(store, TICKER, Timeframe::M15, NOW, &linear(96.0, 100.0, 30), 1.0, 150_000.0);
}

#[test]
fn buy_path_full_alignment() {
    let mut store = CandleStore::new(HashMap::new());
    fill_buy_posture(&mut store);
    fill_supportive_tape(&mut store);

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Buy, "audit: {:?}", result.audit);
    assert_eq!(result.state, MomoState::Active);
    assert!(result.audit.iter().filter(|a| a.gate != "tape_context").all(|a| a.passed));

    // Risk outputs follow the anchor/ATR formulas.
    let s5 = store.snapshot_series(TICKER, Timeframe::M5);
    let ind5 = indicators::compute(Timeframe::M5, &s5);
    let ind15 = indicators::compute(Timeframe::M15, &store.snapshot_series(TICKER, Timeframe::M15));
    let anchor = ind5.vwap_session.unwrap();
    let atr5 = ind5.atr14.unwrap();
    let atr15 = ind15.atr14.unwrap();
    let c5 = s5.last().unwrap().c;
    assert!(c5 - anchor <= 0.5 * atr5, "pullback branch expected");

    let entry = result.levels.entry_range.unwrap();
    assert!((entry.lo - anchor).abs() < 1e-9);
    assert!((entry.hi - (anchor + 0.5 * atr5)).abs() < 1e-9);
    assert!((result.levels.stop.unwrap() - (anchor - 1.2 * atr5)).abs() < 1e-9);
    assert_eq!(result.levels.targets.len(), 2);
    assert!((result.levels.targets[0] - (c5 + atr15)).abs() < 1e-9);
    assert!((result.levels.targets[1] - (c5 + 2.0 * atr15)).abs() < 1e-9);

    // Every confidence bonus fires here.
    assert!((result.confidence - 1.0).abs() < 1e-9);
    let expected_size = 1.0 - (c5 - anchor).abs() / (2.0 * atr5);
    assert!((result.size_hint - expected_size).abs() < 1e-9);
}

#[test]
fn ignored_ticker_on_thin_dollar_volume() {
    let mut store = CandleStore::new(HashMap::new());
    // 20 bars of 5m at ~$20k mean dollar-volume — far under the $1M floor.
    fill(&mut store, TICKER, Timeframe::M5, NOW, &vec![10.0; 20], 0.2, 2_000.0);
    fill(&mut store, TICKER, Timeframe::M15, NOW, &linear(9.0, 10.0, 30), 0.4, 2_000.0);
    fill_supportive_tape(&mut store);

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Ignore);
    assert!(result
        .audit
        .iter()
        .any(|a| a.gate == "liquidity" && !a.passed));
}

#[test]
fn liquidity_failure_dominates_even_when_failing() {
    let mut store = CandleStore::new(HashMap::new());
    // Breakdown shape *and* thin volume: IGNORE must win over EXIT.
    let mut closes = linear(105.0, 97.0, 39);
    closes.push(94.0);
    fill(&mut store, TICKER, Timeframe::M5, NOW, &closes, 0.6, 1_000.0);
    fill(&mut store, TICKER, Timeframe::M15, NOW, &linear(105.0, 95.0, 30), 1.0, 1_000.0);
    fill_supportive_tape(&mut store);

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Ignore);
}

#[test]
fn no_chase_blocks_extended_price() {
    let mut store = CandleStore::new(HashMap::new());
    // Gentle uptrend, then the last bar rips far above the anchor.
    let mut closes = linear(99.0, 100.0, 39);
    closes.push(106.0);
    fill(&mut store, TICKER, Timeframe::M5, NOW, &closes, 0.6, 50_000.0);
    fill(&mut store, TICKER, Timeframe::M15, NOW, &linear(96.0, 106.0, 30), 1.0, 150_000.0);
    fill_supportive_tape(&mut store);

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Hold, "audit: {:?}", result.audit);
    assert_eq!(result.state, MomoState::Active);
    assert!(result.audit.iter().any(|a| a.gate == "no_chase" && !a.passed));
    assert!(result.levels.entry_range.is_none());
}

#[test]
fn risk_off_with_weak_rs_holds() {
    let mut store = CandleStore::new(HashMap::new());
    fill_buy_posture(&mut store);
    // Both references below EMA20 and printing lower lows.
    fill(&mut store, SPY, Timeframe::M15, NOW, &linear(520.0, 500.0, 30), 1.0, 10_000.0);
    fill(&mut store, QQQ, Timeframe::M15, NOW, &linear(420.0, 400.0, 30), 1.0, 10_000.0);
    // QQQ 5m nearly matching the primary's drift: RS stays under +0.5%.
    fill(&mut store, QQQ, Timeframe::M5, NOW, &linear(400.0, 400.5, 10), 0.5, 10_000.0);

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Hold);
    assert_eq!(result.tape.risk_off, Some(true));
    let tape_gate = result.audit.iter().find(|a| a.gate == "tape").unwrap();
    assert!(!tape_gate.passed);
    assert!(tape_gate.detail.contains("rs insufficient"));
}

#[test]
fn confirmed_breakdown_exits() {
    let mut store = CandleStore::new(HashMap::new());
    // 5m slides, then the last bar undercuts the prior 20-bar low; 15m is
    // already below its EMA20.
    let mut closes = linear(105.0, 97.0, 39);
    closes.push(94.0);
    fill(&mut store, TICKER, Timeframe::M5, NOW, &closes, 0.6, 50_000.0);
    fill(&mut store, TICKER, Timeframe::M15, NOW, &linear(105.0, 95.0, 30), 1.0, 150_000.0);
    fill_supportive_tape(&mut store);

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Exit, "audit: {:?}", result.audit);
    assert_eq!(result.state, MomoState::Failed);
}

#[test]
fn stale_15m_forces_hold_with_missing_tfs() {
    let mut store = CandleStore::new(HashMap::new());
    fill(&mut store, TICKER, Timeframe::M5, NOW, &linear(99.0, 100.0, 40), 0.6, 50_000.0);
    // last 15m bar closed 45 minutes ago
    fill(&mut store, TICKER, Timeframe::M15, NOW - 2_700_000, &linear(96.0, 100.0, 30), 1.0, 150_000.0);
    fill_supportive_tape(&mut store);

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Hold);
    assert_eq!(result.missing_tfs, vec!["15m"]);
    assert!(result.audit.iter().any(|a| a.gate == "freshness" && !a.passed));
}

#[test]
fn conservative_when_5m_not_fresh() {
    let mut store = CandleStore::new(HashMap::new());
    fill(&mut store, TICKER, Timeframe::M5, NOW - 3_600_000, &linear(99.0, 100.0, 40), 0.6, 50_000.0);
    fill(&mut store, TICKER, Timeframe::M15, NOW, &linear(96.0, 100.0, 30), 1.0, 150_000.0);
    fill_supportive_tape(&mut store);

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert!(matches!(result.signal, Signal::Hold | Signal::Ignore));
    assert!(result.missing_tfs.contains(&"5m"));
}

#[test]
fn gap_riddled_series_holds() {
    let mut store = CandleStore::new(HashMap::new());
    fill_buy_posture(&mut store);
    fill_supportive_tape(&mut store);
    // Inject three recorded 5m gaps — over the guard's limit.
    for i in 1..=3 {
        store.record_gap(TICKER, Timeframe::M5, NOW - i * 7 * Timeframe::M5.ms());
    }

    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Hold);
    assert!(result.audit.iter().any(|a| a.gate == "gap_check" && !a.passed));
}

#[test]
fn score_is_deterministic_for_identical_store_state() {
    let build = || {
        let mut store = CandleStore::new(HashMap::new());
        fill_buy_posture(&mut store);
        fill_supportive_tape(&mut store);
        store
    };
    let a = score_symbol(&build(), &params(), NOW).unwrap();
    let b = score_symbol(&build(), &params(), NOW).unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn empty_store_reports_missing_and_holds() {
    let store = CandleStore::new(HashMap::new());
    let result = score_symbol(&store, &params(), NOW).unwrap();
    assert_eq!(result.signal, Signal::Hold);
    assert_eq!(result.state, MomoState::NoMomo);
    assert_eq!(result.missing_tfs, vec!["5m", "15m"]);
    assert!(result.last_price.is_none());
}
