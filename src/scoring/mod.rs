pub mod gates;
pub mod state_machine;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::AppError;
use crate::indicators::{self, IndicatorSet};
use crate::model::Timeframe;
use crate::store::{CandleStore, Freshness};
use crate::tape::{self, TapeSnapshot};

pub use state_machine::MomoState;

use gates::{run_gates, GateContext, GateOutcome};
use state_machine::{next_state, stateless_state, TransitionInputs};

/// More recorded gaps than this in the retained 5m/15m window forces HOLD.
const MAX_GAPS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Hold,
    Exit,
    Ignore,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub gate: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PriceRange {
    pub lo: f64,
    pub hi: f64,
}

/// Price levels attached to the result. `trailing_stop`/`time_stop_ms` are
/// declared hooks and always null.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Levels {
    pub entry_range: Option<PriceRange>,
    pub stop: Option<f64>,
    pub targets: Vec<f64>,
    pub support_range: Option<PriceRange>,
    pub resistance_1: Option<PriceRange>,
    pub resistance_2: Option<PriceRange>,
    pub trailing_stop: Option<f64>,
    pub time_stop_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub ticker: String,
    pub signal: Signal,
    pub state: MomoState,
    pub confidence: f64,
    pub size_hint: f64,
    pub levels: Levels,
    pub freshness: BTreeMap<&'static str, Freshness>,
    pub missing_tfs: Vec<&'static str>,
    pub tape: TapeSnapshot,
    pub audit: Vec<AuditEntry>,
    pub last_price: Option<f64>,
    pub last_price_ts: Option<String>,
    pub last_price_source: Option<&'static str>,
}

/// Request-time parameters the scorer needs beyond the store itself.
#[derive(Debug, Clone)]
pub struct ScoreParams {
    pub symbol: String,
    pub spy_symbol: String,
    pub qqq_symbol: String,
    pub liquidity_floor_usd: f64,
}

/// Score one symbol from a read-consistent view of the store.
///
/// Pure with respect to the store contents and `now_ms`: identical inputs
/// produce identical results.
pub fn score_symbol(
    store: &CandleStore,
    params: &ScoreParams,
    now_ms: i64,
) -> Result<ScoreResult, AppError> {
    let symbol = params.symbol.as_str();
    for tf in [Timeframe::M5, Timeframe::M15] {
        if store.is_quarantined(symbol, tf) {
            return Err(AppError::InternalInvariantViolation(format!(
                "{symbol} {tf} series quarantined"
            )));
        }
    }

    let s5 = store.snapshot_series(symbol, Timeframe::M5);
    let s15 = store.snapshot_series(symbol, Timeframe::M15);
    let ind5 = indicators::compute(Timeframe::M5, &s5);
    let ind15 = indicators::compute(Timeframe::M15, &s15);
    let (tape, tape_audit) =
        tape::compute_tape(store, symbol, &params.spy_symbol, &params.qqq_symbol, now_ms);

    let mut freshness = BTreeMap::new();
    for tf in Timeframe::ALL {
        freshness.insert(tf.as_str(), store.freshness(symbol, tf, now_ms));
    }
    let missing_tfs: Vec<&'static str> = [Timeframe::M5, Timeframe::M15]
        .into_iter()
        .filter(|tf| freshness[tf.as_str()] != Freshness::Fresh)
        .map(|tf| tf.as_str())
        .collect();

    let mut audit: Vec<AuditEntry> = Vec::new();

    // ── State machine ────────────────────────────────────────────────
    let (state, rule) = evaluate_state(&s5, &s15, &ind5, &ind15);
    audit.push(AuditEntry {
        gate: "state_machine".to_string(),
        passed: true,
        detail: rule,
    });

    // ── Hard gates ───────────────────────────────────────────────────
    let anchor = ind5.vwap_session.or(ind5.ema20);
    let structure_intact_15m = match (s15.last(), ind15.prior_low20) {
        (Some(last), Some(prior_low)) => Some(last.c >= prior_low),
        _ => None,
    };
    let ctx = GateContext {
        last_close_5m: s5.last().map(|c| c.c),
        anchor,
        atr14_5m: ind5.atr14,
        rel_vol_5m: ind5.rel_vol,
        dollar_vol20_5m: ind5.dollar_vol20,
        liquidity_floor_usd: params.liquidity_floor_usd,
        structure_intact_15m,
        risk_off: tape.risk_off,
        rs_30m: tape.rs_30m,
        fresh_5m: freshness["5m"],
        fresh_15m: freshness["15m"],
    };
    let checks = run_gates(&ctx);
    for check in &checks {
        audit.push(AuditEntry {
            gate: check.name.to_string(),
            passed: check.passed(),
            detail: check.detail.clone(),
        });
    }
    for line in tape_audit {
        audit.push(AuditEntry {
            gate: "tape_context".to_string(),
            passed: true,
            detail: line,
        });
    }

    // ── Gap guard ────────────────────────────────────────────────────
    let gaps_5m = store.gap_count(symbol, Timeframe::M5);
    let gaps_15m = store.gap_count(symbol, Timeframe::M15);
    let gaps_ok = gaps_5m <= MAX_GAPS && gaps_15m <= MAX_GAPS;
    audit.push(AuditEntry {
        gate: "gap_check".to_string(),
        passed: gaps_ok,
        detail: format!("5m={gaps_5m} 15m={gaps_15m} (max {MAX_GAPS})"),
    });

    // ── Decision mapping ─────────────────────────────────────────────
    let liquidity_failed = checks
        .iter()
        .any(|c| c.name == "liquidity" && c.outcome == GateOutcome::Fail);
    let freshness_passed = checks.iter().any(|c| c.name == "freshness" && c.passed());
    let exit_confirmed = state == MomoState::Failed
        || (state == MomoState::Failing && ind5.obv_slope.is_some_and(|s| s <= 0.0));

    let signal = if liquidity_failed {
        Signal::Ignore
    } else if !freshness_passed {
        Signal::Hold
    } else if !gaps_ok {
        Signal::Hold
    } else if exit_confirmed {
        Signal::Exit
    } else if state == MomoState::Active && checks.iter().all(|c| c.passed()) {
        Signal::Buy
    } else {
        Signal::Hold
    };

    // ── Risk outputs ─────────────────────────────────────────────────
    let mut levels = support_resistance(&ind15);
    let mut confidence = 0.0;
    let mut size_hint = 0.0;
    if signal == Signal::Buy {
        // BUY implies the no-chase gate passed, so these are present.
        let c5 = ctx.last_close_5m.expect("close present on BUY");
        let anchor = anchor.expect("anchor present on BUY");
        let atr5 = ind5.atr14.expect("atr present on BUY");

        levels.entry_range = Some(if c5 > anchor + 0.5 * atr5 {
            PriceRange {
                lo: c5 - 0.25 * atr5,
                hi: c5 + 0.25 * atr5,
            }
        } else {
            PriceRange {
                lo: anchor,
                hi: anchor + 0.5 * atr5,
            }
        });
        levels.stop = Some(anchor - 1.2 * atr5);
        if let Some(atr15) = ind15.atr14 {
            levels.targets = vec![c5 + atr15, c5 + 2.0 * atr15];
        }

        let inputs_bonus = |flag: bool| if flag { 0.1_f64 } else { 0.0_f64 };
        let trend_up_15m = match (s15.last(), ind15.ema20) {
            (Some(last), Some(ema20)) => last.c > ema20,
            _ => false,
        };
        let obv_confirm = ind5.obv_slope.is_some_and(|s| s > 0.0)
            && ind15.obv_slope.is_some_and(|s| s >= 0.0);
        confidence = (0.5
            + inputs_bonus(obv_confirm)
            + inputs_bonus(tape.rs_30m.is_some_and(|rs| rs > 0.0))
            + inputs_bonus(tape.risk_off == Some(false))
            + inputs_bonus(trend_up_15m)
            + inputs_bonus(ind5.rel_vol.is_some_and(|rv| rv >= 1.0)))
        .clamp(0.0, 1.0);
        let dist = (c5 - anchor).abs();
        size_hint = confidence * (1.0 - (dist / (2.0 * atr5)).min(1.0));
    }

    let (last_price, last_price_ts, last_price_source) = last_price(store, symbol);

    Ok(ScoreResult {
        ticker: symbol.to_string(),
        signal,
        state,
        confidence,
        size_hint,
        levels,
        freshness,
        missing_tfs,
        tape,
        audit,
        last_price,
        last_price_ts,
        last_price_source,
    })
}

/// Run the machine: infer the previous state from the snapshot one 5m close
/// back (history-independent rows only), then apply the full ordered table.
fn evaluate_state(
    s5: &[crate::model::Candle],
    s15: &[crate::model::Candle],
    ind5: &IndicatorSet,
    ind15: &IndicatorSet,
) -> (MomoState, String) {
    let (Some(last5), Some(last15)) = (s5.last(), s15.last()) else {
        return (MomoState::NoMomo, "no closed 5m/15m data".to_string());
    };
    let Some(inputs) = TransitionInputs::derive(ind5, ind15, last5, last15) else {
        return (MomoState::NoMomo, "missing indicator inputs on 5m/15m".to_string());
    };

    let prev = if s5.len() >= 2 {
        let prev5 = &s5[..s5.len() - 1];
        let prev_ind5 = indicators::compute(Timeframe::M5, prev5);
        TransitionInputs::derive(&prev_ind5, ind15, prev5.last().expect("non-empty"), last15)
            .map(|i| stateless_state(&i))
            .unwrap_or(MomoState::NoMomo)
    } else {
        MomoState::NoMomo
    };

    next_state(prev, &inputs)
}

/// Support/resistance bands from 15m prior levels and ATR (computed for
/// every result, not only BUY).
fn support_resistance(ind15: &IndicatorSet) -> Levels {
    let mut levels = Levels::default();
    if let Some(prior_low) = ind15.prior_low20 {
        levels.support_range = Some(match ind15.atr14 {
            Some(atr) => PriceRange {
                lo: prior_low,
                hi: prior_low + 0.25 * atr,
            },
            None => PriceRange {
                lo: prior_low,
                hi: prior_low,
            },
        });
    }
    if let Some(prior_high) = ind15.prior_high20 {
        match ind15.atr14 {
            Some(atr) => {
                levels.resistance_1 = Some(PriceRange {
                    lo: prior_high - 0.25 * atr,
                    hi: prior_high + 0.25 * atr,
                });
                levels.resistance_2 = Some(PriceRange {
                    lo: prior_high + 0.75 * atr,
                    hi: prior_high + 1.25 * atr,
                });
            }
            None => {
                levels.resistance_1 = Some(PriceRange {
                    lo: prior_high,
                    hi: prior_high,
                });
            }
        }
    }
    levels
}

/// Most recent known price, preferring the live 1m bar, with its timestamp
/// and provenance.
fn last_price(store: &CandleStore, symbol: &str) -> (Option<f64>, Option<String>, Option<&'static str>) {
    let iso = |ts: i64| {
        chrono::DateTime::from_timestamp_millis(ts).map(|dt| dt.to_rfc3339())
    };
    if let Some(forming) = store.forming(symbol, Timeframe::M1) {
        return (Some(forming.c), iso(forming.start_ts), Some("ws_1m"));
    }
    for (tf, source) in [
        (Timeframe::M1, "ws_1m_hist"),
        (Timeframe::M5, "ws_5m_hist"),
        (Timeframe::M15, "rest_15m_hist"),
    ] {
        if let Some(last) = store.latest(symbol, tf, 1).pop() {
            return (Some(last.c), iso(last.start_ts), Some(source));
        }
    }
    (None, None, None)
}
