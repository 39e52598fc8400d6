use serde::Serialize;

use crate::indicators::ema;
use crate::model::{Candle, Timeframe};
use crate::store::{CandleStore, Freshness};

/// RS_30m spans six closed 5m bars (~30 minutes).
const RS_BARS: usize = 6;
/// Lower-lows check runs over the last three closed 15m bars.
const LOWER_LOW_BARS: usize = 3;

/// Market regime derived from the two reference instruments.
/// `risk_off = None` means the references were stale or missing and the
/// regime is unknown; scoring treats that as a failed tape-gate precondition.
#[derive(Debug, Clone, Serialize)]
pub struct TapeSnapshot {
    pub risk_off: Option<bool>,
    pub rs_30m: Option<f64>,
    pub computed_at_ms: i64,
}

/// One risk-posture verdict for a single reference instrument.
fn risk_flag(series: &[Candle], symbol: &str, audit: &mut Vec<String>) -> Option<bool> {
    let closes: Vec<f64> = series.iter().map(|c| c.c).collect();
    let Some(ema20) = ema::ema_last(&closes, 20) else {
        audit.push(format!("{symbol}: missing EMA20(15m)"));
        return None;
    };
    if series.len() < LOWER_LOW_BARS {
        audit.push(format!(
            "{symbol}: not enough 15m candles for lower-lows (have={})",
            series.len()
        ));
        return None;
    }

    let close_now = closes[closes.len() - 1];
    let below_ema20 = close_now < ema20;

    let tail = &series[series.len() - LOWER_LOW_BARS..];
    let lower_lows = tail.windows(2).all(|w| w[1].l < w[0].l);

    audit.push(format!(
        "{symbol}: close<ema20={below_ema20} lower_lows={lower_lows}"
    ));
    Some(below_ema20 && lower_lows)
}

/// Percent return over the last `RS_BARS` closed 5m bars.
fn pct_return_5m(series: &[Candle]) -> Option<f64> {
    if series.len() < RS_BARS + 1 {
        return None;
    }
    let close_now = series[series.len() - 1].c;
    let close_then = series[series.len() - 1 - RS_BARS].c;
    if close_then == 0.0 {
        return None;
    }
    Some(close_now / close_then - 1.0)
}

/// Derive the tape snapshot from the reference instruments' 15m series
/// (risk regime) and the primary/QQQ 5m series (relative strength).
pub fn compute_tape(
    store: &CandleStore,
    primary: &str,
    spy: &str,
    qqq: &str,
    now_ms: i64,
) -> (TapeSnapshot, Vec<String>) {
    let mut audit = Vec::new();

    let rs_30m = {
        let primary_5m = store.snapshot_series(primary, Timeframe::M5);
        let qqq_5m = store.snapshot_series(qqq, Timeframe::M5);
        match (pct_return_5m(&primary_5m), pct_return_5m(&qqq_5m)) {
            (Some(rt), Some(rq)) => {
                let rs = rt - rq;
                audit.push(format!("rs_30m: {rs:.6}"));
                Some(rs)
            }
            _ => {
                audit.push("rs_30m: insufficient 5m history".to_string());
                None
            }
        }
    };

    let mut risk_off = None;
    let spy_fresh = store.freshness(spy, Timeframe::M15, now_ms);
    let qqq_fresh = store.freshness(qqq, Timeframe::M15, now_ms);
    if spy_fresh != Freshness::Fresh || qqq_fresh != Freshness::Fresh {
        audit.push(format!(
            "risk_off: unknown ({spy} 15m {spy_fresh:?}, {qqq} 15m {qqq_fresh:?})"
        ));
    } else {
        let spy_15m = store.snapshot_series(spy, Timeframe::M15);
        let qqq_15m = store.snapshot_series(qqq, Timeframe::M15);
        let spy_flag = risk_flag(&spy_15m, spy, &mut audit);
        let qqq_flag = risk_flag(&qqq_15m, qqq, &mut audit);
        risk_off = match (spy_flag, qqq_flag) {
            (Some(a), Some(b)) => Some(a && b),
            _ => None,
        };
    }

    (
        TapeSnapshot {
            risk_off,
            rs_30m,
            computed_at_ms: now_ms,
        },
        audit,
    )
}
