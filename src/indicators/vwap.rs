use crate::model::{Candle, SessionTag};

/// Consecutive RTH bars separated by more than this belong to different
/// sessions (overnight / weekend break).
const SESSION_BREAK_MS: i64 = 7_200_000;

/// Session VWAP: Σ(typical·volume) / Σ volume over the RTH-tagged candles of
/// the current trading session, `typical = (h+l+c)/3`.
///
/// The session is the trailing run of RTH candles ending at the most recent
/// RTH candle, broken by any gap wider than two hours. `None` when no RTH
/// candles are present or no volume traded in the session.
pub fn session_vwap(candles: &[Candle]) -> Option<f64> {
    let last_rth = candles.iter().rposition(|c| c.session == SessionTag::Rth)?;

    let mut pv_sum = 0.0;
    let mut v_sum = 0.0;
    let mut prev_start: Option<i64> = None;
    for c in candles[..=last_rth].iter().rev() {
        if c.session != SessionTag::Rth {
            break;
        }
        if let Some(prev) = prev_start {
            if prev - c.start_ts > SESSION_BREAK_MS {
                break;
            }
        }
        prev_start = Some(c.start_ts);
        if c.volume > 0.0 {
            pv_sum += (c.h + c.l + c.c) / 3.0 * c.volume;
            v_sum += c.volume;
        }
    }
    if v_sum <= 0.0 {
        return None;
    }
    Some(pv_sum / v_sum)
}
