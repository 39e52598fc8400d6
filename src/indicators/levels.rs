use crate::model::Candle;

/// Max high / min low over the last `window` closed candles, excluding the
/// most recent bar (the one being evaluated against the levels).
/// Needs `window + 1` closes.
pub fn prior_high_low(candles: &[Candle], window: usize) -> Option<(f64, f64)> {
    if window == 0 || candles.len() < window + 1 {
        return None;
    }
    let lookback = &candles[candles.len() - window - 1..candles.len() - 1];
    let high = lookback.iter().fold(f64::MIN, |acc, c| acc.max(c.h));
    let low = lookback.iter().fold(f64::MAX, |acc, c| acc.min(c.l));
    Some((high, low))
}
