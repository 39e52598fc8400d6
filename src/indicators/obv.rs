use crate::model::Candle;

/// On-balance volume series: `OBV_i = OBV_{i−1} + sign(c_i − c_{i−1}) · v_i`.
fn obv_series(candles: &[Candle]) -> Vec<f64> {
    if candles.len() < 2 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(candles.len());
    out.push(0.0);
    for w in candles.windows(2) {
        let prev = out.last().copied().unwrap_or(0.0);
        let delta = match w[1].c.partial_cmp(&w[0].c) {
            Some(std::cmp::Ordering::Greater) => w[1].volume,
            Some(std::cmp::Ordering::Less) => -w[1].volume,
            _ => 0.0,
        };
        out.push(prev + delta);
    }
    out
}

/// Least-squares slope of `y` against index 0..n.
fn linear_slope(y: &[f64]) -> f64 {
    let n = y.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let sum_x = (nf - 1.0) * nf / 2.0;
    let sum_x2 = (nf - 1.0) * nf * (2.0 * nf - 1.0) / 6.0;
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = y.iter().enumerate().map(|(i, v)| i as f64 * v).sum();
    let denom = nf * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return 0.0;
    }
    (nf * sum_xy - sum_x * sum_y) / denom
}

/// Scale-free OBV slope: least-squares slope of the last `window` OBV points
/// divided by the mean |OBV| over the same window. `None` until the OBV
/// series covers the window.
pub fn obv_slope(candles: &[Candle], window: usize) -> Option<f64> {
    let series = obv_series(candles);
    if window < 2 || series.len() < window {
        return None;
    }
    let tail = &series[series.len() - window..];
    let slope = linear_slope(tail);
    let mean_abs = tail.iter().map(|v| v.abs()).sum::<f64>() / window as f64;
    if mean_abs == 0.0 {
        // flat OBV: slope is zero by construction
        return Some(0.0);
    }
    Some(slope / mean_abs)
}
