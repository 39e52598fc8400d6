use crate::model::Candle;

/// Wilder's ATR over closed candles: TR = max(h−l, |h−prev_c|, |l−prev_c|),
/// seeded as the SMA of the first `period` TRs, then
/// `ATR_i = (ATR_{i−1}·(N−1) + TR_i) / N`. Needs `period + 1` closes.
pub fn atr_last(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let trs: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let prev_c = w[0].c;
            let cur = &w[1];
            (cur.h - cur.l)
                .max((cur.h - prev_c).abs())
                .max((cur.l - prev_c).abs())
        })
        .collect();

    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    for tr in &trs[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(atr)
}
