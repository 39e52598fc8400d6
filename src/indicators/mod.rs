pub mod atr;
pub mod ema;
pub mod levels;
pub mod obv;
pub mod relvol;
pub mod vwap;

use serde::Serialize;

use crate::model::{Candle, Timeframe};

/// RelVol below this on 5m flags the bar as thin.
pub const THIN_RELVOL_THRESHOLD: f64 = 0.5;

const OBV_SLOPE_WINDOW: usize = 10;
const PRIOR_LEVEL_WINDOW: usize = 20;
const RELVOL_WINDOW: usize = 20;
const DOLLAR_VOL_WINDOW: usize = 20;

/// Snapshot of the named indicators for one (symbol, timeframe).
/// `None` means insufficient history — never zero-filled.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSet {
    pub ema9: Option<f64>,
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub ema200: Option<f64>,
    pub vwap_session: Option<f64>,
    pub prior_high20: Option<f64>,
    pub prior_low20: Option<f64>,
    pub atr14: Option<f64>,
    pub obv_slope: Option<f64>,
    pub rel_vol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thin_volume: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dollar_vol20: Option<f64>,
}

/// Compute the fixed indicator set for one timeframe from its closed series.
/// Pure function of the input candles.
pub fn compute(tf: Timeframe, candles: &[Candle]) -> IndicatorSet {
    let closes: Vec<f64> = candles.iter().map(|c| c.c).collect();
    let mut set = IndicatorSet::default();

    if matches!(tf, Timeframe::M1 | Timeframe::M5 | Timeframe::M15) {
        set.ema9 = ema::ema_last(&closes, 9);
        set.ema20 = ema::ema_last(&closes, 20);
    }
    if matches!(tf, Timeframe::M15 | Timeframe::H1 | Timeframe::D1) {
        set.ema50 = ema::ema_last(&closes, 50);
        set.ema200 = ema::ema_last(&closes, 200);
    }

    if tf == Timeframe::M5 {
        set.vwap_session = vwap::session_vwap(candles);
        set.dollar_vol20 = relvol::avg_dollar_volume(candles, DOLLAR_VOL_WINDOW);
    }

    if matches!(tf, Timeframe::M5 | Timeframe::M15) {
        let levels = levels::prior_high_low(candles, PRIOR_LEVEL_WINDOW);
        set.prior_high20 = levels.map(|(h, _)| h);
        set.prior_low20 = levels.map(|(_, l)| l);
        set.atr14 = atr::atr_last(candles, 14);
        set.obv_slope = obv::obv_slope(candles, OBV_SLOPE_WINDOW);
        set.rel_vol = relvol::rel_vol(candles, RELVOL_WINDOW);
    }

    if tf == Timeframe::M5 {
        set.thin_volume = set.rel_vol.map(|rv| rv < THIN_RELVOL_THRESHOLD);
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandleSource, SessionTag};

    fn series(tf: Timeframe, n: usize) -> Vec<Candle> {
        let t0 = 1_700_000_100_000;
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.2;
                Candle {
                    symbol: "TSLA.US".to_string(),
                    timeframe: tf,
                    start_ts: t0 + i as i64 * tf.ms(),
                    o: c - 0.1,
                    h: c + 0.4,
                    l: c - 0.4,
                    c,
                    volume: 1_000.0,
                    session: SessionTag::Rth,
                    is_closed: true,
                    source: CandleSource::Agg,
                }
            })
            .collect()
    }

    #[test]
    fn five_minute_set_is_fully_populated_with_history() {
        let set = compute(Timeframe::M5, &series(Timeframe::M5, 40));
        assert!(set.ema9.is_some());
        assert!(set.ema20.is_some());
        assert!(set.ema50.is_none(), "EMA50 is not a 5m indicator");
        assert!(set.vwap_session.is_some());
        assert!(set.prior_high20.is_some());
        assert!(set.atr14.is_some());
        assert!(set.obv_slope.is_some());
        assert!(set.rel_vol.is_some());
        assert_eq!(set.thin_volume, Some(false));
        assert!(set.dollar_vol20.is_some());
    }

    #[test]
    fn short_series_yields_missing_not_zero() {
        let set = compute(Timeframe::M5, &series(Timeframe::M5, 5));
        assert!(set.ema9.is_none());
        assert!(set.ema20.is_none());
        assert!(set.atr14.is_none());
        assert!(set.prior_high20.is_none());
        assert!(set.rel_vol.is_none());
    }

    #[test]
    fn hourly_set_carries_long_emas_only() {
        let set = compute(Timeframe::H1, &series(Timeframe::H1, 210));
        assert!(set.ema9.is_none());
        assert!(set.ema50.is_some());
        assert!(set.ema200.is_some());
        assert!(set.atr14.is_none());
        assert!(set.vwap_session.is_none());
    }

    #[test]
    fn deterministic_for_identical_input() {
        let candles = series(Timeframe::M5, 40);
        let a = compute(Timeframe::M5, &candles);
        let b = compute(Timeframe::M5, &candles);
        assert_eq!(format!("{a:?}"), format!("{b:?}"));
    }
}
