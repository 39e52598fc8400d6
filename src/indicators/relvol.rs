use crate::model::Candle;

const DAY_MS: i64 = 86_400_000;

/// Relative volume of the latest closed bar.
///
/// Preferred denominator: mean volume of the last `window` bars sharing the
/// same slot-of-day (session-aligned comparison). Falls back to the mean of
/// the trailing `window` bars — excluding the measured bar when at least
/// `window + 1` closes exist, including it at exactly `window` closes so a
/// minimal series still yields a value.
pub fn rel_vol(candles: &[Candle], window: usize) -> Option<f64> {
    if window == 0 || candles.len() < window {
        return None;
    }
    let last = candles.last()?;
    let slot = last.start_ts.rem_euclid(DAY_MS);

    let prior = &candles[..candles.len() - 1];
    let same_slot: Vec<f64> = prior
        .iter()
        .rev()
        .filter(|c| c.start_ts.rem_euclid(DAY_MS) == slot)
        .take(window)
        .map(|c| c.volume)
        .collect();

    let denom = if same_slot.len() >= window {
        same_slot.iter().sum::<f64>() / same_slot.len() as f64
    } else if prior.len() >= window {
        let tail = &prior[prior.len() - window..];
        tail.iter().map(|c| c.volume).sum::<f64>() / window as f64
    } else {
        let tail = &candles[candles.len() - window..];
        tail.iter().map(|c| c.volume).sum::<f64>() / window as f64
    };

    if denom <= 0.0 {
        return None;
    }
    Some(last.volume / denom)
}

/// Mean close×volume over the last `window` closed bars.
pub fn avg_dollar_volume(candles: &[Candle], window: usize) -> Option<f64> {
    if window == 0 || candles.len() < window {
        return None;
    }
    let tail = &candles[candles.len() - window..];
    Some(tail.iter().map(|c| c.c * c.volume).sum::<f64>() / window as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandleSource, SessionTag, Timeframe};

    fn candle(start_ts: i64, c: f64, volume: f64) -> Candle {
        Candle {
            symbol: "TSLA.US".to_string(),
            timeframe: Timeframe::M5,
            start_ts,
            o: c,
            h: c,
            l: c,
            c,
            volume,
            session: SessionTag::Rth,
            is_closed: true,
            source: CandleSource::Agg,
        }
    }

    #[test]
    fn fallback_mean_excludes_measured_bar() {
        let t0 = 1_700_000_100_000;
        let mut candles: Vec<Candle> = (0..20).map(|i| candle(t0 + i * 300_000, 10.0, 100.0)).collect();
        candles.push(candle(t0 + 20 * 300_000, 10.0, 300.0));
        let rv = rel_vol(&candles, 20).unwrap();
        assert!((rv - 3.0).abs() < 1e-9);
    }

    #[test]
    fn exactly_window_bars_still_yields_value() {
        let t0 = 1_700_000_100_000;
        let candles: Vec<Candle> = (0..20).map(|i| candle(t0 + i * 300_000, 10.0, 100.0)).collect();
        let rv = rel_vol(&candles, 20).unwrap();
        assert!((rv - 1.0).abs() < 1e-9);
    }

    #[test]
    fn same_slot_of_day_preferred_when_enough_days() {
        let t0 = 1_700_000_100_000;
        let mut candles = Vec::new();
        // 20 days of history at the same slot, volume 100 …
        for d in 0..20 {
            candles.push(candle(t0 + d * DAY_MS, 10.0, 100.0));
            // … plus a noisy neighbouring slot at volume 900
            candles.push(candle(t0 + d * DAY_MS + 300_000, 10.0, 900.0));
        }
        // measured bar on the quiet slot
        candles.push(candle(t0 + 20 * DAY_MS, 10.0, 200.0));
        let rv = rel_vol(&candles, 20).unwrap();
        // compared against the 100-volume slot mean, not the mixed tail
        assert!((rv - 2.0).abs() < 1e-9);
    }

    #[test]
    fn missing_below_window() {
        let t0 = 1_700_000_100_000;
        let candles: Vec<Candle> = (0..10).map(|i| candle(t0 + i * 300_000, 10.0, 100.0)).collect();
        assert!(rel_vol(&candles, 20).is_none());
    }

    #[test]
    fn dollar_volume_mean() {
        let t0 = 1_700_000_100_000;
        let candles: Vec<Candle> = (0..20).map(|i| candle(t0 + i * 300_000, 10.0, 1_000.0)).collect();
        let dv = avg_dollar_volume(&candles, 20).unwrap();
        assert!((dv - 10_000.0).abs() < 1e-9);
        assert!(avg_dollar_volume(&candles[..19], 20).is_none());
    }
}
