use serde::Serialize;

use crate::indicators::IndicatorSet;
use crate::model::Candle;

/// Momentum machine states, recomputed per request from store data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomoState {
    NoMomo,
    Building,
    Active,
    Pause,
    Failing,
    Failed,
}

/// Boolean transition inputs over closed 5m/15m data.
#[derive(Debug, Clone, Copy)]
pub struct TransitionInputs {
    pub trend_up_5m: bool,
    pub trend_up_15m: bool,
    pub structure_intact_15m: bool,
    pub above_vwap: bool,
    pub obv_confirm: bool,
    pub breakdown_5m: bool,
    pub breakdown_15m: bool,
}

impl TransitionInputs {
    /// Derive the inputs from the indicator sets and last closes.
    /// `None` when a required indicator is missing — the machine then sits
    /// in NO_MOMO rather than guessing.
    pub fn derive(
        ind5: &IndicatorSet,
        ind15: &IndicatorSet,
        last_5m: &Candle,
        last_15m: &Candle,
    ) -> Option<TransitionInputs> {
        let c5 = last_5m.c;
        let c15 = last_15m.c;
        let ema9_5 = ind5.ema9?;
        let ema20_5 = ind5.ema20?;
        let ema20_15 = ind15.ema20?;
        let prior_low_5 = ind5.prior_low20?;
        // min(low, last 20) excluding the evaluated bar — PriorLow20 is that
        // swing-low proxy on 15m.
        let swing_low_15 = ind15.prior_low20?;
        let obv5 = ind5.obv_slope?;
        let obv15 = ind15.obv_slope?;
        let anchor = ind5.vwap_session.or(ind5.ema20)?;

        Some(TransitionInputs {
            trend_up_5m: c5 > ema9_5 && ema9_5 > ema20_5,
            trend_up_15m: c15 > ema20_15,
            structure_intact_15m: c15 >= swing_low_15,
            above_vwap: c5 > anchor,
            obv_confirm: obv5 > 0.0 && obv15 >= 0.0,
            breakdown_5m: c5 < ema20_5 && c5 < prior_low_5,
            breakdown_15m: c15 < ema20_15 || c15 < swing_low_15,
        })
    }
}

/// Ordered transition table — first matching row wins. Returns the next
/// state and a description of the rule that fired, for the audit trail.
pub fn next_state(prev: MomoState, i: &TransitionInputs) -> (MomoState, String) {
    if i.breakdown_15m && i.breakdown_5m {
        return (MomoState::Failed, "breakdown on 15m and 5m".to_string());
    }
    if i.breakdown_5m && !i.breakdown_15m {
        return (MomoState::Failing, "breakdown on 5m, 15m holding".to_string());
    }
    if prev == MomoState::Failing && i.trend_up_5m && !i.breakdown_5m {
        return (MomoState::Building, "5m trend reclaimed after failing".to_string());
    }
    if i.trend_up_15m && i.trend_up_5m && i.structure_intact_15m && i.above_vwap && i.obv_confirm {
        return (MomoState::Active, "trend, structure, anchor and flow aligned".to_string());
    }
    if i.trend_up_15m && (i.trend_up_5m ^ i.above_vwap) {
        return (MomoState::Building, "15m trend with partial 5m confirmation".to_string());
    }
    if prev == MomoState::Active && !i.trend_up_5m && !i.breakdown_5m {
        return (MomoState::Pause, "5m trend lost without breakdown".to_string());
    }
    if prev == MomoState::Pause && i.trend_up_5m && i.above_vwap {
        return (MomoState::Active, "5m trend and anchor reclaimed from pause".to_string());
    }
    (MomoState::NoMomo, "no momentum conditions met".to_string())
}

/// The history-independent rows only (those with From = any, plus the
/// default). Used to infer the previous state from the prior 5m close.
pub fn stateless_state(i: &TransitionInputs) -> MomoState {
    next_state(MomoState::NoMomo, i).0
}
