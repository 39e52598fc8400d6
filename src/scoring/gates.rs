use crate::store::Freshness;

/// Minimum 5m RelVol for the liquidity gate.
pub const MIN_RELVOL: f64 = 0.5;
/// RS_30m required to permit BUY while the tape is risk-off (+0.5%).
pub const RISK_OFF_RS_THRESHOLD: f64 = 0.005;
/// No-chase distance limit in ATR14(5m) multiples.
pub const NO_CHASE_ATR_MULTIPLE: f64 = 2.0;

/// One hard-gate evaluation.
///
/// `Skip` means a required input was missing: the gate cannot pass (BUY stays
/// blocked) but it is not an affirmative failure either — missing liquidity
/// inputs are insufficient history, not an IGNORE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone)]
pub struct GateCheck {
    pub name: &'static str,
    pub outcome: GateOutcome,
    pub detail: String,
}

impl GateCheck {
    pub fn passed(&self) -> bool {
        self.outcome == GateOutcome::Pass
    }
}

/// Everything the gates need, pre-extracted from the indicator sets, tape,
/// and store freshness at request time.
#[derive(Debug, Clone)]
pub struct GateContext {
    pub last_close_5m: Option<f64>,
    pub anchor: Option<f64>,
    pub atr14_5m: Option<f64>,
    pub rel_vol_5m: Option<f64>,
    pub dollar_vol20_5m: Option<f64>,
    pub liquidity_floor_usd: f64,
    pub structure_intact_15m: Option<bool>,
    pub risk_off: Option<bool>,
    pub rs_30m: Option<f64>,
    pub fresh_5m: Freshness,
    pub fresh_15m: Freshness,
}

/// Evaluate all five hard gates independently. Every gate contributes one
/// audit entry regardless of outcome.
pub fn run_gates(ctx: &GateContext) -> Vec<GateCheck> {
    vec![
        liquidity_gate(ctx),
        structure_gate(ctx),
        no_chase_gate(ctx),
        tape_gate(ctx),
        freshness_gate(ctx),
    ]
}

fn liquidity_gate(ctx: &GateContext) -> GateCheck {
    let (Some(rel_vol), Some(dollar_vol)) = (ctx.rel_vol_5m, ctx.dollar_vol20_5m) else {
        return GateCheck {
            name: "liquidity",
            outcome: GateOutcome::Skip,
            detail: "skipped: insufficient 5m history for relvol/dollar-volume".to_string(),
        };
    };
    if rel_vol < MIN_RELVOL {
        return GateCheck {
            name: "liquidity",
            outcome: GateOutcome::Fail,
            detail: format!("relvol {rel_vol:.3} < {MIN_RELVOL}"),
        };
    }
    if dollar_vol < ctx.liquidity_floor_usd {
        return GateCheck {
            name: "liquidity",
            outcome: GateOutcome::Fail,
            detail: format!(
                "avg 5m dollar-volume {dollar_vol:.0} < floor {:.0}",
                ctx.liquidity_floor_usd
            ),
        };
    }
    GateCheck {
        name: "liquidity",
        outcome: GateOutcome::Pass,
        detail: format!("relvol {rel_vol:.3}, dollar-volume {dollar_vol:.0}"),
    }
}

fn structure_gate(ctx: &GateContext) -> GateCheck {
    match ctx.structure_intact_15m {
        Some(true) => GateCheck {
            name: "structure",
            outcome: GateOutcome::Pass,
            detail: "15m close holding above swing low".to_string(),
        },
        Some(false) => GateCheck {
            name: "structure",
            outcome: GateOutcome::Fail,
            detail: "15m close below swing low / prior low".to_string(),
        },
        None => GateCheck {
            name: "structure",
            outcome: GateOutcome::Skip,
            detail: "skipped: insufficient 15m history".to_string(),
        },
    }
}

fn no_chase_gate(ctx: &GateContext) -> GateCheck {
    let (Some(c5), Some(anchor), Some(atr)) = (ctx.last_close_5m, ctx.anchor, ctx.atr14_5m) else {
        return GateCheck {
            name: "no_chase",
            outcome: GateOutcome::Skip,
            detail: "skipped: missing close/anchor/atr".to_string(),
        };
    };
    let distance = (c5 - anchor).abs();
    let limit = NO_CHASE_ATR_MULTIPLE * atr;
    if distance > limit {
        GateCheck {
            name: "no_chase",
            outcome: GateOutcome::Fail,
            detail: format!("distance {distance:.4} > {NO_CHASE_ATR_MULTIPLE}x ATR ({limit:.4})"),
        }
    } else {
        GateCheck {
            name: "no_chase",
            outcome: GateOutcome::Pass,
            detail: format!("distance {distance:.4} <= {NO_CHASE_ATR_MULTIPLE}x ATR ({limit:.4})"),
        }
    }
}

fn tape_gate(ctx: &GateContext) -> GateCheck {
    match ctx.risk_off {
        None => GateCheck {
            name: "tape",
            outcome: GateOutcome::Fail,
            detail: "risk regime unknown (reference data stale or missing)".to_string(),
        },
        Some(false) => GateCheck {
            name: "tape",
            outcome: GateOutcome::Pass,
            detail: "tape not risk-off".to_string(),
        },
        Some(true) => match ctx.rs_30m {
            Some(rs) if rs >= RISK_OFF_RS_THRESHOLD => GateCheck {
                name: "tape",
                outcome: GateOutcome::Pass,
                detail: format!("risk_off but rs_30m {rs:.4} >= {RISK_OFF_RS_THRESHOLD}"),
            },
            Some(rs) => GateCheck {
                name: "tape",
                outcome: GateOutcome::Fail,
                detail: format!("risk_off, rs insufficient ({rs:.4} < {RISK_OFF_RS_THRESHOLD})"),
            },
            None => GateCheck {
                name: "tape",
                outcome: GateOutcome::Fail,
                detail: "risk_off and rs_30m missing".to_string(),
            },
        },
    }
}

fn freshness_gate(ctx: &GateContext) -> GateCheck {
    if ctx.fresh_5m == Freshness::Fresh && ctx.fresh_15m == Freshness::Fresh {
        GateCheck {
            name: "freshness",
            outcome: GateOutcome::Pass,
            detail: "5m and 15m fresh".to_string(),
        }
    } else {
        GateCheck {
            name: "freshness",
            outcome: GateOutcome::Fail,
            detail: format!("5m {:?}, 15m {:?}", ctx.fresh_5m, ctx.fresh_15m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> GateContext {
        GateContext {
            last_close_5m: Some(100.0),
            anchor: Some(99.0),
            atr14_5m: Some(0.8),
            rel_vol_5m: Some(1.2),
            dollar_vol20_5m: Some(5_000_000.0),
            liquidity_floor_usd: 1_000_000.0,
            structure_intact_15m: Some(true),
            risk_off: Some(false),
            rs_30m: Some(0.002),
            fresh_5m: Freshness::Fresh,
            fresh_15m: Freshness::Fresh,
        }
    }

    fn by_name<'a>(checks: &'a [GateCheck], name: &str) -> &'a GateCheck {
        checks.iter().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn all_pass_on_healthy_context() {
        let checks = run_gates(&ctx());
        assert_eq!(checks.len(), 5);
        assert!(checks.iter().all(|c| c.passed()));
    }

    #[test]
    fn thin_relvol_fails_liquidity() {
        let mut c = ctx();
        c.rel_vol_5m = Some(0.3);
        let checks = run_gates(&c);
        assert_eq!(by_name(&checks, "liquidity").outcome, GateOutcome::Fail);
    }

    #[test]
    fn dollar_volume_floor_fails_liquidity() {
        let mut c = ctx();
        c.dollar_vol20_5m = Some(200_000.0);
        let checks = run_gates(&c);
        let gate = by_name(&checks, "liquidity");
        assert_eq!(gate.outcome, GateOutcome::Fail);
        assert!(gate.detail.contains("floor"));
    }

    #[test]
    fn missing_liquidity_inputs_skip_not_fail() {
        let mut c = ctx();
        c.rel_vol_5m = None;
        let checks = run_gates(&c);
        assert_eq!(by_name(&checks, "liquidity").outcome, GateOutcome::Skip);
    }

    #[test]
    fn chase_distance_blocks() {
        let mut c = ctx();
        c.last_close_5m = Some(102.0);
        c.anchor = Some(98.0);
        c.atr14_5m = Some(0.8); // limit 1.6, distance 4.0
        let checks = run_gates(&c);
        assert_eq!(by_name(&checks, "no_chase").outcome, GateOutcome::Fail);
    }

    #[test]
    fn risk_off_requires_strong_rs() {
        let mut c = ctx();
        c.risk_off = Some(true);
        c.rs_30m = Some(0.001);
        assert_eq!(by_name(&run_gates(&c), "tape").outcome, GateOutcome::Fail);
        c.rs_30m = Some(0.012);
        assert_eq!(by_name(&run_gates(&c), "tape").outcome, GateOutcome::Pass);
    }

    #[test]
    fn unknown_regime_fails_tape() {
        let mut c = ctx();
        c.risk_off = None;
        assert_eq!(by_name(&run_gates(&c), "tape").outcome, GateOutcome::Fail);
    }

    #[test]
    fn stale_timeframe_fails_freshness() {
        let mut c = ctx();
        c.fresh_15m = Freshness::Stale;
        let checks = run_gates(&c);
        let gate = by_name(&checks, "freshness");
        assert_eq!(gate.outcome, GateOutcome::Fail);
        assert!(gate.detail.contains("15m"));
    }
}
