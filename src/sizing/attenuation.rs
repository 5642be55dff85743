//! Per-symbol attenuation stages.
//!
//! Applied in a fixed order, each multiplying the running target:
//! 1. cost (fee + modelled slippage)
//! 2. fill rate
//! 3. book liquidity
//! 4. turnover
//!
//! Missing readings fall back to the value that leaves the stage neutral
//! (fill rate 1.0) or to the documented default (depth 0, turnover 0).

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CostConfig, ResolvedCost};
use crate::effects::{gauge, Effect};
use crate::utils::clamp_unit;

/// Slippage calibration published by an offline fitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibratedCost {
    /// Effective slope in bps per 1000 USD
    #[serde(default)]
    pub k_eff: Option<f64>,
    /// Effective slippage cap in bps
    #[serde(default)]
    pub cap_bps: Option<f64>,
}

/// External readings for one symbol. Every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SymbolReadings {
    pub spread_bps: Option<f64>,
    pub volume_usd: Option<f64>,
    pub calibration: Option<CalibratedCost>,
    /// Fill-rate EWMA in [0, 1]
    pub fill_rate: Option<f64>,
    /// Resting depth near the touch, USD
    pub depth_usd: Option<f64>,
    /// Turnover EWMA, USD
    pub turnover_usd: Option<f64>,
}

/// Cost model output for one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub slippage_bps: f64,
    pub cost_bps: f64,
    pub attenuation: f64,
}

/// Drop non-finite readings, logging the symbol and field.
fn valid(symbol: &str, field: &'static str, value: Option<f64>) -> Option<f64> {
    match value {
        Some(v) if v.is_finite() => Some(v.max(0.0)),
        Some(v) => {
            warn!(symbol, field, value = v, "Ignoring non-finite reading");
            None
        }
        None => None,
    }
}

/// Estimate trading cost for `target_usd` and the resulting attenuation.
pub fn estimate_cost(
    symbol: &str,
    params: &ResolvedCost,
    target_usd: f64,
    readings: &SymbolReadings,
) -> CostEstimate {
    let mut k = params.slippage_k_bps_per_kusd;
    let mut cap = params.max_slippage_bps_cap;
    if let Some(cal) = readings.calibration {
        if let Some(v) = valid(symbol, "k_eff", cal.k_eff) {
            k = v;
        }
        if let Some(v) = valid(symbol, "cap_bps", cal.cap_bps) {
            cap = v;
        }
    }

    let mut slippage_bps = params.slippage_bps_base;
    if params.use_shadow_spread {
        if let Some(spread) = valid(symbol, "spread_bps", readings.spread_bps) {
            slippage_bps = slippage_bps.max(spread / 2.0);
        }
    }

    let thin_book = match valid(symbol, "volume_usd", readings.volume_usd) {
        Some(vol) => vol < params.min_volume_usd,
        None => true,
    };
    let k_eff = if params.use_shadow_volume && thin_book {
        k * 2.0
    } else {
        k
    };

    slippage_bps += k_eff * (target_usd.max(0.0) / 1000.0);
    let slippage_bps = slippage_bps.min(cap).max(0.0);

    let cost_bps = (params.fee_bps + slippage_bps).max(0.0);
    let ratio = (cost_bps / 100.0).min(1.0);
    let attenuation = clamp_unit(1.0 - params.cost_sensitivity * ratio);

    CostEstimate {
        slippage_bps,
        cost_bps,
        attenuation,
    }
}

/// Fill-rate attenuation: `1 − sens × max(0, floor − r)`, floored.
pub fn fill_rate_attenuation(params: &ResolvedCost, fill_rate: Option<f64>) -> f64 {
    let r = fill_rate.map(clamp_unit).unwrap_or(1.0);
    let deficit = (params.fill_rate_floor - r).max(0.0);
    clamp_unit(1.0 - params.fill_rate_sensitivity * deficit).max(params.fill_rate_min_attenuation)
}

/// Liquidity attenuation from book depth relative to the configured target.
pub fn liquidity_attenuation(params: &ResolvedCost, depth_usd: Option<f64>) -> f64 {
    let floor = params.liquidity_min_floor;
    let raw = if params.liquidity_depth_usd_target > 0.0 {
        clamp_unit(depth_usd.unwrap_or(0.0) / params.liquidity_depth_usd_target)
    } else {
        1.0
    };
    let factor = raw.max(floor);
    (1.0 - params.liquidity_sensitivity * (1.0 - factor))
        .max(floor)
        .min(1.0)
}

/// Turnover attenuation: turnover relative to the symbol's budget share.
pub fn turnover_attenuation(params: &ResolvedCost, turnover_usd: Option<f64>, budget_share_usd: f64) -> f64 {
    let floor = params.turnover_floor;
    let denom = budget_share_usd.max(1.0);
    let ratio = (turnover_usd.unwrap_or(0.0) / denom).max(0.0);
    let raw = clamp_unit(1.0 - ratio);
    (1.0 - params.turnover_sensitivity * (1.0 - raw))
        .max(floor)
        .min(1.0)
}

/// Runs the four attenuation stages in order.
#[derive(Debug, Clone)]
pub struct AttenuationStages {
    config: CostConfig,
}

impl AttenuationStages {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    /// Attenuate `target_usd` for `symbol`.
    ///
    /// `budget_share_usd` is the symbol's slice of the available budget and
    /// scales the turnover ratio.
    pub fn apply(
        &self,
        symbol: &str,
        target_usd: f64,
        readings: &SymbolReadings,
        budget_share_usd: f64,
    ) -> (f64, Vec<Effect>) {
        let params = self.config.resolve(symbol);
        let mut effects = Vec::with_capacity(6);
        let mut t = target_usd;

        let cost = estimate_cost(symbol, &params, t, readings);
        t *= cost.attenuation;
        effects.push(Effect::symbol_gauge(gauge::ESTIMATED_COST_BPS, symbol, cost.cost_bps));
        effects.push(Effect::symbol_gauge(gauge::COST_SLIPPAGE_BPS, symbol, cost.slippage_bps));
        effects.push(Effect::symbol_gauge(gauge::COST_ATTENUATION, symbol, cost.attenuation));

        let fill_rate = valid(symbol, "fill_rate", readings.fill_rate);
        if fill_rate.is_none() {
            debug!(symbol, "No fill-rate reading, assuming 1.0");
        }
        let fill = fill_rate_attenuation(&params, fill_rate);
        t *= fill;
        effects.push(Effect::symbol_gauge(gauge::FILLRATE_ATTENUATION, symbol, fill));

        let liquidity = liquidity_attenuation(&params, valid(symbol, "depth_usd", readings.depth_usd));
        t *= liquidity;
        effects.push(Effect::symbol_gauge(gauge::LIQUIDITY_FACTOR, symbol, liquidity));

        let turnover = turnover_attenuation(
            &params,
            valid(symbol, "turnover_usd", readings.turnover_usd),
            budget_share_usd,
        );
        t *= turnover;
        effects.push(Effect::symbol_gauge(gauge::TURNOVER_FACTOR, symbol, turnover));

        debug!(
            symbol,
            input = target_usd,
            cost_bps = cost.cost_bps,
            cost = cost.attenuation,
            fill,
            liquidity,
            turnover,
            output = t,
            "Attenuated target"
        );
        (t.max(0.0), effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostOverride;

    fn params() -> ResolvedCost {
        CostConfig::default().resolve("BTCUSDT")
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // =========================================================================
    // Cost
    // =========================================================================

    #[test]
    fn test_cost_default_thin_book_doubles_slope() {
        // base 0.5, no volume → k doubled to 0.2; 1000 USD → +0.2
        let est = estimate_cost("BTCUSDT", &params(), 1000.0, &SymbolReadings::default());
        assert!(close(est.slippage_bps, 0.7));
        assert!(close(est.cost_bps, 1.7));
        assert!(close(est.attenuation, 1.0 - 0.5 * 0.017));
    }

    #[test]
    fn test_cost_uses_half_spread_and_deep_volume() {
        let readings = SymbolReadings {
            spread_bps: Some(4.0),
            volume_usd: Some(1_000_000.0),
            ..SymbolReadings::default()
        };
        let est = estimate_cost("BTCUSDT", &params(), 5000.0, &readings);
        // max(0.5, 2.0) + 0.1 × 5
        assert!(close(est.slippage_bps, 2.5));
    }

    #[test]
    fn test_slippage_capped_before_fee() {
        let mut p = params();
        p.max_slippage_bps_cap = 10.0;
        p.fee_bps = 5.0;
        let est = estimate_cost("BTCUSDT", &p, 1_000_000.0, &SymbolReadings::default());
        assert_eq!(est.slippage_bps, 10.0);
        assert_eq!(est.cost_bps, 15.0);
    }

    #[test]
    fn test_cost_attenuation_saturates_at_100_bps() {
        let mut p = params();
        p.fee_bps = 250.0;
        p.cost_sensitivity = 0.8;
        let est = estimate_cost("BTCUSDT", &p, 0.0, &SymbolReadings::default());
        assert!(close(est.attenuation, 0.2));
    }

    #[test]
    fn test_calibration_overrides_slope_and_cap() {
        let readings = SymbolReadings {
            volume_usd: Some(1_000_000.0),
            calibration: Some(CalibratedCost {
                k_eff: Some(1.0),
                cap_bps: Some(3.0),
            }),
            ..SymbolReadings::default()
        };
        let est = estimate_cost("BTCUSDT", &params(), 2000.0, &readings);
        // 0.5 + 1.0 × 2 = 2.5 < cap 3
        assert!(close(est.slippage_bps, 2.5));

        let est = estimate_cost("BTCUSDT", &params(), 10_000.0, &readings);
        assert_eq!(est.slippage_bps, 3.0);
    }

    #[test]
    fn test_non_finite_spread_ignored() {
        let readings = SymbolReadings {
            spread_bps: Some(f64::NAN),
            volume_usd: Some(f64::INFINITY),
            ..SymbolReadings::default()
        };
        let est = estimate_cost("BTCUSDT", &params(), 0.0, &readings);
        assert!(close(est.slippage_bps, 0.5));
    }

    // =========================================================================
    // Fill rate / liquidity / turnover
    // =========================================================================

    #[test]
    fn test_fill_rate_attenuation() {
        let p = params();
        assert_eq!(fill_rate_attenuation(&p, None), 1.0);
        assert_eq!(fill_rate_attenuation(&p, Some(0.9)), 1.0);
        // floor 0.7, r 0.3 → deficit 0.4 → 1 − 0.5 × 0.4
        assert!(close(fill_rate_attenuation(&p, Some(0.3)), 0.8));

        let mut floored = p.clone();
        floored.fill_rate_min_attenuation = 0.9;
        assert_eq!(fill_rate_attenuation(&floored, Some(0.0)), 0.9);
    }

    #[test]
    fn test_liquidity_attenuation() {
        let mut p = params();
        assert_eq!(liquidity_attenuation(&p, Some(10.0)), 1.0);

        p.liquidity_depth_usd_target = 10_000.0;
        p.liquidity_sensitivity = 0.5;
        p.liquidity_min_floor = 0.2;
        // depth 2500 → raw 0.25 → 1 − 0.5 × 0.75
        assert!(close(liquidity_attenuation(&p, Some(2_500.0)), 0.625));
        // missing depth → raw 0 → factor floor 0.2 → 1 − 0.5 × 0.8
        assert!(close(liquidity_attenuation(&p, None), 0.6));
    }

    #[test]
    fn test_turnover_attenuation() {
        let mut p = params();
        assert_eq!(turnover_attenuation(&p, Some(1e9), 500.0), 1.0);

        p.turnover_sensitivity = 0.6;
        p.turnover_floor = 0.5;
        assert!(close(turnover_attenuation(&p, Some(250.0), 500.0), 0.7));
        assert_eq!(turnover_attenuation(&p, Some(5_000.0), 500.0), 0.5);
        assert_eq!(turnover_attenuation(&p, None, 500.0), 1.0);
    }

    #[test]
    fn test_stages_multiply_in_order_and_report() {
        let mut config = CostConfig::neutral();
        config.per_symbol.insert(
            "ETHUSDT".to_string(),
            CostOverride {
                fill_rate_sensitivity: Some(1.0),
                ..CostOverride::default()
            },
        );
        let stages = AttenuationStages::new(config);
        let readings = SymbolReadings {
            fill_rate: Some(0.5),
            ..SymbolReadings::default()
        };

        let (btc, _) = stages.apply("BTCUSDT", 1000.0, &readings, 500.0);
        assert_eq!(btc, 1000.0);

        let (eth, effects) = stages.apply("ETHUSDT", 1000.0, &readings, 500.0);
        assert!(close(eth, 800.0));
        let names: Vec<&str> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Gauge { name, .. } => Some(*name),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![
                gauge::ESTIMATED_COST_BPS,
                gauge::COST_SLIPPAGE_BPS,
                gauge::COST_ATTENUATION,
                gauge::FILLRATE_ATTENUATION,
                gauge::LIQUIDITY_FACTOR,
                gauge::TURNOVER_FACTOR,
            ]
        );
    }
}
