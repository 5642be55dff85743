//! Configuration management for the portfolio allocator.
//!
//! Loads settings from an optional config file layered with environment
//! variables. Every knob is resolved into a typed struct once at startup;
//! stages never probe for optional attributes at runtime.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::allocation::AllocationMode;

/// Default config file stem (`allocator.toml`, `allocator.yaml`, ...).
pub const DEFAULT_CONFIG_NAME: &str = "allocator";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Weight computation and target shape
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    /// Drawdown softening and dust floor
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Cost, fill-rate, liquidity and turnover attenuation
    #[serde(default)]
    pub cost: CostConfig,
    /// Rate limiting, backoff and bias caps
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    /// Micro-signal bias weights
    #[serde(default)]
    pub signals: SignalsConfig,
    /// Guard limits
    #[serde(default)]
    pub guards: GuardsConfig,
    /// Fee-tier tilt
    #[serde(default)]
    pub fees: FeesConfig,
    /// High-water-mark snapshot persistence
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// Total budget in USD
    #[serde(default = "default_budget_usd")]
    pub budget_usd: f64,
    /// Allocation mode: "manual" | "inverse_vol" | "risk_parity"
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Configured weights for manual mode
    #[serde(default)]
    pub manual_weights: BTreeMap<String, f64>,
    /// Lower weight bound per symbol (0.0-1.0)
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
    /// Upper weight bound per symbol (0.0-1.0)
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
    /// EMA factor applied to consecutive weight vectors (0.0-1.0]
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    /// Risk parity iteration cap
    #[serde(default = "default_rp_max_iterations")]
    pub risk_parity_max_iterations: usize,
    /// Risk parity convergence tolerance on (max-min)/max of contributions
    #[serde(default = "default_rp_tolerance")]
    pub risk_parity_tolerance: f64,
    /// Volatility floor
    #[serde(default = "default_vol_eps")]
    pub vol_eps: f64,
    /// Minimum order levels per side
    #[serde(default = "default_levels_min")]
    pub levels_per_side_min: u32,
    /// Maximum order levels per side
    #[serde(default = "default_levels_max")]
    pub levels_per_side_max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Fraction of the budget removed at full softening (0.0-1.0)
    #[serde(default = "default_pnl_sensitivity")]
    pub pnl_sensitivity: f64,
    /// Drawdown at which softening saturates (0.0-1.0, 0 = instant)
    #[serde(default = "default_drawdown_soft_cap")]
    pub drawdown_soft_cap: f64,
    /// Targets below this USD amount are zeroed
    #[serde(default)]
    pub budget_min_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "default_fee_bps")]
    pub fee_bps_default: f64,
    #[serde(default = "default_slippage_base")]
    pub slippage_bps_base: f64,
    /// Slippage growth per 1000 USD of target
    #[serde(default = "default_slippage_k")]
    pub slippage_k_bps_per_kusd: f64,
    #[serde(default = "default_cost_sensitivity")]
    pub cost_sensitivity: f64,
    /// Use half the observed spread as a slippage lower bound
    #[serde(default = "default_true")]
    pub use_shadow_spread: bool,
    /// Double the slippage slope on thin or unknown volume
    #[serde(default = "default_true")]
    pub use_shadow_volume: bool,
    #[serde(default = "default_min_volume_usd")]
    pub min_volume_usd: f64,
    #[serde(default = "default_max_slippage_cap")]
    pub max_slippage_bps_cap: f64,

    // Fill-rate attenuation
    /// Fill rate below which attenuation starts
    #[serde(default = "default_fill_rate_floor")]
    pub fill_rate_floor: f64,
    #[serde(default = "default_fill_rate_sensitivity")]
    pub fill_rate_sensitivity: f64,
    /// Lowest attenuation the fill-rate stage may produce
    #[serde(default)]
    pub fill_rate_min_attenuation: f64,

    // Liquidity attenuation
    /// Book depth considered sufficient (0 disables)
    #[serde(default)]
    pub liquidity_depth_usd_target: f64,
    #[serde(default)]
    pub liquidity_sensitivity: f64,
    #[serde(default)]
    pub liquidity_min_floor: f64,

    // Turnover attenuation
    #[serde(default)]
    pub turnover_sensitivity: f64,
    #[serde(default)]
    pub turnover_floor: f64,

    /// Per-symbol overrides; unset fields fall back to the globals above
    #[serde(default)]
    pub per_symbol: BTreeMap<String, CostOverride>,
}

/// Per-symbol cost override. `None` means "use the global value".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostOverride {
    pub fee_bps: Option<f64>,
    pub slippage_bps_base: Option<f64>,
    pub slippage_k_bps_per_kusd: Option<f64>,
    pub cost_sensitivity: Option<f64>,
    pub use_shadow_spread: Option<bool>,
    pub use_shadow_volume: Option<bool>,
    pub min_volume_usd: Option<f64>,
    pub max_slippage_bps_cap: Option<f64>,
    pub fill_rate_floor: Option<f64>,
    pub fill_rate_sensitivity: Option<f64>,
    pub fill_rate_min_attenuation: Option<f64>,
    pub liquidity_depth_usd_target: Option<f64>,
    pub liquidity_sensitivity: Option<f64>,
    pub liquidity_min_floor: Option<f64>,
    pub turnover_sensitivity: Option<f64>,
    pub turnover_floor: Option<f64>,
}

/// Effective cost parameters for one symbol, with ranges already sanitised.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCost {
    pub fee_bps: f64,
    pub slippage_bps_base: f64,
    pub slippage_k_bps_per_kusd: f64,
    pub cost_sensitivity: f64,
    pub use_shadow_spread: bool,
    pub use_shadow_volume: bool,
    pub min_volume_usd: f64,
    pub max_slippage_bps_cap: f64,
    pub fill_rate_floor: f64,
    pub fill_rate_sensitivity: f64,
    pub fill_rate_min_attenuation: f64,
    pub liquidity_depth_usd_target: f64,
    pub liquidity_sensitivity: f64,
    pub liquidity_min_floor: f64,
    pub turnover_sensitivity: f64,
    pub turnover_floor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Cap on the color bias ratio (0.0-1.0)
    #[serde(default = "default_bias_cap")]
    pub bias_cap: f64,
    /// Cap on the fee-tier up-scale (clamped to 0.10 when used)
    #[serde(default = "default_fee_bias_cap")]
    pub fee_bias_cap: f64,
    /// Per-tick change allowed as a fraction of the current target
    #[serde(default = "default_max_delta_ratio")]
    pub max_delta_ratio: f64,
    /// Per-tick change floor in USD
    #[serde(default)]
    pub max_delta_abs_usd: f64,
    /// Cap multipliers indexed by backoff level, each in (0.0, 1.0]
    #[serde(default = "default_backoff_steps")]
    pub backoff_steps: Vec<f64>,
    /// Ticks between backoff level decreases
    #[serde(default = "default_backoff_cooldown")]
    pub backoff_cooldown_ticks: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalWeights {
    #[serde(default)]
    pub imbalance: f64,
    #[serde(default)]
    pub micro_tilt: f64,
    #[serde(default)]
    pub sigma_regime: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    #[serde(default)]
    pub weights: SignalWeights,
    /// Largest bias adjustment as a fraction of |delta|
    #[serde(default = "default_impact_cap")]
    pub impact_cap_ratio: f64,
    /// Ascending sigma thresholds delimiting volatility regimes
    #[serde(default)]
    pub sigma_bands: Vec<f64>,
    /// Regime label -> bias direction (-1, 0, 1)
    #[serde(default)]
    pub regime_bias_map: BTreeMap<String, i8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardsConfig {
    #[serde(default)]
    pub pos_skew: PosSkewConfig,
    #[serde(default)]
    pub intraday_caps: IntradayCapsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosSkewConfig {
    /// Absolute position limit per symbol (0 disables)
    #[serde(default)]
    pub per_symbol_abs_limit: f64,
    /// Absolute aggregate position limit per color (0 disables)
    #[serde(default)]
    pub per_color_abs_limit: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntradayCapsConfig {
    /// Daily loss that stops allocation (0 disables)
    #[serde(default)]
    pub daily_pnl_stop: f64,
    /// Daily turnover cap in USD (0 disables)
    #[serde(default)]
    pub daily_turnover_cap: f64,
    /// Daily volume cap (0 disables)
    #[serde(default)]
    pub daily_vol_cap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesConfig {
    /// Enable the fee-tier tilt stage
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tilt only when the next tier is at most this far away (USD)
    #[serde(default = "default_distance_threshold")]
    pub distance_usd_threshold: f64,
    /// Tilt only when the effective fee improves by at least this much
    #[serde(default = "default_min_improvement_bps")]
    pub min_improvement_bps: f64,
    /// Assumed maker share of flow
    #[serde(default = "default_maker_share")]
    pub maker_share: f64,
    /// Assumed taker share of flow
    #[serde(default = "default_taker_share")]
    pub taker_share: f64,
    /// Fee tiers ordered by turnover threshold
    #[serde(default = "default_fee_tiers")]
    pub tiers: Vec<FeeTierConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTierConfig {
    pub level: u32,
    /// Rolling turnover (USD) needed to reach this tier
    pub min_turnover_usd: f64,
    pub maker_bps: f64,
    pub taker_bps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Path of the HWM snapshot file
    #[serde(default = "default_snapshot_path")]
    pub path: String,
    /// Save the snapshot every N allocation cycles (0 = only on shutdown)
    #[serde(default = "default_save_every")]
    pub save_every_cycles: u64,
}

// Default value functions
fn default_budget_usd() -> f64 {
    10_000.0
}

fn default_mode() -> String {
    "manual".to_string()
}

fn default_min_weight() -> f64 {
    0.02
}

fn default_max_weight() -> f64 {
    0.5
}

fn default_ema_alpha() -> f64 {
    0.3
}

fn default_rp_max_iterations() -> usize {
    50
}

fn default_rp_tolerance() -> f64 {
    1e-6
}

fn default_vol_eps() -> f64 {
    1e-9
}

fn default_levels_min() -> u32 {
    1
}

fn default_levels_max() -> u32 {
    10
}

fn default_pnl_sensitivity() -> f64 {
    0.5
}

fn default_drawdown_soft_cap() -> f64 {
    0.10
}

fn default_fee_bps() -> f64 {
    1.0
}

fn default_slippage_base() -> f64 {
    0.5
}

fn default_slippage_k() -> f64 {
    0.1
}

fn default_cost_sensitivity() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_min_volume_usd() -> f64 {
    1_000.0
}

fn default_max_slippage_cap() -> f64 {
    50.0
}

fn default_fill_rate_floor() -> f64 {
    0.7
}

fn default_fill_rate_sensitivity() -> f64 {
    0.5
}

fn default_bias_cap() -> f64 {
    0.10
}

fn default_fee_bias_cap() -> f64 {
    0.05
}

fn default_max_delta_ratio() -> f64 {
    0.15
}

fn default_backoff_steps() -> Vec<f64> {
    vec![1.0, 0.7, 0.5]
}

fn default_backoff_cooldown() -> u32 {
    10 // hysteresis ticks between level decreases
}

fn default_impact_cap() -> f64 {
    0.10
}

fn default_distance_threshold() -> f64 {
    25_000.0
}

fn default_min_improvement_bps() -> f64 {
    0.2
}

fn default_maker_share() -> f64 {
    0.8
}

fn default_taker_share() -> f64 {
    0.2
}

fn default_fee_tiers() -> Vec<FeeTierConfig> {
    vec![
        FeeTierConfig {
            level: 0,
            min_turnover_usd: 0.0,
            maker_bps: 10.0,
            taker_bps: 10.0,
        },
        FeeTierConfig {
            level: 1,
            min_turnover_usd: 1_000_000.0,
            maker_bps: 6.75,
            taker_bps: 8.0,
        },
        FeeTierConfig {
            level: 2,
            min_turnover_usd: 5_000_000.0,
            maker_bps: 6.5,
            taker_bps: 7.75,
        },
        FeeTierConfig {
            level: 3,
            min_turnover_usd: 25_000_000.0,
            maker_bps: 6.25,
            taker_bps: 7.5,
        },
    ]
}

fn default_snapshot_path() -> String {
    "state/allocator_snapshot.json".to_string()
}

fn default_save_every() -> u64 {
    10
}

impl Config {
    /// Load configuration from the default file and environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_NAME)
    }

    /// Load configuration from `name` (file stem or path) and environment.
    ///
    /// Environment keys use the `ALLOC` prefix and `__` as separator, e.g.
    /// `ALLOC__PORTFOLIO__BUDGET_USD=5000`.
    pub fn load_from(name: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(config::Environment::default().separator("__").prefix("ALLOC"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let p = &self.portfolio;
        p.mode
            .parse::<AllocationMode>()
            .with_context(|| format!("portfolio.mode '{}' is invalid", p.mode))?;

        anyhow::ensure!(
            (0.0..=1.0).contains(&p.min_weight)
                && (0.0..=1.0).contains(&p.max_weight)
                && p.min_weight <= p.max_weight,
            "min_weight/max_weight must satisfy 0 <= min <= max <= 1"
        );
        anyhow::ensure!(p.budget_usd >= 0.0, "budget_usd must be >= 0");
        anyhow::ensure!(
            p.ema_alpha > 0.0 && p.ema_alpha <= 1.0,
            "ema_alpha must be in (0, 1]"
        );
        anyhow::ensure!(
            p.levels_per_side_min >= 1 && p.levels_per_side_min <= p.levels_per_side_max,
            "levels_per_side_min must be >= 1 and <= levels_per_side_max"
        );
        anyhow::ensure!(p.vol_eps > 0.0, "vol_eps must be > 0");

        let b = &self.budget;
        anyhow::ensure!(
            (0.0..=1.0).contains(&b.pnl_sensitivity),
            "pnl_sensitivity must be between 0 and 1"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&b.drawdown_soft_cap),
            "drawdown_soft_cap must be between 0 and 1"
        );
        anyhow::ensure!(b.budget_min_usd >= 0.0, "budget_min_usd must be >= 0");

        let s = &self.smoothing;
        anyhow::ensure!(
            (0.0..=1.0).contains(&s.bias_cap),
            "smoothing.bias_cap must be between 0 and 1"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&s.fee_bias_cap),
            "smoothing.fee_bias_cap must be between 0 and 1"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&s.max_delta_ratio),
            "smoothing.max_delta_ratio must be between 0 and 1"
        );
        anyhow::ensure!(
            s.max_delta_abs_usd >= 0.0,
            "smoothing.max_delta_abs_usd must be >= 0"
        );
        anyhow::ensure!(
            !s.backoff_steps.is_empty() && s.backoff_steps.iter().all(|v| *v > 0.0 && *v <= 1.0),
            "smoothing.backoff_steps must be a non-empty list of values in (0, 1]"
        );

        anyhow::ensure!(
            (0.0..=1.0).contains(&self.signals.impact_cap_ratio),
            "signals.impact_cap_ratio must be between 0 and 1"
        );
        anyhow::ensure!(
            self.signals.sigma_bands.windows(2).all(|w| w[0] <= w[1]),
            "signals.sigma_bands must be ascending"
        );

        let g = &self.guards;
        anyhow::ensure!(
            g.pos_skew.per_symbol_abs_limit >= 0.0 && g.pos_skew.per_color_abs_limit >= 0.0,
            "position skew limits must be >= 0"
        );
        anyhow::ensure!(
            g.intraday_caps.daily_pnl_stop >= 0.0
                && g.intraday_caps.daily_turnover_cap >= 0.0
                && g.intraday_caps.daily_vol_cap >= 0.0,
            "intraday caps must be >= 0"
        );

        let f = &self.fees;
        anyhow::ensure!(
            f.distance_usd_threshold >= 0.0,
            "fees.distance_usd_threshold must be >= 0"
        );
        anyhow::ensure!(
            (0.0..=1000.0).contains(&f.min_improvement_bps),
            "fees.min_improvement_bps must be between 0 and 1000"
        );
        anyhow::ensure!(
            f.tiers
                .windows(2)
                .all(|w| w[0].min_turnover_usd < w[1].min_turnover_usd),
            "fees.tiers must be ordered by increasing min_turnover_usd"
        );

        Ok(())
    }
}

impl CostConfig {
    /// Resolve the effective parameters for `symbol`.
    ///
    /// Per-symbol overrides win over globals; ratios are clamped to [0, 1]
    /// and magnitudes floored at 0.
    pub fn resolve(&self, symbol: &str) -> ResolvedCost {
        let ov = self.per_symbol.get(symbol).cloned().unwrap_or_default();
        let unit = |v: f64| v.clamp(0.0, 1.0);
        let non_neg = |v: f64| v.max(0.0);

        ResolvedCost {
            fee_bps: non_neg(ov.fee_bps.unwrap_or(self.fee_bps_default)),
            slippage_bps_base: non_neg(ov.slippage_bps_base.unwrap_or(self.slippage_bps_base)),
            slippage_k_bps_per_kusd: non_neg(
                ov.slippage_k_bps_per_kusd
                    .unwrap_or(self.slippage_k_bps_per_kusd),
            ),
            cost_sensitivity: unit(ov.cost_sensitivity.unwrap_or(self.cost_sensitivity)),
            use_shadow_spread: ov.use_shadow_spread.unwrap_or(self.use_shadow_spread),
            use_shadow_volume: ov.use_shadow_volume.unwrap_or(self.use_shadow_volume),
            min_volume_usd: non_neg(ov.min_volume_usd.unwrap_or(self.min_volume_usd)),
            max_slippage_bps_cap: non_neg(
                ov.max_slippage_bps_cap.unwrap_or(self.max_slippage_bps_cap),
            ),
            fill_rate_floor: unit(ov.fill_rate_floor.unwrap_or(self.fill_rate_floor)),
            fill_rate_sensitivity: unit(
                ov.fill_rate_sensitivity
                    .unwrap_or(self.fill_rate_sensitivity),
            ),
            fill_rate_min_attenuation: unit(
                ov.fill_rate_min_attenuation
                    .unwrap_or(self.fill_rate_min_attenuation),
            ),
            liquidity_depth_usd_target: non_neg(
                ov.liquidity_depth_usd_target
                    .unwrap_or(self.liquidity_depth_usd_target),
            ),
            liquidity_sensitivity: unit(
                ov.liquidity_sensitivity
                    .unwrap_or(self.liquidity_sensitivity),
            ),
            liquidity_min_floor: unit(ov.liquidity_min_floor.unwrap_or(self.liquidity_min_floor)),
            turnover_sensitivity: unit(
                ov.turnover_sensitivity.unwrap_or(self.turnover_sensitivity),
            ),
            turnover_floor: unit(ov.turnover_floor.unwrap_or(self.turnover_floor)),
        }
    }

    /// A cost model that never attenuates. Useful for isolating other stages.
    pub fn neutral() -> Self {
        Self {
            fee_bps_default: 0.0,
            slippage_bps_base: 0.0,
            slippage_k_bps_per_kusd: 0.0,
            cost_sensitivity: 0.0,
            fill_rate_sensitivity: 0.0,
            ..Self::default()
        }
    }
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            budget_usd: default_budget_usd(),
            mode: default_mode(),
            manual_weights: BTreeMap::new(),
            min_weight: default_min_weight(),
            max_weight: default_max_weight(),
            ema_alpha: default_ema_alpha(),
            risk_parity_max_iterations: default_rp_max_iterations(),
            risk_parity_tolerance: default_rp_tolerance(),
            vol_eps: default_vol_eps(),
            levels_per_side_min: default_levels_min(),
            levels_per_side_max: default_levels_max(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            pnl_sensitivity: default_pnl_sensitivity(),
            drawdown_soft_cap: default_drawdown_soft_cap(),
            budget_min_usd: 0.0,
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            fee_bps_default: default_fee_bps(),
            slippage_bps_base: default_slippage_base(),
            slippage_k_bps_per_kusd: default_slippage_k(),
            cost_sensitivity: default_cost_sensitivity(),
            use_shadow_spread: true,
            use_shadow_volume: true,
            min_volume_usd: default_min_volume_usd(),
            max_slippage_bps_cap: default_max_slippage_cap(),
            fill_rate_floor: default_fill_rate_floor(),
            fill_rate_sensitivity: default_fill_rate_sensitivity(),
            fill_rate_min_attenuation: 0.0,
            liquidity_depth_usd_target: 0.0,
            liquidity_sensitivity: 0.0,
            liquidity_min_floor: 0.0,
            turnover_sensitivity: 0.0,
            turnover_floor: 0.0,
            per_symbol: BTreeMap::new(),
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            bias_cap: default_bias_cap(),
            fee_bias_cap: default_fee_bias_cap(),
            max_delta_ratio: default_max_delta_ratio(),
            max_delta_abs_usd: 0.0,
            backoff_steps: default_backoff_steps(),
            backoff_cooldown_ticks: default_backoff_cooldown(),
        }
    }
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            impact_cap_ratio: default_impact_cap(),
            sigma_bands: Vec::new(),
            regime_bias_map: BTreeMap::new(),
        }
    }
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            distance_usd_threshold: default_distance_threshold(),
            min_improvement_bps: default_min_improvement_bps(),
            maker_share: default_maker_share(),
            taker_share: default_taker_share(),
            tiers: default_fee_tiers(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
            save_every_cycles: default_save_every(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut config = Config::default();
        config.portfolio.mode = "momentum".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_weight_bounds_rejected() {
        let mut config = Config::default();
        config.portfolio.min_weight = 0.6;
        config.portfolio.max_weight = 0.4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_backoff_steps_rejected() {
        let mut config = Config::default();
        config.smoothing.backoff_steps.clear();
        assert!(config.validate().is_err());

        config.smoothing.backoff_steps = vec![1.0, 0.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_prefers_per_symbol_override() {
        let mut cost = CostConfig::default();
        cost.per_symbol.insert(
            "ETHUSDT".to_string(),
            CostOverride {
                fee_bps: Some(2.5),
                fill_rate_floor: Some(1.7),
                ..CostOverride::default()
            },
        );

        let eth = cost.resolve("ETHUSDT");
        assert_eq!(eth.fee_bps, 2.5);
        // Ratios are clamped into [0, 1]
        assert_eq!(eth.fill_rate_floor, 1.0);
        assert_eq!(eth.slippage_bps_base, cost.slippage_bps_base);

        let btc = cost.resolve("BTCUSDT");
        assert_eq!(btc.fee_bps, cost.fee_bps_default);
    }

    #[test]
    fn test_deserialize_partial_section_uses_defaults() {
        let json = r#"{"portfolio": {"budget_usd": 2500.0, "mode": "risk_parity"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.portfolio.budget_usd, 2500.0);
        assert_eq!(config.portfolio.max_weight, 0.5);
        assert_eq!(config.smoothing.backoff_steps, vec![1.0, 0.7, 0.5]);
        assert_eq!(config.smoothing.backoff_cooldown_ticks, 10);
        assert!(config.validate().is_ok());
    }
}
