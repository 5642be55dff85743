//! Portfolio allocator: one allocation cycle end to end.
//!
//! ```text
//! stats → weights (+EMA) → guards → drawdown softening → attenuation
//!       → freeze/color bias → micro bias → rate limit → fee tilt → final clamp
//! ```
//!
//! Every per-symbol loop walks symbols in sorted order, so identical inputs
//! produce identical targets regardless of how the inputs were assembled.
//! All mutable state lives in [`AllocatorState`], owned by the allocator;
//! only the high-water mark is shared (see [`HighWaterMark`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::allocation::{smooth_weights, AllocationMode, SymbolStats, VolCache, WeightComputer, Weights};
use crate::config::Config;
use crate::effects::{gauge, Effect, EffectSink};
use crate::error::AllocatorResult;
use crate::persistence::{AllocatorSnapshot, SnapshotStore};
use crate::risk::{
    CapsTelemetry, DrawdownSoftener, GuardDecision, GuardGateway, HighWaterMark, IntradayCapsGuard,
    PositionSkewGuard, SoftFactor,
};
use crate::sizing::{
    AttenuationStages, BackoffState, CalibratedCost, FeeSchedule, FeeTierTilt, FinalClampStage,
    MicroBiasInjector, MicroSignals, MicroSnapshot, RateLimiter, SymbolReadings,
};
use crate::utils::round6;

/// Sized target for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTarget {
    pub target_usd: f64,
    pub max_levels: u32,
}

/// Everything the cycle reads besides weights. All fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleInputs {
    /// Account equity, drives the high-water mark
    pub equity_usd: Option<f64>,
    /// Budget currently available; defaults to the configured budget
    pub budget_available_usd: Option<f64>,
    /// Signed position per symbol
    pub positions: BTreeMap<String, f64>,
    /// Color (side group) per symbol
    pub colors: BTreeMap<String, String>,
    pub spread_bps: BTreeMap<String, f64>,
    pub volume_usd: BTreeMap<String, f64>,
    pub calibration: BTreeMap<String, CalibratedCost>,
    pub fill_rate: BTreeMap<String, f64>,
    pub depth_usd: BTreeMap<String, f64>,
    pub turnover_usd: BTreeMap<String, f64>,
    /// Portfolio-wide rolling turnover used for fee-tier proximity
    pub turnover_total_usd: Option<f64>,
    pub micro: BTreeMap<String, MicroSnapshot>,
}

impl CycleInputs {
    fn readings(&self, symbol: &str) -> SymbolReadings {
        SymbolReadings {
            spread_bps: self.spread_bps.get(symbol).copied(),
            volume_usd: self.volume_usd.get(symbol).copied(),
            calibration: self.calibration.get(symbol).copied(),
            fill_rate: self.fill_rate.get(symbol).copied(),
            depth_usd: self.depth_usd.get(symbol).copied(),
            turnover_usd: self.turnover_usd.get(symbol).copied(),
        }
    }
}

/// Statistics plus cycle inputs, as read from an inputs file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationRequest {
    #[serde(default)]
    pub stats: BTreeMap<String, SymbolStats>,
    /// Overrides the configured allocation mode for this request
    #[serde(default)]
    pub mode: Option<String>,
    /// Intraday totals for the caps guard, when the caller tracks them
    #[serde(default)]
    pub caps: Option<CapsTelemetry>,
    #[serde(flatten)]
    pub inputs: CycleInputs,
}

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub targets: BTreeMap<String, PortfolioTarget>,
    pub effects: Vec<Effect>,
    pub soft: SoftFactor,
    /// Intraday caps stopped the cycle
    pub blocked: bool,
}

impl CycleOutcome {
    pub fn total_usd(&self) -> f64 {
        self.targets.values().map(|t| t.target_usd).sum()
    }
}

/// Mutable allocator state, written only by the allocation cycle.
#[derive(Debug, Clone, Default)]
pub struct AllocatorState {
    pub prev_weights: Weights,
    pub prev_targets_usd: BTreeMap<String, f64>,
    pub backoff: BackoffState,
    pub vol_cache: VolCache,
    pub caps_last_breached: bool,
    pub hwm: HighWaterMark,
}

/// Read-only copy of the allocator state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocatorStateView {
    pub weights: Weights,
    pub targets_usd: BTreeMap<String, f64>,
    pub backoff_levels: BTreeMap<String, usize>,
    pub backoff_cooldowns: BTreeMap<String, u32>,
    pub hwm_equity_usd: f64,
    pub caps_blocked: bool,
}

pub struct PortfolioAllocator {
    config: Config,
    weights: WeightComputer,
    gateway: GuardGateway,
    softener: DrawdownSoftener,
    stages: AttenuationStages,
    micro: MicroBiasInjector,
    limiter: RateLimiter,
    fee_tilt: FeeTierTilt,
    final_clamp: FinalClampStage,
    state: AllocatorState,
}

impl PortfolioAllocator {
    /// Build an allocator with no guard collaborators attached.
    ///
    /// Fails if the configured allocation mode is unknown.
    pub fn new(config: Config) -> AllocatorResult<Self> {
        config.portfolio.mode.parse::<AllocationMode>()?;
        Ok(Self {
            weights: WeightComputer::new(config.portfolio.clone()),
            gateway: GuardGateway::new(
                config.guards.pos_skew.per_color_abs_limit,
                config.smoothing.bias_cap,
            ),
            softener: DrawdownSoftener::new(&config.budget),
            stages: AttenuationStages::new(config.cost.clone()),
            micro: MicroBiasInjector::new(config.signals.clone()),
            limiter: RateLimiter::new(&config.smoothing),
            fee_tilt: FeeTierTilt::new(config.fees.clone(), config.smoothing.fee_bias_cap),
            final_clamp: FinalClampStage::new(config.budget.budget_min_usd),
            state: AllocatorState::default(),
            config,
        })
    }

    pub fn with_caps_guard(mut self, guard: Box<dyn IntradayCapsGuard>) -> Self {
        self.gateway.set_caps_guard(guard);
        self
    }

    pub fn with_skew_guard(mut self, guard: Box<dyn PositionSkewGuard>) -> Self {
        self.gateway.set_skew_guard(guard);
        self
    }

    pub fn with_micro_signals(mut self, signals: Box<dyn MicroSignals>) -> Self {
        self.micro = MicroBiasInjector::with_signals(self.config.signals.clone(), signals);
        self
    }

    pub fn with_fee_schedule(mut self, schedule: Box<dyn FeeSchedule>) -> Self {
        self.fee_tilt = FeeTierTilt::with_schedule(
            self.config.fees.clone(),
            self.config.smoothing.fee_bias_cap,
            schedule,
        );
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle to the shared high-water mark, for admin resets.
    pub fn hwm(&self) -> HighWaterMark {
        self.state.hwm.clone()
    }

    pub fn state_view(&self) -> AllocatorStateView {
        AllocatorStateView {
            weights: self.state.prev_weights.clone(),
            targets_usd: self.state.prev_targets_usd.clone(),
            backoff_levels: self.state.backoff.levels.clone(),
            backoff_cooldowns: self.state.backoff.cooldowns.clone(),
            hwm_equity_usd: self.state.hwm.get(),
            caps_blocked: self.state.caps_last_breached,
        }
    }

    // =========================================================================
    // Weights
    // =========================================================================

    /// Projected weights for `stats` under `mode` (configured mode if `None`).
    pub fn compute_weights(
        &mut self,
        stats: &BTreeMap<String, SymbolStats>,
        mode: Option<&str>,
    ) -> AllocatorResult<Weights> {
        self.weights.compute_for(stats, mode, &mut self.state.vol_cache)
    }

    /// Compute, smooth and size in one call.
    pub fn allocate(
        &mut self,
        stats: &BTreeMap<String, SymbolStats>,
        mode: Option<&str>,
        inputs: &CycleInputs,
    ) -> AllocatorResult<CycleOutcome> {
        let raw = self.compute_weights(stats, mode)?;
        let smoothed = smooth_weights(
            &raw,
            &self.state.prev_weights,
            self.config.portfolio.ema_alpha,
            self.weights.projector(),
        );
        self.state.prev_weights = smoothed.clone();
        Ok(self.targets_from_weights(&smoothed, inputs))
    }

    // =========================================================================
    // Sizing
    // =========================================================================

    /// Turn weights into USD targets.
    pub fn targets_from_weights(&mut self, weights: &Weights, inputs: &CycleInputs) -> CycleOutcome {
        let mut effects = Vec::new();

        let (caps, caps_effects) = self.gateway.check_caps(self.state.caps_last_breached);
        self.state.caps_last_breached = caps.breached;
        effects.extend(caps_effects);
        if caps.breached {
            return CycleOutcome {
                targets: BTreeMap::new(),
                effects,
                soft: SoftFactor::FULL,
                blocked: true,
            };
        }

        let (decision, skew_effects) = self.gateway.evaluate_skew(&inputs.positions, &inputs.colors);
        effects.extend(skew_effects);

        let soft = self.softener.evaluate(&self.state.hwm, inputs.equity_usd);
        let budget_total = self.config.portfolio.budget_usd.max(0.0);
        let avail = match inputs.budget_available_usd {
            Some(v) if v.is_finite() => v.max(0.0),
            Some(v) => {
                warn!(value = v, "Non-finite available budget, using configured budget");
                budget_total
            }
            None => budget_total,
        };
        let ceiling = avail * soft.factor();

        effects.push(Effect::gauge(gauge::BUDGET_AVAILABLE_USD, avail));
        effects.push(Effect::gauge(gauge::DRAWDOWN_PCT, soft.drawdown_pct()));
        effects.push(Effect::gauge(gauge::SOFT_FACTOR, soft.factor()));
        effects.push(Effect::gauge(gauge::HWM_EQUITY_USD, self.state.hwm.get()));

        let mut working: BTreeMap<String, f64> = BTreeMap::new();
        for (symbol, weight) in weights {
            let next = self.size_symbol(symbol, *weight, budget_total, avail, &soft, &decision, inputs, &mut effects);
            working.insert(symbol.clone(), next);
        }

        let (_, tilt_effects) = self.fee_tilt.apply(&mut working, inputs.turnover_total_usd, ceiling);
        effects.extend(tilt_effects);

        self.final_clamp.apply(&mut working, ceiling);

        let targets: BTreeMap<String, PortfolioTarget> = working
            .iter()
            .map(|(symbol, usd)| {
                let weight = weights.get(symbol).copied().unwrap_or(0.0);
                effects.push(Effect::symbol_gauge(gauge::WEIGHT, symbol, weight));
                effects.push(Effect::symbol_gauge(gauge::TARGET_USD, symbol, *usd));
                (
                    symbol.clone(),
                    PortfolioTarget {
                        target_usd: *usd,
                        max_levels: self.max_levels(weight),
                    },
                )
            })
            .collect();

        self.state.prev_targets_usd = working;

        info!(
            symbols = targets.len(),
            total_usd = round6(targets.values().map(|t| t.target_usd).sum()),
            ceiling_usd = round6(ceiling),
            soft_factor = soft.factor(),
            "Allocation cycle complete"
        );

        CycleOutcome {
            targets,
            effects,
            soft,
            blocked: false,
        }
    }

    /// Run one symbol from budget share to rate-limited target.
    #[allow(clippy::too_many_arguments)]
    fn size_symbol(
        &mut self,
        symbol: &str,
        weight: f64,
        budget_total: f64,
        avail: f64,
        soft: &SoftFactor,
        decision: &GuardDecision,
        inputs: &CycleInputs,
        effects: &mut Vec<Effect>,
    ) -> f64 {
        let base = (budget_total * weight).max(0.0);
        let share = avail * weight;
        let mut t = base.min(share) * soft.factor();

        let (attenuated, stage_effects) = self.stages.apply(symbol, t, &inputs.readings(symbol), share);
        effects.extend(stage_effects);
        t = attenuated;

        if decision.freeze_symbols.contains(symbol) {
            debug!(symbol, "Frozen by position skew guard");
            t = 0.0;
        } else {
            t *= decision.bias_multiplier(symbol, &inputs.colors);
        }

        if t < self.config.budget.budget_min_usd {
            t = 0.0;
        }

        let current = self.state.prev_targets_usd.get(symbol).copied();
        let (desired, micro_effects) = self.micro.apply(
            symbol,
            t,
            current.unwrap_or(0.0),
            inputs.micro.get(symbol),
        );
        effects.extend(micro_effects);

        let (step, limit_effects) = self.limiter.step(
            &mut self.state.backoff,
            symbol,
            current,
            desired,
            decision.escalates(symbol),
        );
        effects.extend(limit_effects);
        step.next
    }

    /// Order levels per side for a weight.
    pub fn max_levels(&self, weight: f64) -> u32 {
        let p = &self.config.portfolio;
        if p.max_weight <= 0.0 || !weight.is_finite() {
            return p.levels_per_side_min;
        }
        let raw = (f64::from(p.levels_per_side_max) * weight / p.max_weight).round_ties_even();
        let levels = raw.clamp(0.0, f64::from(u32::MAX)) as u32;
        levels.clamp(p.levels_per_side_min, p.levels_per_side_max)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn to_snapshot(&self) -> AllocatorSnapshot {
        AllocatorSnapshot::capture(&self.state.hwm)
    }

    pub fn load_snapshot(&self, snapshot: &AllocatorSnapshot) -> AllocatorResult<()> {
        snapshot.restore(&self.state.hwm)
    }

    /// Load the snapshot at `path` with size guard and load counters.
    pub fn safe_load_snapshot<P: AsRef<Path>>(&self, path: P, sink: &mut dyn EffectSink) -> AllocatorResult<()> {
        SnapshotStore::new(path).safe_load(&self.state.hwm, sink)
    }

    /// Atomically write the snapshot to `path`.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P, sink: &mut dyn EffectSink) -> AllocatorResult<()> {
        SnapshotStore::new(path).save(&self.state.hwm, sink)
    }
}
