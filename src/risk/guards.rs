//! Guard collaborators and the gateway that turns their verdicts into
//! allocator decisions.
//!
//! Two contracts are consulted each cycle:
//! - [`IntradayCapsGuard`]: hard stop, the cycle returns no targets
//! - [`PositionSkewGuard`]: freezes symbols and biases one color down
//!
//! A skew guard that fails is logged and treated as "no breach".

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::{IntradayCapsConfig, PosSkewConfig};
use crate::effects::{counter, AuditEvent, Effect};

/// Color assigned to symbols with no explicit color.
pub const DEFAULT_COLOR: &str = "blue";

/// Magnitude of the color bias before capping.
const COLOR_BIAS_STEP: f64 = 0.05;

const CAPS_GUARD_NAME: &str = "intraday_caps";

/// Cumulative intraday readings exposed for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsTelemetry {
    pub cum_pnl: f64,
    pub cum_turnover: f64,
    pub cum_vol: f64,
}

/// Portfolio-wide intraday limits.
#[cfg_attr(test, mockall::automock)]
pub trait IntradayCapsGuard: Send + Sync {
    fn is_breached(&self) -> bool;

    fn telemetry(&self) -> CapsTelemetry;
}

/// Verdict of the position skew guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkewDecision {
    pub symbol_breach: BTreeSet<String>,
    pub color_breach: bool,
    /// Direction to lean: -1, 0 or 1
    pub bias_sign: i8,
}

/// Per-symbol and per-color position limits.
#[cfg_attr(test, mockall::automock)]
pub trait PositionSkewGuard: Send + Sync {
    fn evaluate(
        &self,
        positions: &BTreeMap<String, f64>,
        colors: &BTreeMap<String, String>,
    ) -> Result<SkewDecision>;
}

impl<T: IntradayCapsGuard + ?Sized> IntradayCapsGuard for Arc<T> {
    fn is_breached(&self) -> bool {
        (**self).is_breached()
    }

    fn telemetry(&self) -> CapsTelemetry {
        (**self).telemetry()
    }
}

impl<T: PositionSkewGuard + ?Sized> PositionSkewGuard for Arc<T> {
    fn evaluate(
        &self,
        positions: &BTreeMap<String, f64>,
        colors: &BTreeMap<String, String>,
    ) -> Result<SkewDecision> {
        (**self).evaluate(positions, colors)
    }
}

/// What the allocator does with the skew verdict this cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardDecision {
    /// Symbols forced to a desired target of zero
    pub freeze_symbols: BTreeSet<String>,
    pub color_breach: bool,
    pub bias_sign: i8,
    /// Color whose symbols are scaled down
    pub biased_color: Option<String>,
    /// Signed ratio; symbols of `biased_color` are scaled by `1 - |ratio|`
    pub bias_ratio: f64,
}

impl GuardDecision {
    /// Whether the backoff controller should escalate for `symbol`.
    pub fn escalates(&self, symbol: &str) -> bool {
        self.color_breach || self.freeze_symbols.contains(symbol)
    }

    /// Multiplier applied to `symbol`'s running target.
    pub fn bias_multiplier(&self, symbol: &str, colors: &BTreeMap<String, String>) -> f64 {
        match &self.biased_color {
            Some(biased) if self.bias_ratio != 0.0 && color_of(colors, symbol) == biased => {
                1.0 - self.bias_ratio.abs()
            }
            _ => 1.0,
        }
    }
}

/// Color of `symbol`, defaulting to [`DEFAULT_COLOR`].
pub fn color_of<'a>(colors: &'a BTreeMap<String, String>, symbol: &str) -> &'a str {
    colors.get(symbol).map(String::as_str).unwrap_or(DEFAULT_COLOR)
}

/// Outcome of the intraday caps check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapsCheck {
    pub breached: bool,
}

/// Consults the guard collaborators.
pub struct GuardGateway {
    caps: Option<Box<dyn IntradayCapsGuard>>,
    skew: Option<Box<dyn PositionSkewGuard>>,
    per_color_abs_limit: f64,
    bias_cap: f64,
}

impl GuardGateway {
    pub fn new(per_color_abs_limit: f64, bias_cap: f64) -> Self {
        Self {
            caps: None,
            skew: None,
            per_color_abs_limit: per_color_abs_limit.max(0.0),
            bias_cap: bias_cap.clamp(0.0, 1.0),
        }
    }

    pub fn with_caps_guard(mut self, guard: Box<dyn IntradayCapsGuard>) -> Self {
        self.caps = Some(guard);
        self
    }

    pub fn with_skew_guard(mut self, guard: Box<dyn PositionSkewGuard>) -> Self {
        self.skew = Some(guard);
        self
    }

    pub fn set_caps_guard(&mut self, guard: Box<dyn IntradayCapsGuard>) {
        self.caps = Some(guard);
    }

    pub fn set_skew_guard(&mut self, guard: Box<dyn PositionSkewGuard>) {
        self.skew = Some(guard);
    }

    /// Check the intraday caps. Audits fire only on state changes relative
    /// to `last_breached`.
    pub fn check_caps(&self, last_breached: bool) -> (CapsCheck, Vec<Effect>) {
        let mut effects = Vec::new();
        let Some(guard) = &self.caps else {
            return (CapsCheck { breached: false }, effects);
        };

        let breached = guard.is_breached();
        if breached && !last_breached {
            let t = guard.telemetry();
            warn!(
                cum_pnl = t.cum_pnl,
                cum_turnover = t.cum_turnover,
                cum_vol = t.cum_vol,
                "Intraday caps breached, blocking allocation"
            );
            effects.push(Effect::Audit(AuditEvent::GuardBlock {
                name: CAPS_GUARD_NAME.to_string(),
            }));
        } else if !breached && last_breached {
            info!("Intraday caps cleared, resuming allocation");
            effects.push(Effect::Audit(AuditEvent::GuardResume {
                name: CAPS_GUARD_NAME.to_string(),
            }));
        }
        (CapsCheck { breached }, effects)
    }

    /// Evaluate position skew and derive the freeze set and color bias.
    pub fn evaluate_skew(
        &self,
        positions: &BTreeMap<String, f64>,
        colors: &BTreeMap<String, String>,
    ) -> (GuardDecision, Vec<Effect>) {
        let mut effects = Vec::new();
        let Some(guard) = &self.skew else {
            return (GuardDecision::default(), effects);
        };

        let verdict = match guard.evaluate(positions, colors) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Position skew guard failed, assuming no breach");
                return (GuardDecision::default(), effects);
            }
        };

        if !verdict.symbol_breach.is_empty() || verdict.color_breach {
            effects.push(Effect::counter(counter::POSITION_SKEW_BREACH_TOTAL, 1.0));
            warn!(
                symbols = ?verdict.symbol_breach,
                color_breach = verdict.color_breach,
                bias_sign = verdict.bias_sign,
                "Position skew breach"
            );
        }

        let biased_color = if verdict.color_breach {
            select_biased_color(positions, colors, self.per_color_abs_limit)
        } else {
            None
        };

        let bias_ratio = match (&biased_color, verdict.bias_sign) {
            (Some(_), sign) if sign != 0 => {
                (COLOR_BIAS_STEP * f64::from(sign.signum())).clamp(-self.bias_cap, self.bias_cap)
            }
            _ => 0.0,
        };
        if let Some(color) = &biased_color {
            debug!(color = %color, bias_ratio, "Biasing color down");
        }

        let decision = GuardDecision {
            freeze_symbols: verdict.symbol_breach,
            color_breach: verdict.color_breach,
            bias_sign: verdict.bias_sign.signum(),
            biased_color,
            bias_ratio,
        };
        (decision, effects)
    }
}

/// Color with the largest positive `|aggregate| - limit`, ties to the
/// lexicographically smallest name.
pub fn select_biased_color(
    positions: &BTreeMap<String, f64>,
    colors: &BTreeMap<String, String>,
    per_color_abs_limit: f64,
) -> Option<String> {
    let totals = color_totals(positions, colors);

    let mut best: Option<(f64, &str)> = None;
    for (color, total) in &totals {
        let excess = total.abs() - per_color_abs_limit;
        if excess <= 0.0 {
            continue;
        }
        // BTreeMap order makes the first maximum the smallest name.
        if best.map_or(true, |(b, _)| excess > b) {
            best = Some((excess, color.as_str()));
        }
    }
    best.map(|(_, c)| c.to_string())
}

fn color_totals(
    positions: &BTreeMap<String, f64>,
    colors: &BTreeMap<String, String>,
) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for (symbol, pos) in positions {
        if !pos.is_finite() {
            continue;
        }
        *totals.entry(color_of(colors, symbol).to_string()).or_insert(0.0) += pos;
    }
    totals
}

// =============================================================================
// Threshold implementations
// =============================================================================

/// Intraday caps on cumulative PnL, turnover and volume.
///
/// Readings are pushed through `&self` so one instance can be shared between
/// the fill handler and the allocation loop.
#[derive(Debug, Default)]
pub struct ThresholdCapsGuard {
    limits: IntradayCapsConfig,
    readings: Mutex<CapsTelemetry>,
}

impl ThresholdCapsGuard {
    pub fn new(limits: IntradayCapsConfig) -> Self {
        Self {
            limits,
            readings: Mutex::new(CapsTelemetry::default()),
        }
    }

    /// Add a fill's contribution to the daily totals.
    pub fn record(&self, pnl: f64, turnover: f64, vol: f64) {
        let mut r = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        r.cum_pnl += pnl;
        r.cum_turnover += turnover.abs();
        r.cum_vol += vol.abs();
    }

    /// Replace the totals, e.g. after reading them from an external ledger.
    pub fn set_readings(&self, readings: CapsTelemetry) {
        *self.readings.lock().unwrap_or_else(|e| e.into_inner()) = readings;
    }

    /// Start a new trading day.
    pub fn reset_day(&self) {
        self.set_readings(CapsTelemetry::default());
        info!("Intraday caps readings reset");
    }
}

impl IntradayCapsGuard for ThresholdCapsGuard {
    fn is_breached(&self) -> bool {
        let r = self.telemetry();
        let l = &self.limits;
        (l.daily_pnl_stop > 0.0 && r.cum_pnl <= -l.daily_pnl_stop)
            || (l.daily_turnover_cap > 0.0 && r.cum_turnover >= l.daily_turnover_cap)
            || (l.daily_vol_cap > 0.0 && r.cum_vol >= l.daily_vol_cap)
    }

    fn telemetry(&self) -> CapsTelemetry {
        *self.readings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Absolute position limits per symbol and per color.
#[derive(Debug, Clone, Default)]
pub struct ThresholdSkewGuard {
    limits: PosSkewConfig,
}

impl ThresholdSkewGuard {
    pub fn new(limits: PosSkewConfig) -> Self {
        Self { limits }
    }
}

impl PositionSkewGuard for ThresholdSkewGuard {
    fn evaluate(
        &self,
        positions: &BTreeMap<String, f64>,
        colors: &BTreeMap<String, String>,
    ) -> Result<SkewDecision> {
        let mut decision = SkewDecision::default();

        if self.limits.per_symbol_abs_limit > 0.0 {
            decision.symbol_breach = positions
                .iter()
                .filter(|(_, p)| p.abs() > self.limits.per_symbol_abs_limit)
                .map(|(s, _)| s.clone())
                .collect();
        }

        if self.limits.per_color_abs_limit > 0.0 {
            if let Some(color) =
                select_biased_color(positions, colors, self.limits.per_color_abs_limit)
            {
                let total = color_totals(positions, colors)
                    .get(&color)
                    .copied()
                    .unwrap_or(0.0);
                decision.color_breach = true;
                decision.bias_sign = if total > 0.0 {
                    -1
                } else if total < 0.0 {
                    1
                } else {
                    0
                };
            }
        }

        Ok(decision)
    }
}
