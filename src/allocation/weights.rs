//! Raw weight computation per allocation mode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use super::projector::CappedSimplexProjector;
use super::risk_parity::RiskParitySolver;
use crate::config::PortfolioConfig;
use crate::error::{AllocatorError, AllocatorResult};

/// Symbol → weight, iterated in sorted order.
pub type Weights = BTreeMap<String, f64>;

/// Last known volatility per symbol.
pub type VolCache = BTreeMap<String, f64>;

/// Per-symbol statistics supplied by the stats provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    /// Volatility estimate
    #[serde(default)]
    pub vol: Option<f64>,
    /// Alternate volatility field used when `vol` is absent
    #[serde(default)]
    pub vola: Option<f64>,
}

impl SymbolStats {
    pub fn with_vol(vol: f64) -> Self {
        Self {
            vol: Some(vol),
            vola: None,
        }
    }
}

/// How raw weights are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Configured weights, new symbols at `min_weight`
    Manual,
    /// Proportional to `1 / vol`
    InverseVol,
    /// Equal `weight × vol` contributions
    RiskParity,
}

impl AllocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMode::Manual => "manual",
            AllocationMode::InverseVol => "inverse_vol",
            AllocationMode::RiskParity => "risk_parity",
        }
    }
}

impl fmt::Display for AllocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationMode {
    type Err = AllocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(AllocationMode::Manual),
            "inverse_vol" => Ok(AllocationMode::InverseVol),
            "risk_parity" => Ok(AllocationMode::RiskParity),
            other => Err(AllocatorError::UnknownMode(other.to_string())),
        }
    }
}

/// Produces projected weights from symbol statistics.
#[derive(Debug, Clone)]
pub struct WeightComputer {
    config: PortfolioConfig,
    projector: CappedSimplexProjector,
}

impl WeightComputer {
    pub fn new(config: PortfolioConfig) -> Self {
        let projector = CappedSimplexProjector::new(config.min_weight, config.max_weight);
        Self { config, projector }
    }

    pub fn projector(&self) -> &CappedSimplexProjector {
        &self.projector
    }

    /// Parse `mode` (or fall back to the configured mode) and compute weights.
    pub fn compute_for(
        &self,
        stats: &BTreeMap<String, SymbolStats>,
        mode: Option<&str>,
        vol_cache: &mut VolCache,
    ) -> AllocatorResult<Weights> {
        let mode: AllocationMode = mode.unwrap_or(&self.config.mode).parse()?;
        Ok(self.compute(stats, mode, vol_cache))
    }

    /// Compute projected weights for `mode`.
    pub fn compute(
        &self,
        stats: &BTreeMap<String, SymbolStats>,
        mode: AllocationMode,
        vol_cache: &mut VolCache,
    ) -> Weights {
        let weights = match mode {
            AllocationMode::Manual => self.manual(stats),
            AllocationMode::InverseVol => self.inverse_vol(stats, vol_cache),
            AllocationMode::RiskParity => self.risk_parity(stats, vol_cache),
        };
        debug!(%mode, symbols = weights.len(), "Computed weights");
        weights
    }

    fn manual(&self, stats: &BTreeMap<String, SymbolStats>) -> Weights {
        let mut raw: Weights = self.config.manual_weights.clone();
        for symbol in stats.keys() {
            raw.entry(symbol.clone()).or_insert(self.config.min_weight);
        }
        if raw.is_empty() {
            return Weights::new();
        }

        let total: f64 = raw.values().map(|w| finite_non_neg(*w)).sum();
        let normalised: Weights = if total > 0.0 {
            raw.iter()
                .map(|(k, w)| (k.clone(), finite_non_neg(*w) / total))
                .collect()
        } else {
            let eq = 1.0 / raw.len() as f64;
            raw.keys().map(|k| (k.clone(), eq)).collect()
        };
        self.projector.project(&normalised)
    }

    fn inverse_vol(&self, stats: &BTreeMap<String, SymbolStats>, vol_cache: &mut VolCache) -> Weights {
        let inverse: Weights = stats
            .iter()
            .map(|(symbol, s)| {
                let vol = resolve_vol(symbol, s, vol_cache);
                (symbol.clone(), 1.0 / vol.max(self.config.vol_eps))
            })
            .collect();

        // Bring the scores onto the simplex scale before clamping to bounds.
        let total: f64 = inverse.values().sum();
        let scaled: Weights = if total > 0.0 && total.is_finite() {
            inverse.into_iter().map(|(k, v)| (k, v / total)).collect()
        } else {
            inverse
        };
        self.projector.project(&scaled)
    }

    fn risk_parity(&self, stats: &BTreeMap<String, SymbolStats>, vol_cache: &mut VolCache) -> Weights {
        let vols: BTreeMap<String, f64> = stats
            .iter()
            .map(|(symbol, s)| {
                let vol = resolve_vol(symbol, s, vol_cache).max(self.config.vol_eps);
                vol_cache.insert(symbol.clone(), vol);
                (symbol.clone(), vol)
            })
            .collect();

        RiskParitySolver::new(
            self.config.risk_parity_max_iterations,
            self.config.risk_parity_tolerance,
            self.config.vol_eps,
        )
        .solve(&vols, &self.projector)
    }
}

/// Volatility lookup: `vol`, then `vola`, then the cache, then 1.0.
///
/// A usable observed value refreshes the cache.
pub fn resolve_vol(symbol: &str, stats: &SymbolStats, vol_cache: &mut VolCache) -> f64 {
    let observed = match stats.vol.or(stats.vola) {
        Some(v) if v.is_finite() => Some(v),
        Some(v) => {
            warn!(symbol, value = v, "Non-finite volatility, using fallback");
            None
        }
        None => None,
    };

    match observed {
        Some(v) => {
            vol_cache.insert(symbol.to_string(), v);
            v
        }
        None => {
            let fallback = vol_cache.get(symbol).copied().unwrap_or(1.0);
            debug!(symbol, fallback, "Volatility missing, using cached value");
            fallback
        }
    }
}

/// Blend `new` with `prev` (`α·new + (1−α)·prev`) and re-project.
///
/// Symbols absent from `prev` start from zero; symbols only in `prev` drop
/// out. With no previous vector the new one is returned untouched.
pub fn smooth_weights(
    new: &Weights,
    prev: &Weights,
    alpha: f64,
    projector: &CappedSimplexProjector,
) -> Weights {
    if prev.is_empty() || new.is_empty() {
        return new.clone();
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let blended: Weights = new
        .iter()
        .map(|(k, w)| {
            let p = prev.get(k).copied().unwrap_or(0.0);
            (k.clone(), alpha * w + (1.0 - alpha) * p)
        })
        .collect();
    projector.project(&blended)
}

fn finite_non_neg(v: f64) -> f64 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        0.0
    }
}
