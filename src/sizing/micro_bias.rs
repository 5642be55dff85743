//! Order-book micro-signal bias on the desired target.
//!
//! Three signals in `[-1, 1]` (book imbalance, microprice tilt, volatility
//! regime) are blended with configured weights. The blended bias nudges the
//! desired target by a fraction of the pending delta, capped at
//! `impact_cap_ratio × |delta|`. Rate-limit caps are not touched.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::SignalsConfig;
use crate::effects::{gauge, Effect};
use crate::utils::clamp_f64;

/// Last top-of-book reading for a symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MicroSnapshot {
    #[serde(default)]
    pub last_bid: f64,
    #[serde(default)]
    pub last_ask: f64,
    #[serde(default)]
    pub last_bid_qty: f64,
    #[serde(default)]
    pub last_ask_qty: f64,
    #[serde(default)]
    pub last_sigma: f64,
}

/// Signal functions over a book snapshot.
pub trait MicroSignals: Send + Sync {
    /// Bid/ask quantity imbalance in `[-1, 1]`.
    fn imbalance(&self, snapshot: &MicroSnapshot) -> f64;

    /// Microprice displacement from mid, in half-spreads, in `[-1, 1]`.
    fn micro_tilt(&self, snapshot: &MicroSnapshot) -> f64;

    /// Volatility regime label for `sigma` given ascending `bands`.
    fn sigma_band(&self, sigma: f64, bands: &[f64]) -> String;
}

/// Plain top-of-book signal formulas.
#[derive(Debug, Default, Clone, Copy)]
pub struct BookSignals;

impl MicroSignals for BookSignals {
    fn imbalance(&self, s: &MicroSnapshot) -> f64 {
        let total = s.last_bid_qty + s.last_ask_qty;
        if !(total > 0.0) || !total.is_finite() {
            return 0.0;
        }
        clamp_f64((s.last_bid_qty - s.last_ask_qty) / total, -1.0, 1.0)
    }

    fn micro_tilt(&self, s: &MicroSnapshot) -> f64 {
        let qty = s.last_bid_qty + s.last_ask_qty;
        let half_spread = (s.last_ask - s.last_bid) / 2.0;
        if !(qty > 0.0) || !(half_spread > 0.0) || s.last_bid <= 0.0 {
            return 0.0;
        }
        let mid = (s.last_bid + s.last_ask) / 2.0;
        let micro = (s.last_ask * s.last_bid_qty + s.last_bid * s.last_ask_qty) / qty;
        clamp_f64((micro - mid) / half_spread, -1.0, 1.0)
    }

    fn sigma_band(&self, sigma: f64, bands: &[f64]) -> String {
        let idx = bands
            .iter()
            .position(|b| sigma <= *b)
            .unwrap_or(bands.len());
        idx.to_string()
    }
}

/// Adds a bounded micro-signal bias to the desired target.
pub struct MicroBiasInjector {
    config: SignalsConfig,
    signals: Box<dyn MicroSignals>,
}

impl fmt::Debug for MicroBiasInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroBiasInjector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MicroBiasInjector {
    pub fn new(config: SignalsConfig) -> Self {
        Self::with_signals(config, Box::new(BookSignals))
    }

    pub fn with_signals(config: SignalsConfig, signals: Box<dyn MicroSignals>) -> Self {
        Self { config, signals }
    }

    /// Blended bias in `[-1, 1]`; zero without a snapshot.
    pub fn micro_bias(&self, snapshot: Option<&MicroSnapshot>) -> f64 {
        let Some(snap) = snapshot else {
            return 0.0;
        };
        let w = &self.config.weights;
        let imbalance = self.signals.imbalance(snap);
        let tilt = self.signals.micro_tilt(snap);
        let regime = self.signals.sigma_band(snap.last_sigma, &self.config.sigma_bands);
        let regime_bias = self
            .config
            .regime_bias_map
            .get(&regime)
            .map(|v| f64::from((*v).clamp(-1, 1)))
            .unwrap_or(0.0);

        let bias = w.imbalance * imbalance + w.micro_tilt * tilt + w.sigma_regime * regime_bias;
        clamp_f64(bias, -1.0, 1.0)
    }

    /// Return `desired` shifted by the capped bias adjustment.
    pub fn apply(
        &self,
        symbol: &str,
        desired: f64,
        current: f64,
        snapshot: Option<&MicroSnapshot>,
    ) -> (f64, Vec<Effect>) {
        if snapshot.is_none() {
            debug!(symbol, "No micro snapshot, bias is zero");
        }
        let delta_abs = (desired - current).abs();
        let bias = self.micro_bias(snapshot);
        let max_impact = delta_abs * self.config.impact_cap_ratio.clamp(0.0, 1.0);
        let adjustment = clamp_f64(bias * delta_abs, -max_impact, max_impact);

        let strength = adjustment.abs() / delta_abs.max(1e-9);
        let effects = vec![Effect::symbol_gauge(gauge::MICRO_BIAS_STRENGTH, symbol, strength)];
        (desired + adjustment, effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignalWeights;

    fn snapshot(bid: f64, ask: f64, bq: f64, aq: f64, sigma: f64) -> MicroSnapshot {
        MicroSnapshot {
            last_bid: bid,
            last_ask: ask,
            last_bid_qty: bq,
            last_ask_qty: aq,
            last_sigma: sigma,
        }
    }

    fn config(imbalance: f64, micro_tilt: f64, sigma_regime: f64) -> SignalsConfig {
        SignalsConfig {
            weights: SignalWeights {
                imbalance,
                micro_tilt,
                sigma_regime,
            },
            ..SignalsConfig::default()
        }
    }

    // =========================================================================
    // Signals
    // =========================================================================

    #[test]
    fn test_imbalance() {
        let s = BookSignals;
        assert_eq!(s.imbalance(&snapshot(100.0, 101.0, 3.0, 1.0, 0.0)), 0.5);
        assert_eq!(s.imbalance(&snapshot(100.0, 101.0, 0.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_micro_tilt() {
        let s = BookSignals;
        // Heavy bid → microprice near ask → positive tilt
        let t = s.micro_tilt(&snapshot(100.0, 102.0, 3.0, 1.0, 0.0));
        assert!((t - 0.5).abs() < 1e-12);
        // Crossed or empty book → neutral
        assert_eq!(s.micro_tilt(&snapshot(102.0, 100.0, 3.0, 1.0, 0.0)), 0.0);
    }

    #[test]
    fn test_sigma_band_labels() {
        let s = BookSignals;
        let bands = [0.01, 0.02];
        assert_eq!(s.sigma_band(0.005, &bands), "0");
        assert_eq!(s.sigma_band(0.015, &bands), "1");
        assert_eq!(s.sigma_band(0.5, &bands), "2");
        assert_eq!(s.sigma_band(0.5, &[]), "0");
    }

    // =========================================================================
    // Injection
    // =========================================================================

    #[test]
    fn test_zero_weights_leave_desired_unchanged() {
        let injector = MicroBiasInjector::new(config(0.0, 0.0, 0.0));
        let snap = snapshot(100.0, 101.0, 5.0, 1.0, 0.0);
        let (desired, _) = injector.apply("A", 200.0, 100.0, Some(&snap));
        assert_eq!(desired, 200.0);
    }

    #[test]
    fn test_bias_capped_by_impact_ratio() {
        let injector = MicroBiasInjector::new(config(1.0, 0.0, 0.0));
        // imbalance 0.5, delta 100 → raw 50, cap 10
        let snap = snapshot(100.0, 101.0, 3.0, 1.0, 0.0);
        let (desired, effects) = injector.apply("A", 200.0, 100.0, Some(&snap));
        assert!((desired - 210.0).abs() < 1e-9);
        assert_eq!(
            effects,
            vec![Effect::symbol_gauge(gauge::MICRO_BIAS_STRENGTH, "A", 0.1)]
        );
    }

    #[test]
    fn test_regime_bias_map() {
        let mut cfg = config(0.0, 0.0, 1.0);
        cfg.sigma_bands = vec![0.01];
        cfg.regime_bias_map.insert("1".to_string(), -1);
        cfg.impact_cap_ratio = 0.05;
        let injector = MicroBiasInjector::new(cfg);

        let calm = snapshot(100.0, 101.0, 1.0, 1.0, 0.001);
        let wild = snapshot(100.0, 101.0, 1.0, 1.0, 0.3);
        assert_eq!(injector.micro_bias(Some(&calm)), 0.0);
        assert_eq!(injector.micro_bias(Some(&wild)), -1.0);

        let (desired, _) = injector.apply("A", 0.0, 100.0, Some(&wild));
        assert!((desired + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_snapshot_is_neutral() {
        let injector = MicroBiasInjector::new(config(1.0, 1.0, 1.0));
        let (desired, _) = injector.apply("A", 150.0, 100.0, None);
        assert_eq!(desired, 150.0);
    }
}
