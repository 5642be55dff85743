//! Equal-risk-contribution solver.
//!
//! Each iteration computes `rc_i = w_i × vol_i`, stops once the relative
//! spread `(max − min) / max` drops below the tolerance, and otherwise
//! rescales toward `mean(rc) / vol_i` and re-projects.

use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::projector::CappedSimplexProjector;

#[derive(Debug, Clone, Copy)]
pub struct RiskParitySolver {
    max_iterations: usize,
    tolerance: f64,
    vol_eps: f64,
}

impl RiskParitySolver {
    pub fn new(max_iterations: usize, tolerance: f64, vol_eps: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            vol_eps,
        }
    }

    /// Solve for weights given per-symbol volatilities.
    pub fn solve(
        &self,
        vols: &BTreeMap<String, f64>,
        projector: &CappedSimplexProjector,
    ) -> BTreeMap<String, f64> {
        if vols.is_empty() {
            return BTreeMap::new();
        }

        let vols: BTreeMap<&str, f64> = vols
            .iter()
            .map(|(k, v)| {
                let v = if v.is_finite() { *v } else { 1.0 };
                (k.as_str(), v.max(self.vol_eps))
            })
            .collect();

        let eq = 1.0 / vols.len() as f64;
        let mut weights: BTreeMap<String, f64> =
            vols.keys().map(|k| (k.to_string(), eq)).collect();

        for iteration in 0..self.max_iterations {
            let rc: Vec<f64> = weights.iter().map(|(k, w)| w * vols[k.as_str()]).collect();
            let max_rc = rc.iter().copied().fold(f64::MIN, f64::max);
            let min_rc = rc.iter().copied().fold(f64::MAX, f64::min);

            if max_rc <= 0.0 || (max_rc - min_rc) / max_rc < self.tolerance {
                debug!(iteration, "Risk parity converged");
                return weights;
            }

            let mean_rc = rc.iter().sum::<f64>() / rc.len() as f64;
            let next: BTreeMap<String, f64> = vols
                .iter()
                .map(|(k, vol)| (k.to_string(), mean_rc / vol))
                .collect();
            weights = projector.project(&next);
            trace!(iteration, spread = (max_rc - min_rc) / max_rc, "Risk parity step");
        }

        debug!(max_iterations = self.max_iterations, "Risk parity hit iteration cap");
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vols(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_two_assets_equalise_contributions() {
        let solver = RiskParitySolver::new(50, 1e-6, 1e-9);
        let projector = CappedSimplexProjector::new(0.0, 1.0);
        let w = solver.solve(&vols(&[("X", 0.03), ("Y", 0.06)]), &projector);

        let sum: f64 = w.values().sum();
        assert!((sum - 1.0).abs() <= 1e-9);

        let rc_x = w["X"] * 0.03;
        let rc_y = w["Y"] * 0.06;
        assert!((rc_x - rc_y).abs() / rc_x.max(rc_y) < 1e-6);
        assert!((w["X"] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_equal_vols_stay_equal() {
        let solver = RiskParitySolver::new(50, 1e-6, 1e-9);
        let projector = CappedSimplexProjector::new(0.02, 0.5);
        let w = solver.solve(&vols(&[("A", 0.05), ("B", 0.05), ("C", 0.05)]), &projector);
        for v in w.values() {
            assert!((v - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_bounds_respected_when_caps_bind() {
        let solver = RiskParitySolver::new(50, 1e-6, 1e-9);
        let projector = CappedSimplexProjector::new(0.1, 0.5);
        let w = solver.solve(
            &vols(&[("A", 0.01), ("B", 0.2), ("C", 0.4)]),
            &projector,
        );
        let sum: f64 = w.values().sum();
        assert!((sum - 1.0).abs() <= 1e-9);
        for v in w.values() {
            assert!(*v >= 0.1 - 1e-12 && *v <= 0.5 + 1e-12);
        }
        assert!(w["A"] >= w["B"] && w["B"] >= w["C"]);
    }

    #[test]
    fn test_zero_vol_is_floored() {
        let solver = RiskParitySolver::new(50, 1e-6, 1e-9);
        let projector = CappedSimplexProjector::new(0.0, 1.0);
        let w = solver.solve(&vols(&[("A", 0.0), ("B", 0.05)]), &projector);
        let sum: f64 = w.values().sum();
        assert!((sum - 1.0).abs() <= 1e-9);
        assert!(w.values().all(|v| v.is_finite()));
    }

    #[test]
    fn test_empty_input() {
        let solver = RiskParitySolver::new(50, 1e-6, 1e-9);
        let projector = CappedSimplexProjector::new(0.0, 1.0);
        assert!(solver.solve(&BTreeMap::new(), &projector).is_empty());
    }
}
