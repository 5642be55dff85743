//! Projection of raw weights onto the capped simplex.
//!
//! Output weights sum to one (within [`SUM_TOLERANCE`]) and each lies in
//! `[min_weight, max_weight]`. When the bounds are infeasible for the
//! number of symbols they are relaxed symmetrically:
//! - `n * min > 1` → lower bound becomes `1/n`
//! - `n * max < 1` → upper bound becomes `1.0`

use std::collections::BTreeMap;
use tracing::trace;

/// Convergence tolerance of the water-filling loop.
pub const SUM_TOLERANCE: f64 = 1e-9;

/// Iteration cap of the water-filling loop.
const MAX_FILL_ITERATIONS: usize = 100;

/// Projects weight vectors onto `{w : Σw = 1, min ≤ w_i ≤ max}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CappedSimplexProjector {
    min_weight: f64,
    max_weight: f64,
}

impl CappedSimplexProjector {
    /// Create a projector for the configured bounds.
    pub fn new(min_weight: f64, max_weight: f64) -> Self {
        Self {
            min_weight,
            max_weight,
        }
    }

    /// Effective bounds for `n` coordinates after feasibility relaxation.
    pub fn effective_bounds(&self, n: usize) -> (f64, f64) {
        let mut min_b = self.min_weight;
        let mut max_b = self.max_weight;
        if n == 0 {
            return (min_b, max_b);
        }
        let nf = n as f64;
        if nf * min_b > 1.0 {
            min_b = 1.0 / nf;
        }
        if nf * max_b < 1.0 {
            max_b = 1.0;
        }
        (min_b, max_b)
    }

    /// Project `raw` onto the capped simplex.
    ///
    /// Raw values may be negative, zero, or on any scale. Iteration always
    /// follows sorted key order so the result only depends on the content of
    /// the map.
    pub fn project(&self, raw: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        if raw.is_empty() {
            return BTreeMap::new();
        }
        if raw.len() == 1 {
            return raw.keys().map(|k| (k.clone(), 1.0)).collect();
        }

        let (min_b, max_b) = self.effective_bounds(raw.len());
        let clamp = |v: f64| {
            let v = if v.is_finite() { v } else { 0.0 };
            v.max(min_b).min(max_b)
        };

        // Clamp, then normalise proportionally.
        let mut w: Vec<(String, f64)> = raw.iter().map(|(k, v)| (k.clone(), clamp(*v))).collect();
        let positive: f64 = w.iter().map(|(_, v)| v.max(0.0)).sum();
        if positive > 0.0 {
            for (_, v) in w.iter_mut() {
                *v = clamp(*v / positive);
            }
        } else {
            let eq = 1.0 / w.len() as f64;
            for (_, v) in w.iter_mut() {
                *v = clamp(eq);
            }
        }

        // Water-filling towards Σw = 1.
        for iteration in 0..MAX_FILL_ITERATIONS {
            let total: f64 = w.iter().map(|(_, v)| v).sum();
            if (total - 1.0).abs() <= SUM_TOLERANCE {
                trace!(iteration, "Capped simplex converged");
                break;
            }

            let moved = if total < 1.0 {
                let free: Vec<usize> = (0..w.len())
                    .filter(|&i| w[i].1 < max_b - SUM_TOLERANCE)
                    .collect();
                if free.is_empty() {
                    break;
                }
                let delta = (1.0 - total) / free.len() as f64;
                let mut moved = false;
                for i in free {
                    let before = w[i].1;
                    w[i].1 = (before + delta).min(max_b);
                    moved |= w[i].1 != before;
                }
                moved
            } else {
                let free: Vec<usize> = (0..w.len())
                    .filter(|&i| w[i].1 > min_b + SUM_TOLERANCE)
                    .collect();
                if free.is_empty() {
                    break;
                }
                let delta = (total - 1.0) / free.len() as f64;
                let mut moved = false;
                for i in free {
                    let before = w[i].1;
                    w[i].1 = (before - delta).max(min_b);
                    moved |= w[i].1 != before;
                }
                moved
            };

            if !moved {
                break;
            }
        }

        // Final drift fix, still inside the bounds.
        let total: f64 = w.iter().map(|(_, v)| v).sum();
        if total > 0.0 {
            let scale = 1.0 / total;
            for (_, v) in w.iter_mut() {
                *v = (*v * scale).max(min_b).min(max_b);
            }
        }

        w.into_iter().collect()
    }
}
