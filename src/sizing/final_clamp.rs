//! Last stage: enforce the soft budget ceiling and remove dust.

use std::collections::BTreeMap;
use tracing::debug;

use crate::utils::round6;

/// Slack allowed between the rounded total and the rounded ceiling.
const CLAMP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct FinalClampStage {
    budget_min_usd: f64,
}

impl FinalClampStage {
    pub fn new(budget_min_usd: f64) -> Self {
        Self {
            budget_min_usd: budget_min_usd.max(0.0),
        }
    }

    /// Bring `sum(targets)` under `ceiling_usd`, then zero dust.
    ///
    /// Surplus is taken from symbols in reverse lexicographic order. The dust
    /// pass runs after the surplus reduction. Returns the USD removed.
    pub fn apply(&self, targets: &mut BTreeMap<String, f64>, ceiling_usd: f64) -> f64 {
        for value in targets.values_mut() {
            *value = round6(value.max(0.0));
        }

        let total = round6(targets.values().sum());
        let ceiling = round6(ceiling_usd.max(0.0));
        let mut removed = 0.0;

        if total > ceiling + CLAMP_EPSILON {
            let mut excess = round6(total - ceiling);
            debug!(total, ceiling, excess, "Reducing surplus");
            for (symbol, value) in targets.iter_mut().rev() {
                if excess <= 0.0 {
                    break;
                }
                let take = value.min(excess);
                *value = round6((*value - take).max(0.0));
                excess = round6(excess - take);
                removed += take;
                debug!(symbol = %symbol, take, remaining = excess, "Surplus taken");
            }
        }

        for value in targets.values_mut() {
            if *value < self.budget_min_usd {
                *value = 0.0;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_under_ceiling_untouched() {
        let stage = FinalClampStage::new(0.0);
        let mut t = targets(&[("A", 300.0), ("B", 200.0)]);
        assert_eq!(stage.apply(&mut t, 500.0), 0.0);
        assert_eq!(t["A"], 300.0);
        assert_eq!(t["B"], 200.0);
    }

    #[test]
    fn test_surplus_taken_from_last_symbol_first() {
        let stage = FinalClampStage::new(0.0);
        let mut t = targets(&[("A", 300.0), ("B", 200.0), ("C", 100.0)]);
        let removed = stage.apply(&mut t, 450.0);
        assert_eq!(removed, 150.0);
        assert_eq!(t["C"], 0.0);
        assert_eq!(t["B"], 150.0);
        assert_eq!(t["A"], 300.0);
        assert!(t.values().sum::<f64>() <= 450.0 + 1e-6);
    }

    #[test]
    fn test_dust_zeroed_after_surplus_reduction() {
        let stage = FinalClampStage::new(60.0);
        // Reduction leaves B at 50, which is then dust
        let mut t = targets(&[("A", 300.0), ("B", 100.0)]);
        stage.apply(&mut t, 350.0);
        assert_eq!(t["B"], 0.0);
        assert_eq!(t["A"], 300.0);
    }

    #[test]
    fn test_zero_ceiling_clears_everything() {
        let stage = FinalClampStage::new(0.0);
        let mut t = targets(&[("A", 10.0), ("B", 20.0)]);
        stage.apply(&mut t, 0.0);
        assert!(t.values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_rounds_to_six_decimals() {
        let stage = FinalClampStage::new(0.0);
        let mut t = targets(&[("A", 1.234_567_89)]);
        stage.apply(&mut t, 100.0);
        assert_eq!(t["A"], 1.234568);
    }
}
