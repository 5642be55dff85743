//! High-water mark tracking and drawdown-based budget softening.
//!
//! The softening factor is computed in fixed point (basis points and
//! permille) so identical inputs always produce identical factors.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::BudgetConfig;
use crate::utils::decimal::{to_basis_points, to_permille};

const PERMILLE: i64 = 1_000;

/// Shared equity high-water mark.
///
/// Cloning yields another handle to the same watermark, so an admin task can
/// reset it while the allocation loop keeps observing equity.
#[derive(Debug, Clone, Default)]
pub struct HighWaterMark {
    inner: Arc<Mutex<f64>>,
}

impl HighWaterMark {
    pub fn new(initial: f64) -> Self {
        let hwm = Self::default();
        hwm.set(initial);
        hwm
    }

    fn lock(&self) -> MutexGuard<'_, f64> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current watermark.
    pub fn get(&self) -> f64 {
        *self.lock()
    }

    /// Raise the watermark to `equity` if it is higher. Returns the
    /// watermark after the update.
    pub fn observe(&self, equity: f64) -> f64 {
        let mut hwm = self.lock();
        if equity.is_finite() && equity > *hwm {
            debug!(previous = *hwm, equity, "High-water mark raised");
            *hwm = equity;
        }
        *hwm
    }

    /// Overwrite the watermark. Negative or non-finite values become zero.
    pub fn set(&self, value: f64) {
        let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
        *self.lock() = value;
    }

    /// Admin reset to zero.
    pub fn reset_zero(&self) {
        self.set(0.0);
        info!("High-water mark reset to zero");
    }

    /// Admin reset to the given (usually current) equity.
    pub fn reset_to(&self, equity: f64) {
        self.set(equity);
        info!(equity = self.get(), "High-water mark reset");
    }
}

/// Result of one softening evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SoftFactor {
    pub drawdown_bps: i64,
    pub soft_permille: i64,
}

impl SoftFactor {
    /// No drawdown, full budget.
    pub const FULL: SoftFactor = SoftFactor {
        drawdown_bps: 0,
        soft_permille: PERMILLE,
    };

    /// Budget multiplier in `[0, 1]`.
    pub fn factor(&self) -> f64 {
        self.soft_permille as f64 / PERMILLE as f64
    }

    /// Drawdown as a fraction.
    pub fn drawdown_pct(&self) -> f64 {
        self.drawdown_bps as f64 / 10_000.0
    }
}

/// Converts drawdown from the high-water mark into a budget multiplier.
#[derive(Debug, Clone)]
pub struct DrawdownSoftener {
    soft_cap_bps: i64,
    pnl_sensitivity_permille: i64,
}

impl DrawdownSoftener {
    pub fn new(config: &BudgetConfig) -> Self {
        Self {
            soft_cap_bps: to_basis_points(config.drawdown_soft_cap.clamp(0.0, 1.0)),
            pnl_sensitivity_permille: to_permille(config.pnl_sensitivity.clamp(0.0, 1.0)),
        }
    }

    /// Update `hwm` with `equity` and compute the softening factor.
    ///
    /// Without an equity reading (or with a non-finite one) the budget is not
    /// softened and the watermark is left alone.
    pub fn evaluate(&self, hwm: &HighWaterMark, equity: Option<f64>) -> SoftFactor {
        let equity = match equity {
            Some(e) if e.is_finite() => e,
            Some(e) => {
                warn!(equity = e, "Non-finite equity, skipping drawdown softening");
                return SoftFactor::FULL;
            }
            None => return SoftFactor::FULL,
        };

        let peak = hwm.observe(equity);
        self.soften(peak, equity)
    }

    /// Pure softening computation for a given peak and equity.
    pub fn soften(&self, peak: f64, equity: f64) -> SoftFactor {
        let drawdown = if peak > 0.0 {
            ((peak - equity) / peak).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let drawdown_bps = to_basis_points(drawdown);

        let x_permille = if self.soft_cap_bps > 0 {
            (drawdown_bps * PERMILLE / self.soft_cap_bps).min(PERMILLE)
        } else if drawdown_bps > 0 {
            PERMILLE
        } else {
            0
        };

        let soft_permille =
            (PERMILLE - self.pnl_sensitivity_permille * x_permille / PERMILLE).clamp(0, PERMILLE);

        SoftFactor {
            drawdown_bps,
            soft_permille,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn softener(pnl_sensitivity: f64, drawdown_soft_cap: f64) -> DrawdownSoftener {
        DrawdownSoftener::new(&BudgetConfig {
            pnl_sensitivity,
            drawdown_soft_cap,
            budget_min_usd: 0.0,
        })
    }

    // =========================================================================
    // High-water mark
    // =========================================================================

    #[test]
    fn test_hwm_is_monotonic() {
        let hwm = HighWaterMark::default();
        assert_eq!(hwm.observe(1000.0), 1000.0);
        assert_eq!(hwm.observe(800.0), 1000.0);
        assert_eq!(hwm.observe(f64::NAN), 1000.0);
        assert_eq!(hwm.observe(1200.0), 1200.0);
    }

    #[test]
    fn test_hwm_reset_and_shared_handle() {
        let hwm = HighWaterMark::new(1500.0);
        let admin = hwm.clone();

        admin.reset_to(900.0);
        assert_eq!(hwm.get(), 900.0);

        admin.reset_zero();
        assert_eq!(hwm.get(), 0.0);

        hwm.set(-5.0);
        assert_eq!(admin.get(), 0.0);
    }

    // =========================================================================
    // Softening
    // =========================================================================

    #[test]
    fn test_twenty_percent_drawdown_halves_budget() {
        let s = softener(0.5, 0.1);
        let hwm = HighWaterMark::default();
        assert_eq!(s.evaluate(&hwm, Some(1000.0)), SoftFactor::FULL);

        let f = s.evaluate(&hwm, Some(800.0));
        assert_eq!(f.drawdown_bps, 2000);
        assert_eq!(f.soft_permille, 500);
        assert_eq!(f.factor(), 0.5);
    }

    #[test]
    fn test_partial_drawdown_scales_linearly() {
        let s = softener(0.5, 0.1);
        // 5% of a 10% cap → x = 500 → soft = 1000 - 250
        let f = s.soften(1000.0, 950.0);
        assert_eq!(f.drawdown_bps, 500);
        assert_eq!(f.soft_permille, 750);
    }

    #[test]
    fn test_zero_cap_softens_fully_on_any_drawdown() {
        let s = softener(0.4, 0.0);
        assert_eq!(s.soften(1000.0, 1000.0).soft_permille, 1000);
        assert_eq!(s.soften(1000.0, 999.0).soft_permille, 600);
    }

    #[test]
    fn test_missing_equity_is_neutral() {
        let s = softener(0.5, 0.1);
        let hwm = HighWaterMark::new(1000.0);
        assert_eq!(s.evaluate(&hwm, None), SoftFactor::FULL);
        assert_eq!(s.evaluate(&hwm, Some(f64::INFINITY)), SoftFactor::FULL);
        assert_eq!(hwm.get(), 1000.0);
    }

    #[test]
    fn test_larger_drawdown_never_softens_less() {
        let s = softener(0.7, 0.15);
        let mut last = i64::MAX;
        for step in 0..=100 {
            let equity = 1000.0 - step as f64 * 10.0;
            let f = s.soften(1000.0, equity);
            assert!(f.soft_permille <= last, "equity {equity}");
            assert!((0..=1000).contains(&f.soft_permille));
            last = f.soft_permille;
        }
    }

    #[test]
    fn test_zero_peak_has_no_drawdown() {
        let s = softener(0.5, 0.1);
        assert_eq!(s.soften(0.0, -50.0), SoftFactor::FULL);
    }
}
