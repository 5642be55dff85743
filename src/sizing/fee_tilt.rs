//! Fee-tier aware up-scaling of targets.
//!
//! When rolling turnover is close to the next fee tier and reaching it
//! lowers the blended fee enough, every target is scaled up by a small
//! uniform tilt. The tilt never exceeds `min(fee_bias_cap, 0.10)` nor the
//! remaining headroom below the soft budget ceiling.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::config::{FeeTierConfig, FeesConfig};
use crate::effects::{counter, Effect};
use crate::utils::round6;

/// Hard ceiling on the fee tilt.
pub const MAX_FEE_TILT: f64 = 0.10;

/// Fraction of the bps improvement converted into tilt.
const TILT_PER_BPS: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeTier {
    pub level: u32,
    pub min_turnover_usd: f64,
    pub maker_bps: f64,
    pub taker_bps: f64,
}

impl From<&FeeTierConfig> for FeeTier {
    fn from(c: &FeeTierConfig) -> Self {
        Self {
            level: c.level,
            min_turnover_usd: c.min_turnover_usd,
            maker_bps: c.maker_bps,
            taker_bps: c.taker_bps,
        }
    }
}

/// Venue fee schedule keyed by rolling turnover.
pub trait FeeSchedule: Send + Sync {
    /// Tier reached at `turnover_usd`.
    fn expected_tier(&self, turnover_usd: f64) -> Option<FeeTier>;

    /// Tier following `tier`, if any.
    fn next_tier(&self, tier: &FeeTier) -> Option<FeeTier>;

    /// USD of turnover still needed for the next tier.
    fn distance_to_next_tier(&self, turnover_usd: f64) -> Option<f64> {
        let tier = self.expected_tier(turnover_usd)?;
        let next = self.next_tier(&tier)?;
        Some((next.min_turnover_usd - turnover_usd).max(0.0))
    }

    /// Blended fee for a maker/taker mix.
    fn effective_fee_bps(&self, maker_share: f64, taker_share: f64, tier: &FeeTier) -> f64 {
        maker_share * tier.maker_bps + taker_share * tier.taker_bps
    }
}

/// Ordered tier list.
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    tiers: Vec<FeeTier>,
}

impl TierTable {
    pub fn new(tiers: &[FeeTierConfig]) -> Self {
        let mut tiers: Vec<FeeTier> = tiers.iter().map(FeeTier::from).collect();
        tiers.sort_by(|a, b| a.min_turnover_usd.total_cmp(&b.min_turnover_usd));
        Self { tiers }
    }
}

impl FeeSchedule for TierTable {
    fn expected_tier(&self, turnover_usd: f64) -> Option<FeeTier> {
        self.tiers
            .iter()
            .take_while(|t| t.min_turnover_usd <= turnover_usd.max(0.0))
            .last()
            .or_else(|| self.tiers.first())
            .copied()
    }

    fn next_tier(&self, tier: &FeeTier) -> Option<FeeTier> {
        let idx = self.tiers.iter().position(|t| t.level == tier.level)?;
        self.tiers.get(idx + 1).copied()
    }
}

/// Applies the fee-tier tilt.
pub struct FeeTierTilt {
    config: FeesConfig,
    cap: f64,
    schedule: Box<dyn FeeSchedule>,
}

impl fmt::Debug for FeeTierTilt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeeTierTilt")
            .field("config", &self.config)
            .field("cap", &self.cap)
            .finish_non_exhaustive()
    }
}

impl FeeTierTilt {
    pub fn new(config: FeesConfig, fee_bias_cap: f64) -> Self {
        let schedule = Box::new(TierTable::new(&config.tiers));
        Self::with_schedule(config, fee_bias_cap, schedule)
    }

    pub fn with_schedule(config: FeesConfig, fee_bias_cap: f64, schedule: Box<dyn FeeSchedule>) -> Self {
        Self {
            config,
            cap: fee_bias_cap.clamp(0.0, MAX_FEE_TILT),
            schedule,
        }
    }

    /// Tilt implied by the schedule alone, before headroom bounding.
    pub fn candidate_tilt(&self, rolling_turnover_usd: f64) -> Option<f64> {
        let tier = self.schedule.expected_tier(rolling_turnover_usd)?;
        let next = self.schedule.next_tier(&tier)?;
        let distance = self.schedule.distance_to_next_tier(rolling_turnover_usd)?;

        let (maker, taker) = (self.config.maker_share, self.config.taker_share);
        let improvement = self.schedule.effective_fee_bps(maker, taker, &tier)
            - self.schedule.effective_fee_bps(maker, taker, &next);

        debug!(
            tier = tier.level,
            next = next.level,
            distance,
            improvement,
            "Fee tier proximity"
        );
        if distance <= self.config.distance_usd_threshold
            && improvement >= self.config.min_improvement_bps
        {
            Some(self.cap.min(improvement.max(0.0) * TILT_PER_BPS))
        } else {
            None
        }
    }

    /// Scale `targets` up in place. Returns the applied tilt, if any.
    pub fn apply(
        &self,
        targets: &mut BTreeMap<String, f64>,
        rolling_turnover_usd: Option<f64>,
        ceiling_usd: f64,
    ) -> (Option<f64>, Vec<Effect>) {
        let mut effects = Vec::new();
        if !self.config.enabled || self.cap <= 0.0 {
            return (None, effects);
        }
        let Some(turnover) = rolling_turnover_usd.filter(|t| t.is_finite()) else {
            debug!("No rolling turnover, fee tilt skipped");
            return (None, effects);
        };
        let Some(mut tilt) = self.candidate_tilt(turnover) else {
            return (None, effects);
        };

        let total: f64 = targets.values().sum();
        if total > 0.0 && ceiling_usd > 0.0 {
            let headroom = (ceiling_usd / total - 1.0).max(0.0);
            tilt = tilt.min(headroom);
        }
        if tilt <= 0.0 {
            return (None, effects);
        }

        for value in targets.values_mut() {
            let scaled = (*value * (1.0 + tilt)).min(*value * (1.0 + self.cap));
            *value = round6(scaled);
        }
        info!(tilt, turnover, "Fee tier tilt applied");
        effects.push(Effect::counter(counter::FEE_TILT_APPLIED_TOTAL, 1.0));
        (Some(tilt), effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TierTable {
        TierTable::new(&FeesConfig::default().tiers)
    }

    fn targets(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    // =========================================================================
    // Tier table
    // =========================================================================

    #[test]
    fn test_expected_tier_and_distance() {
        let t = table();
        assert_eq!(t.expected_tier(0.0).unwrap().level, 0);
        assert_eq!(t.expected_tier(999_999.0).unwrap().level, 0);
        assert_eq!(t.expected_tier(1_000_000.0).unwrap().level, 1);
        assert_eq!(t.expected_tier(1e12).unwrap().level, 3);

        assert_eq!(t.distance_to_next_tier(990_000.0), Some(10_000.0));
        assert_eq!(t.distance_to_next_tier(30_000_000.0), None);
    }

    #[test]
    fn test_effective_fee() {
        let t = table();
        let tier = t.expected_tier(1_000_000.0).unwrap();
        // 0.8 × 6.75 + 0.2 × 8.0
        assert!((t.effective_fee_bps(0.8, 0.2, &tier) - 7.0).abs() < 1e-12);
    }

    // =========================================================================
    // Tilt
    // =========================================================================

    #[test]
    fn test_tilt_near_tier_bounded_by_cap() {
        let tilt = FeeTierTilt::new(FeesConfig::default(), 0.05);
        // L0 → L1 improvement = 10 − 7 = 3 bps → 0.06, capped at 0.05
        let mut t = targets(&[("A", 100.0), ("B", 100.0)]);
        let (applied, effects) = tilt.apply(&mut t, Some(990_000.0), 1_000.0);
        assert_eq!(applied, Some(0.05));
        assert_eq!(t["A"], 105.0);
        assert_eq!(effects, vec![Effect::counter(counter::FEE_TILT_APPLIED_TOTAL, 1.0)]);
    }

    #[test]
    fn test_tilt_bounded_by_headroom() {
        let tilt = FeeTierTilt::new(FeesConfig::default(), 0.10);
        let mut t = targets(&[("A", 100.0), ("B", 100.0)]);
        let (applied, _) = tilt.apply(&mut t, Some(990_000.0), 202.0);
        assert!((applied.unwrap() - 0.01).abs() < 1e-12);
        assert!((t.values().sum::<f64>() - 202.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_tilt_when_far_from_tier() {
        let tilt = FeeTierTilt::new(FeesConfig::default(), 0.05);
        let mut t = targets(&[("A", 100.0)]);
        let (applied, effects) = tilt.apply(&mut t, Some(500_000.0), 1_000.0);
        assert_eq!(applied, None);
        assert!(effects.is_empty());
        assert_eq!(t["A"], 100.0);
    }

    #[test]
    fn test_no_tilt_without_turnover_or_headroom() {
        let tilt = FeeTierTilt::new(FeesConfig::default(), 0.05);
        let mut t = targets(&[("A", 100.0)]);
        assert_eq!(tilt.apply(&mut t, None, 1_000.0).0, None);
        assert_eq!(tilt.apply(&mut t, Some(990_000.0), 100.0).0, None);
        assert_eq!(t["A"], 100.0);
    }

    #[test]
    fn test_cap_never_exceeds_ten_percent() {
        let config = FeesConfig {
            tiers: vec![
                FeeTierConfig {
                    level: 0,
                    min_turnover_usd: 0.0,
                    maker_bps: 20.0,
                    taker_bps: 20.0,
                },
                FeeTierConfig {
                    level: 1,
                    min_turnover_usd: 1_000_000.0,
                    maker_bps: 5.0,
                    taker_bps: 5.0,
                },
            ],
            ..FeesConfig::default()
        };
        // 15 bps improvement would ask for 0.3
        let tilt = FeeTierTilt::new(config, 0.5);
        assert_eq!(tilt.candidate_tilt(990_000.0), Some(MAX_FEE_TILT));
    }

    #[test]
    fn test_disabled() {
        let tilt = FeeTierTilt::new(
            FeesConfig {
                enabled: false,
                ..FeesConfig::default()
            },
            0.05,
        );
        let mut t = targets(&[("A", 100.0)]);
        assert_eq!(tilt.apply(&mut t, Some(990_000.0), 1_000.0).0, None);
    }
}
