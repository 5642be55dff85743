//! Target sizing stages, in pipeline order:
//! - attenuation (cost, fill rate, liquidity, turnover)
//! - micro-signal bias on the desired delta
//! - rate limiting with backoff
//! - fee-tier tilt
//! - final clamp and dust removal

mod attenuation;
mod backoff;
mod fee_tilt;
mod final_clamp;
mod micro_bias;

pub use attenuation::{
    estimate_cost, fill_rate_attenuation, liquidity_attenuation, turnover_attenuation,
    AttenuationStages, CalibratedCost, CostEstimate, SymbolReadings,
};
pub use backoff::{BackoffState, LimitStep, RateLimiter};
pub use fee_tilt::{FeeSchedule, FeeTier, FeeTierTilt, TierTable, MAX_FEE_TILT};
pub use final_clamp::FinalClampStage;
pub use micro_bias::{BookSignals, MicroBiasInjector, MicroSignals, MicroSnapshot};
