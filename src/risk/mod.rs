//! Risk controls applied before sizing.
//!
//! - Intraday caps hard stop and position skew freeze/bias
//! - High-water mark and drawdown softening of the budget

mod drawdown;
mod guards;

pub use drawdown::{DrawdownSoftener, HighWaterMark, SoftFactor};
pub use guards::{
    color_of, select_biased_color, CapsCheck, CapsTelemetry, GuardDecision, GuardGateway,
    IntradayCapsGuard, PositionSkewGuard, SkewDecision, ThresholdCapsGuard, ThresholdSkewGuard,
    DEFAULT_COLOR,
};

#[cfg(test)]
pub use guards::{MockIntradayCapsGuard, MockPositionSkewGuard};
