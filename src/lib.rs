//! # Portfolio Allocator
//!
//! Deterministic budget and order-level allocation across a basket of
//! market-making symbols.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `allocation`: Weight computation (manual, inverse-vol, risk parity) and projection
//! - `risk`: Intraday caps, position skew guards, drawdown softening
//! - `sizing`: Attenuation, micro bias, rate limiting, fee tilt, final clamp
//! - `engine`: The allocation cycle tying the stages together
//! - `effects`: Audit records, gauges and counters emitted by the cycle
//! - `persistence`: JSON snapshot of the equity high-water mark
//! - `utils`: Shared rounding and numeric helpers

pub mod allocation;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod risk;
pub mod sizing;
pub mod utils;

pub use config::Config;
pub use engine::{AllocationRequest, CycleInputs, CycleOutcome, PortfolioAllocator, PortfolioTarget};
pub use error::{AllocatorError, AllocatorResult};
