//! Weight computation.
//!
//! - `projector`: capped-simplex projection shared by every mode
//! - `weights`: manual / inverse-volatility / risk-parity raw weights
//! - `risk_parity`: equal-risk-contribution solver

pub mod projector;
pub mod risk_parity;
pub mod weights;

pub use projector::{CappedSimplexProjector, SUM_TOLERANCE};
pub use risk_parity::RiskParitySolver;
pub use weights::{smooth_weights, AllocationMode, SymbolStats, VolCache, WeightComputer, Weights};
