//! Shared numeric helpers.

pub mod decimal;

pub use decimal::{clamp_f64, clamp_unit, fmt6, round6, round_dp, safe_div};
