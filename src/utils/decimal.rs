//! Decimal rounding utilities for published allocation figures.
//!
//! The numeric pipeline runs on `f64`; everything that leaves the allocator
//! (targets, audit fields, clamp bookkeeping) is rounded through
//! `rust_decimal` so the same inputs always print the same digits.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places used for every published USD figure.
pub const PUBLISH_DP: u32 = 6;

/// Round a float to `dp` decimal places (banker's rounding).
///
/// Non-finite input rounds to `0.0`.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    match Decimal::from_f64(value) {
        // Parse the decimal text so the result is the nearest f64 to the
        // rounded value, identical to the literal with the same digits.
        Some(d) => d
            .round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0),
        // Outside Decimal range; nothing sensible to round.
        None => value,
    }
}

/// Round to the publishing precision (6dp).
pub fn round6(value: f64) -> f64 {
    round_dp(value, PUBLISH_DP)
}

/// Format with exactly six decimals; non-finite values print as zero.
pub fn fmt6(value: f64) -> String {
    format!("{:.6}", round6(value))
}

/// Clamp into `[lo, hi]`, mapping NaN to `lo`.
pub fn clamp_f64(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        return lo;
    }
    value.max(lo).min(hi)
}

/// Clamp into the unit interval.
pub fn clamp_unit(value: f64) -> f64 {
    clamp_f64(value, 0.0, 1.0)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Convert a fraction into whole basis points (1 bp = 0.01%).
pub fn to_basis_points(fraction: f64) -> i64 {
    (fraction * 10_000.0).round() as i64
}

/// Convert a fraction into whole permille.
pub fn to_permille(fraction: f64) -> i64 {
    (fraction * 1_000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round6_basic() {
        assert_eq!(round6(500.0), 500.0);
        assert_eq!(round6(1.23456789), 1.234568);
        assert_eq!(round6(-0.0000004), 0.0);
    }

    #[test]
    fn test_round6_non_finite_is_zero() {
        assert_eq!(round6(f64::NAN), 0.0);
        assert_eq!(round6(f64::INFINITY), 0.0);
        assert_eq!(fmt6(f64::NEG_INFINITY), "0.000000");
    }

    #[test]
    fn test_fmt6_fixed_width() {
        assert_eq!(fmt6(115.0), "115.000000");
        assert_eq!(fmt6(0.1234567), "0.123457");
    }

    #[test]
    fn test_round_dp_matches_decimal() {
        use rust_decimal::prelude::ToPrimitive;
        let expected = dec!(2.5).round_dp(0).to_f64().unwrap();
        assert_eq!(round_dp(2.5, 0), expected);
        assert_eq!(round_dp(3.5, 0), 4.0);
    }

    #[test]
    fn test_clamp_helpers() {
        assert_eq!(clamp_unit(1.5), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_f64(0.3, -0.1, 0.1), 0.1);
    }

    #[test]
    fn test_basis_points_and_permille() {
        assert_eq!(to_basis_points(0.1), 1000);
        assert_eq!(to_basis_points(0.2), 2000);
        assert_eq!(to_permille(0.5), 500);
        assert_eq!(safe_div(1.0, 0.0), 0.0);
    }
}
