//! Fixed-point decimal helpers.
//!
//! Decimals travel as their canonical text form inside [`Value::Decimal`]
//! so no precision is lost between validation and storage. This module
//! parses that text into a [`rust_decimal::Decimal`], counts digits for
//! `max_digits`/`decimal_places` constraints, and quantizes to a column
//! scale.
//!
//! [`Value::Decimal`]: crate::Value::Decimal

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Parse `[+-]digits[.digits]`. Exponents are rejected.
pub fn parse(text: &str) -> Option<Decimal> {
    Decimal::from_str(text.trim()).ok()
}

/// Decimal for a float, taken from the shortest text that round-trips.
///
/// `1.1` becomes `1.1`, not the binary expansion of the nearest double.
pub fn from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

/// Integral value as an `i64`; `None` for fractions or out-of-range values.
pub fn to_i64(value: &Decimal) -> Option<i64> {
    if value.fract().is_zero() {
        value.to_i64()
    } else {
        None
    }
}

/// Decimal places after trailing zeros are dropped.
pub fn decimal_places(value: &Decimal) -> u32 {
    value.normalize().scale()
}

/// Digits before the decimal point, ignoring leading zeros.
pub fn whole_digits(value: &Decimal) -> u32 {
    digit_count(value.trunc().mantissa().unsigned_abs())
}

/// Total significant digits as counted for a `max_digits` constraint.
pub fn total_digits(value: &Decimal) -> u32 {
    whole_digits(value) + decimal_places(value)
}

/// Round half away from zero to exactly `scale` decimal places.
pub fn quantize(value: Decimal, scale: u32) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded
}

fn digit_count(mantissa: u128) -> u32 {
    mantissa.checked_ilog10().map_or(0, |log| log + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantized(text: &str, scale: u32) -> String {
        quantize(parse(text).unwrap(), scale).to_string()
    }

    #[test]
    fn test_parse_and_count_digits() {
        let d = parse("001.100").unwrap();
        assert_eq!(whole_digits(&d), 1);
        assert_eq!(decimal_places(&d), 1);
        assert_eq!(total_digits(&d), 2);

        let small = parse("0.001").unwrap();
        assert_eq!(total_digits(&small), 3);
        assert_eq!(whole_digits(&parse("-120.5").unwrap()), 3);
        assert!(parse("1e5").is_none());
        assert!(parse(".").is_none());
        assert!(parse("abc").is_none());
    }

    #[test]
    fn test_quantize_pads_and_rounds() {
        assert_eq!(quantized("1.1", 3), "1.100");
        assert_eq!(quantized("2.3456", 3), "2.346");
        assert_eq!(quantized("2.3455", 3), "2.346");
        assert_eq!(quantized("9.9996", 3), "10.000");
        assert_eq!(quantized("-0.0004", 3), "0.000");
        assert_eq!(quantized("-12", 0), "-12");
    }

    #[test]
    fn test_from_f64() {
        assert_eq!(from_f64(1.1).map(|d| d.to_string()).as_deref(), Some("1.1"));
        assert_eq!(from_f64(-0.25).map(|d| d.to_string()).as_deref(), Some("-0.25"));
        assert_eq!(from_f64(f64::NAN), None);
        assert_eq!(from_f64(f64::INFINITY), None);
    }

    #[test]
    fn test_to_i64() {
        assert_eq!(to_i64(&parse("42.000").unwrap()), Some(42));
        assert_eq!(to_i64(&parse("42.5").unwrap()), None);
    }
}
