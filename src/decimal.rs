//! Conversions between native numbers and BSON `Decimal128` (IEEE 754-2008
//! decimal128, binary integer decimal encoding).

use bson::Decimal128;

const EXPONENT_BIAS: i32 = 6176;
const MAX_EXPONENT: i32 = 6111;
const MIN_EXPONENT: i32 = -6176;
const COEFFICIENT_MASK: u128 = (1u128 << 113) - 1;

/// Assemble `coefficient * 10^exponent`. Coefficients fit in 113 bits for
/// every value this module produces.
fn encode(negative: bool, coefficient: u128, exponent: i32) -> Decimal128 {
    debug_assert!(coefficient <= COEFFICIENT_MASK);
    debug_assert!((MIN_EXPONENT..=MAX_EXPONENT).contains(&exponent));
    let biased = (exponent + EXPONENT_BIAS) as u128;
    let mut bits = (biased << 113) | (coefficient & COEFFICIENT_MASK);
    if negative {
        bits |= 1u128 << 127;
    }
    Decimal128::from_bytes(bits.to_le_bytes())
}

pub fn from_i64(n: i64) -> Decimal128 {
    encode(n < 0, n.unsigned_abs() as u128, 0)
}

/// Shortest decimal representation of `f` (NaN and infinities map to their
/// decimal128 counterparts).
pub fn from_f64(f: f64) -> Decimal128 {
    if f.is_nan() {
        return Decimal128::from_bytes((0x7c00u128 << 112).to_le_bytes());
    }
    if f.is_infinite() {
        let mut bits = 0x7800u128 << 112;
        if f < 0.0 {
            bits |= 1u128 << 127;
        }
        return Decimal128::from_bytes(bits.to_le_bytes());
    }
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return encode(f.is_sign_negative(), f.abs() as u128, 0);
    }
    // "{:e}" gives the shortest round-tripping digits, e.g. "-1.25e-3"
    let s = format!("{:e}", f);
    let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let frac_len = mantissa.split_once('.').map(|(_, frac)| frac.len() as i32).unwrap_or(0);
    let coefficient: u128 = digits.parse().unwrap_or(0);
    encode(negative, coefficient, exp - frac_len)
}

/// Nearest `f64` to the decimal value; NaN for NaN and non-canonical
/// encodings.
pub fn to_f64(d: &Decimal128) -> f64 {
    let bits = u128::from_le_bytes(d.bytes());
    let negative = bits >> 127 == 1;
    let sign = if negative { -1.0 } else { 1.0 };
    let combination = (bits >> 122) & 0x1f;
    if combination == 0x1f {
        return f64::NAN;
    }
    if combination == 0x1e {
        return sign * f64::INFINITY;
    }
    if (bits >> 125) & 0b11 == 0b11 {
        // Large-coefficient form is always out of range for decimal128.
        return sign * 0.0;
    }
    let exponent = ((bits >> 113) & 0x3fff) as i32 - EXPONENT_BIAS;
    let coefficient = bits & COEFFICIENT_MASK;
    let magnitude = if exponent < 0 {
        coefficient as f64 / 10f64.powi(-exponent)
    } else {
        coefficient as f64 * 10f64.powi(exponent)
    };
    sign * magnitude
}
