//! Money Module
//!
//! All ledger amounts are `rust_decimal::Decimal` with two fractional digits,
//! matching the `NUMERIC(15,2)` storage columns. Client input goes through
//! [`parse_amount`] / [`validate_amount`]; computed values (fees, percentages)
//! go through [`round_money`]. No floating point anywhere.
//!
//! ## Usage
//! ```rust
//! use payledger::money::{parse_amount, round_money, percent_of};
//! use rust_decimal::Decimal;
//!
//! let amount = parse_amount("30.00").unwrap();
//! let fee = round_money(percent_of(amount, Decimal::new(290, 2)) + Decimal::new(30, 2));
//! assert_eq!(fee.to_string(), "1.17");
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Fractional digits kept for every stored amount
pub const MONEY_SCALE: u32 = 2;

/// Largest representable amount in a `NUMERIC(15,2)` column
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_764_472_319, 232_830, 0, false, 2); // 9_999_999_999_999.99

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Parse: Client → Ledger
// ============================================================================

/// Parse a client-provided amount string.
///
/// Strict: no signs, no exponent, no thousands separators, both sides of the
/// dot required, at most [`MONEY_SCALE`] fractional digits, strictly positive.
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    if frac.len() > MONEY_SCALE as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: MONEY_SCALE,
        });
    }

    let value: Decimal = amount_str.parse().map_err(|_| MoneyError::Overflow)?;
    validate_amount(value)
}

/// Validate an already-typed amount (JSON boundary or internal callers).
pub fn validate_amount(amount: Decimal) -> Result<Decimal, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = amount.normalize();
    if normalized.scale() > MONEY_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: MONEY_SCALE,
        });
    }

    if amount > MAX_AMOUNT {
        return Err(MoneyError::Overflow);
    }

    Ok(with_scale(amount))
}

/// Validate a fee value: zero allowed, otherwise same rules as an amount.
pub fn validate_fee(fee: Decimal) -> Result<Decimal, MoneyError> {
    if fee.is_zero() {
        return Ok(with_scale(Decimal::ZERO));
    }
    validate_amount(fee)
}

// ============================================================================
// Arithmetic helpers
// ============================================================================

/// Round a computed value to cents, half away from zero.
#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    with_scale(value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

/// `amount * percentage / 100`, unrounded.
#[inline]
pub fn percent_of(amount: Decimal, percentage: Decimal) -> Decimal {
    amount * percentage / Decimal::ONE_HUNDRED
}

/// Fixed two-digit scale so `30` and `30.00` print and compare the same way.
#[inline]
fn with_scale(value: Decimal) -> Decimal {
    let mut v = value.normalize();
    v.rescale(MONEY_SCALE);
    v
}

/// Display form used in logs and notifications
pub fn format_money(value: Decimal, currency: &str) -> String {
    format!("{} {:.2}", currency, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_amount_variations() {
        assert_eq!(parse_amount("1.23").unwrap(), d("1.23"));
        assert_eq!(parse_amount("001.20").unwrap(), d("1.20"));
        assert_eq!(parse_amount("30").unwrap().to_string(), "30.00");

        assert_eq!(parse_amount("0"), Err(MoneyError::InvalidAmount));
        assert_eq!(parse_amount("0.00"), Err(MoneyError::InvalidAmount));
    }

    #[test]
    fn test_parse_amount_invalid_formats() {
        let cases = ["1,000.00", "1.2.3", "1. 23", "+1.23", "-5", "1e2", "0x12", ".", ".5", "5.", ""];
        for case in cases {
            assert!(parse_amount(case).is_err(), "Should reject: {:?}", case);
        }
    }

    #[test]
    fn test_parse_amount_precision_limit() {
        assert!(matches!(
            parse_amount("1.234"),
            Err(MoneyError::PrecisionOverflow { provided: 3, max: 2 })
        ));
    }

    #[test]
    fn test_max_amount_boundary() {
        assert_eq!(MAX_AMOUNT, d("9999999999999.99"));
        assert!(parse_amount("9999999999999.99").is_ok());
        assert_eq!(parse_amount("10000000000000.00"), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_validate_amount_trailing_zeros_accepted() {
        // 1.2300 has scale 4 but normalizes to 1.23
        assert_eq!(validate_amount(d("1.2300")).unwrap().to_string(), "1.23");
        assert!(validate_amount(d("1.231")).is_err());
        assert!(validate_amount(d("-1")).is_err());
    }

    #[test]
    fn test_validate_fee_allows_zero() {
        assert_eq!(validate_fee(Decimal::ZERO).unwrap().to_string(), "0.00");
        assert!(validate_fee(d("-0.01")).is_err());
    }

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(d("1.165")), d("1.17"));
        assert_eq!(round_money(d("1.164")), d("1.16"));
        assert_eq!(round_money(d("2")).to_string(), "2.00");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(d("30.00"), d("2.90")), d("0.87"));
        assert_eq!(percent_of(d("200"), d("0")), Decimal::ZERO);
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(d("28.83"), "USD"), "USD 28.83");
    }
}
