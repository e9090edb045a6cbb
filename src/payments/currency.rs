//! Currency policy
//!
//! Amounts travel through the service as [`Decimal`] and are converted to
//! integer minor units only at the gateway boundary and for minimum checks.

use crate::error::{AppError, AppResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;

/// Minimum charge used for currencies missing from [`MINIMUM_AMOUNTS`]
pub const DEFAULT_MINIMUM_AMOUNT: i64 = 50;

/// Per-currency minimum charge, in minor units
pub const MINIMUM_AMOUNTS: &[(&str, i64)] = &[
    ("USD", 50),
    ("EUR", 50),
    ("GBP", 30),
    ("AUD", 50),
    ("CAD", 50),
    ("CHF", 50),
    ("DKK", 250),
    ("NOK", 300),
    ("SEK", 300),
    ("JPY", 50),
    ("MXN", 1000),
    ("BRL", 50),
    ("HKD", 400),
    ("SGD", 50),
    ("MYR", 200),
    // Malagasy ariary, configured as "Ar"
    ("AR", 20000),
];

fn normalize(currency_code: &str) -> String {
    currency_code.trim().to_ascii_uppercase()
}

fn lookup_minimum(currency_code: &str) -> Option<i64> {
    let code = normalize(currency_code);
    MINIMUM_AMOUNTS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, minimum)| *minimum)
}

/// Convert a decimal amount to minor units, rounding half-up
pub fn convert_to_cents(amount: Decimal) -> AppResult<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|cents| cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| AppError::validation(format!("Amount {} is out of range", amount)))
}

pub fn convert_from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub fn get_minimum_amount(currency_code: &str) -> i64 {
    match lookup_minimum(currency_code) {
        Some(minimum) => minimum,
        None => {
            warn!(
                currency = currency_code,
                default_minimum = DEFAULT_MINIMUM_AMOUNT,
                "No minimum amount configured for currency, using default"
            );
            DEFAULT_MINIMUM_AMOUNT
        }
    }
}

pub fn validate_amount(amount_cents: i64, currency_code: &str) -> AppResult<()> {
    let minimum = get_minimum_amount(currency_code);
    if amount_cents < minimum {
        return Err(AppError::validation(format!(
            "Amount {} is below the minimum of {} for {}",
            convert_from_cents(amount_cents),
            convert_from_cents(minimum),
            currency_code
        )));
    }
    Ok(())
}

pub fn is_supported_currency(currency_code: &str) -> bool {
    lookup_minimum(currency_code).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minimum_amount_floor_for_every_currency() {
        for (currency, minimum) in MINIMUM_AMOUNTS {
            assert!(
                validate_amount(minimum - 1, currency).is_err(),
                "{} below minimum must be rejected",
                currency
            );
            assert!(
                validate_amount(*minimum, currency).is_ok(),
                "{} at minimum must be accepted",
                currency
            );
        }
    }

    #[test]
    fn test_usd_floor() {
        let err = validate_amount(49, "USD").unwrap_err();
        assert!(err.is_validation());
        assert!(validate_amount(50, "USD").is_ok());
    }

    #[test]
    fn test_ariary_lookup_is_case_insensitive() {
        assert_eq!(get_minimum_amount("Ar"), 20000);
        assert_eq!(get_minimum_amount("AR"), 20000);
        assert!(is_supported_currency("Ar"));
    }

    #[test]
    fn test_unknown_currency_uses_default() {
        assert_eq!(get_minimum_amount("XOF"), DEFAULT_MINIMUM_AMOUNT);
        assert!(!is_supported_currency("XOF"));
    }

    #[test]
    fn test_convert_to_cents_rounds_half_up() {
        assert_eq!(convert_to_cents(dec!(10.005)).unwrap(), 1001);
        assert_eq!(convert_to_cents(dec!(10.004)).unwrap(), 1000);
        assert_eq!(convert_to_cents(dec!(20000)).unwrap(), 2_000_000);
        assert_eq!(convert_to_cents(dec!(0.5)).unwrap(), 50);
    }

    #[test]
    fn test_convert_from_cents() {
        assert_eq!(convert_from_cents(1999), dec!(19.99));
        assert_eq!(convert_from_cents(2_000_000).to_string(), "20000.00");
    }

    #[test]
    fn test_convert_to_cents_out_of_range() {
        assert!(convert_to_cents(Decimal::MAX).is_err());
    }
}
