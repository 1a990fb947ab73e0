//! Amount normalization and free-text field cleanup for gateway fields.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::PaymentError;

/// Ordinal indicators the gateway rejects even though Unicode classifies them as letters.
const STRIPPED: [char; 2] = ['º', 'ª'];

/// Punctuation accepted by the gateway's address grammar.
const ALLOWED_PUNCTUATION: &[char] = &[' ', ',', '.', '-', '/', '(', ')', '\'', '&', '#'];

/// Convert a decimal amount string (e.g. "123.45") into integer minor units ("12345").
///
/// Rounds half away from zero, which for the accepted (positive) range is round-half-up.
pub fn to_minor_units(amount: &str) -> Result<String, PaymentError> {
    let trimmed = amount.trim();
    let value = Decimal::from_str(trimmed)
        .map_err(|_| PaymentError::InvalidAmount(format!("not a decimal number: {trimmed:?}")))?;
    decimal_to_minor_units(value)
}

/// Same as [`to_minor_units`] for an already parsed amount.
pub fn decimal_to_minor_units(value: Decimal) -> Result<String, PaymentError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(PaymentError::InvalidAmount(format!(
            "amount must not be negative: {value}"
        )));
    }

    let minor = value
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| PaymentError::InvalidAmount(format!("amount out of range: {value}")))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    if minor <= Decimal::ZERO {
        return Err(PaymentError::InvalidAmount(format!(
            "amount must be positive: {value}"
        )));
    }

    Ok(minor.normalize().to_string())
}

/// True when `value` has no digits past the second decimal place.
pub fn has_whole_cents(value: Decimal) -> bool {
    value.normalize().scale() <= 2
}

fn is_allowed(c: char) -> bool {
    c.is_alphabetic() || c.is_ascii_digit() || ALLOWED_PUNCTUATION.contains(&c)
}

/// Remove ordinal indicators, blank out anything outside the allow-list, then trim.
pub fn sanitize_field(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !STRIPPED.contains(c))
        .map(|c| if is_allowed(c) { c } else { ' ' })
        .collect();
    cleaned.trim().to_string()
}
