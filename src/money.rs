//! Conversion between stored minor units (paisa) and the decimal rupee strings
//! the payment gateway speaks. Amounts never pass through floating point.

use std::str::FromStr;

use rust_decimal::{Decimal, prelude::ToPrimitive};

use crate::error::AppError;

const MINOR_PER_MAJOR: i64 = 100;

/// `2500` -> `"25.00"`.
pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    let per = MINOR_PER_MAJOR as u64;
    format!("{sign}{}.{:02}", abs / per, abs % per)
}

/// Parse a gateway amount such as `"25"`, `"25.0"`, `"1,025.50"` into minor units.
/// More than two fractional digits is rejected rather than rounded.
pub fn parse_amount(raw: &str) -> Result<i64, AppError> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    let value = Decimal::from_str(&cleaned)
        .map_err(|_| AppError::bad_request(format!("invalid amount: {raw}")))?;
    if value.normalize().scale() > 2 {
        return Err(AppError::bad_request(format!(
            "amount has more than two decimals: {raw}"
        )));
    }
    value
        .checked_mul(Decimal::from(MINOR_PER_MAJOR))
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| AppError::bad_request(format!("amount out of range: {raw}")))
}
