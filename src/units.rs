//! Conversions between human-readable values and their ledger-native form.
//!
//! Amounts are fixed-point integers scaled by `10^precision`; timestamps are
//! milliseconds since the Unix epoch. All functions here are pure.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// Fractional digits of the ledger's native currency unit.
pub const DEFAULT_PRECISION: u32 = 18;

/// Largest precision whose scale factor still fits in a `u128`.
pub const MAX_PRECISION: u32 = 38;

/// Shortest all-digit input read as epoch milliseconds (1971-09 onwards).
/// Shorter digit strings such as `20240101` are rejected, not misread.
const MIN_MILLIS_DIGITS: usize = 12;

/// Naive layouts accepted by [`to_ledger_timestamp`], interpreted as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("invalid amount {input:?}: {reason}")]
    InvalidAmount { input: String, reason: &'static str },

    #[error("invalid timestamp {input:?}: not a recognizable date")]
    InvalidTimestamp { input: String },
}

/// Converts a decimal string such as `"1.5"` into a fixed-point integer.
///
/// Fractional digits beyond `precision` are rejected unless they are all
/// zeros; nothing is ever rounded away.
pub fn to_ledger_amount(decimal: &str, precision: u32) -> Result<u128, UnitError> {
    let invalid = |reason| UnitError::InvalidAmount {
        input: decimal.to_string(),
        reason,
    };

    if precision > MAX_PRECISION {
        return Err(invalid("precision out of range"));
    }

    let trimmed = decimal.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (trimmed, None),
    };

    if whole.is_empty() && fraction.is_none_or(str::is_empty) {
        return Err(invalid("empty amount"));
    }
    if fraction.is_some_and(str::is_empty) {
        return Err(invalid("missing fractional digits"));
    }
    if !is_digits(whole) || !fraction.is_none_or(is_digits) {
        return Err(invalid("not a non-negative decimal number"));
    }

    let mut fraction = fraction.unwrap_or_default();
    let precision_len = precision as usize;
    if fraction.len() > precision_len {
        let (kept, excess) = fraction.split_at(precision_len);
        if excess.bytes().any(|b| b != b'0') {
            return Err(invalid("more fractional digits than the ledger precision"));
        }
        fraction = kept;
    }

    let scale = 10u128
        .checked_pow(precision)
        .ok_or_else(|| invalid("precision out of range"))?;
    let fraction_scale = 10u128
        .checked_pow(precision - fraction.len() as u32)
        .ok_or_else(|| invalid("precision out of range"))?;

    let whole_units = parse_digits(whole)
        .and_then(|units| units.checked_mul(scale))
        .ok_or_else(|| invalid("exceeds the ledger amount range"))?;
    let fraction_units = parse_digits(fraction)
        .and_then(|units| units.checked_mul(fraction_scale))
        .ok_or_else(|| invalid("exceeds the ledger amount range"))?;

    whole_units
        .checked_add(fraction_units)
        .ok_or_else(|| invalid("exceeds the ledger amount range"))
}

/// Renders a fixed-point integer as a normalized decimal string.
///
/// Trailing fractional zeros are dropped, so `1500000000000000000` at
/// precision 18 renders as `"1.5"` and whole amounts carry no dot.
pub fn from_ledger_amount(amount: u128, precision: u32) -> String {
    let digits = amount.to_string();
    if precision == 0 {
        return digits;
    }

    let precision_len = precision as usize;
    let padded = if digits.len() <= precision_len {
        format!("{}{}", "0".repeat(precision_len + 1 - digits.len()), digits)
    } else {
        digits
    };

    let (whole, fraction) = padded.split_at(padded.len() - precision_len);
    let fraction = fraction.trim_end_matches('0');

    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}

/// Converts a date-like string to ledger-native milliseconds since epoch.
///
/// Accepts RFC 3339 timestamps, naive date-times and plain `YYYY-MM-DD`
/// dates (both read as UTC), or a string of at least 12 digits that is
/// already a millisecond count.
pub fn to_ledger_timestamp(date_like: &str) -> Result<u64, UnitError> {
    let invalid = || UnitError::InvalidTimestamp {
        input: date_like.to_string(),
    };

    let input = date_like.trim();
    if is_digits(input) && !input.is_empty() {
        if input.len() < MIN_MILLIS_DIGITS {
            return Err(invalid());
        }
        return input.parse::<u64>().map_err(|_| invalid());
    }

    let parsed = DateTime::parse_from_rfc3339(input)
        .map(|datetime| datetime.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NAIVE_DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
        .ok_or_else(invalid)?;

    datetime_to_ledger_timestamp(parsed).map_err(|_| invalid())
}

/// Converts an already-parsed instant; instants before the epoch are rejected.
pub fn datetime_to_ledger_timestamp(datetime: DateTime<Utc>) -> Result<u64, UnitError> {
    u64::try_from(datetime.timestamp_millis()).map_err(|_| UnitError::InvalidTimestamp {
        input: datetime.to_rfc3339(),
    })
}

fn is_digits(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_digit())
}

fn parse_digits(digits: &str) -> Option<u128> {
    digits.bytes().try_fold(0u128, |acc, b| {
        acc.checked_mul(10)?.checked_add(u128::from(b - b'0'))
    })
}
