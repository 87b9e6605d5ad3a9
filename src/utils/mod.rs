//! Utility functions for formatting, rounding and the reporting calendar
//!
//! Centralizes display of PLN amounts, the 2-decimal money boundary and the
//! Europe/Warsaw calendar that decides which tax year an order belongs to.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::{Decimal, RoundingStrategy};

/// Timezone whose calendar defines tax years and rate dates
pub const REPORTING_TZ: Tz = chrono_tz::Europe::Warsaw;

/// Reporting currency every total is converted into
pub const REPORTING_CURRENCY: &str = "PLN";

/// Scale kept for intermediate unit-cost division
pub const INTERNAL_SCALE: u32 = 18;

/// Tax year of an instant, taken in the reporting timezone (not UTC).
///
/// # Examples
/// ```
/// use chrono::{TimeZone, Utc};
/// use pitax::utils::tax_year;
///
/// // 23:30 UTC on New Year's Eve is already January 1st in Warsaw.
/// let instant = Utc.with_ymd_and_hms(2023, 12, 31, 23, 30, 0).unwrap();
/// assert_eq!(tax_year(instant), 2024);
/// ```
pub fn tax_year(instant: DateTime<Utc>) -> i32 {
    instant.with_timezone(&REPORTING_TZ).year()
}

/// Calendar date of an instant in the reporting timezone
pub fn reporting_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&REPORTING_TZ).date_naive()
}

/// Round to exactly two decimal places, half-up (midpoint away from zero).
///
/// # Examples
/// ```
/// use pitax::utils::round_money;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(round_money(dec!(1.005)).to_string(), "1.01");
/// assert_eq!(round_money(dec!(26)).to_string(), "26.00");
/// ```
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Round an intermediate value to the internal working scale
pub fn round_internal(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(INTERNAL_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Format a Decimal using Polish locale conventions:
/// - Thousands separator: ` ` (space)
/// - Decimal separator: `,` (comma)
/// - Suffix: ` zł`
///
/// `width` right-aligns the result (0 for no padding).
pub fn format_pln_with_width(value: Decimal, width: usize) -> String {
    let is_negative = value < Decimal::ZERO;
    let formatted = round_money(value.abs()).to_string();
    let (integer_part, decimal_part) = formatted
        .split_once('.')
        .unwrap_or((formatted.as_str(), "00"));

    let with_separators: String = integer_part
        .chars()
        .rev()
        .enumerate()
        .flat_map(|(i, c)| {
            if i > 0 && i % 3 == 0 {
                vec![' ', c]
            } else {
                vec![c]
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let sign = if is_negative { "-" } else { "" };
    let result = format!("{}{},{} zł", sign, with_separators, decimal_part);

    if width > 0 {
        format!("{:>width$}", result, width = width)
    } else {
        result
    }
}

/// Format as PLN: "1 234,56 zł"
///
/// # Examples
/// ```
/// use pitax::utils::format_pln;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_pln(dec!(1234.56)), "1 234,56 zł");
/// assert_eq!(format_pln(dec!(-500)), "-500,00 zł");
/// ```
pub fn format_pln(value: Decimal) -> String {
    format_pln_with_width(value, 0)
}
