//! Shared value normalizers for canonical mapping (`spec.md` §4.5 "Value
//! parsing (fail-fast)"). Every normalizer either returns a clean value or
//! a contract violation — there is no silent best-effort fallback.

use crate::error::MappingContractViolationError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

fn violation(
    section: &str,
    source_row_ref: &str,
    field: &str,
    raw_value: Option<&str>,
) -> MappingContractViolationError {
    MappingContractViolationError {
        section: section.to_string(),
        source_row_ref: source_row_ref.to_string(),
        field: field.to_string(),
        raw_value: raw_value.map(|s| s.to_string()),
    }
}

/// `""`, `"-"`, `"--"`, `"N/A"` normalize to null (`spec.md` §4.5
/// "Sentinels").
pub fn is_sentinel(raw: &str) -> bool {
    matches!(raw.trim(), "" | "-" | "--" | "N/A")
}

fn sentinel_or(raw: Option<&str>) -> Option<&str> {
    raw.filter(|v| !is_sentinel(v))
}

/// An optional string field: sentinels collapse to `None`.
pub fn optional_str(raw: Option<&str>) -> Option<String> {
    sentinel_or(raw).map(|s| s.to_string())
}

/// A required string field: sentinel or absent values raise a contract
/// violation.
pub fn required_str(
    raw: Option<&str>,
    section: &str,
    source_row_ref: &str,
    field: &str,
) -> Result<String, MappingContractViolationError> {
    sentinel_or(raw)
        .map(|s| s.to_string())
        .ok_or_else(|| violation(section, source_row_ref, field, raw))
}

/// Strip thousands-separator commas, then parse as fixed-decimal
/// (`spec.md` §4.5 "Decimals").
fn parse_decimal_str(raw: &str) -> Option<Decimal> {
    Decimal::from_str(&raw.replace(',', "")).ok()
}

pub fn optional_decimal(raw: Option<&str>) -> Option<Decimal> {
    sentinel_or(raw).and_then(parse_decimal_str)
}

pub fn required_decimal(
    raw: Option<&str>,
    section: &str,
    source_row_ref: &str,
    field: &str,
) -> Result<Decimal, MappingContractViolationError> {
    match sentinel_or(raw) {
        None => Err(violation(section, source_row_ref, field, raw)),
        Some(s) => parse_decimal_str(s).ok_or_else(|| violation(section, source_row_ref, field, raw)),
    }
}

pub fn optional_i64(raw: Option<&str>) -> Option<i64> {
    sentinel_or(raw).and_then(|s| s.parse::<i64>().ok())
}

pub fn required_i64(
    raw: Option<&str>,
    section: &str,
    source_row_ref: &str,
    field: &str,
) -> Result<i64, MappingContractViolationError> {
    match sentinel_or(raw) {
        None => Err(violation(section, source_row_ref, field, raw)),
        Some(s) => s
            .parse::<i64>()
            .map_err(|_| violation(section, source_row_ref, field, raw)),
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYYMMDD`, `MM/DD/YYYY`,
/// `MM/DD/YY`, `DD-Mon-YY` (`spec.md` §4.5 "Dates").
fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    // chrono's `%Y` accepts fewer than 4 digits, so a blind format list
    // lets a 2-digit-year form like "02/09/26" misparse against
    // "%Y/%m/%d" before ever reaching "%m/%d/%y". Dispatch on the
    // separator and the year segment's digit width instead.
    if let Some(segments) = split_segments(raw, '-') {
        if segments[0].len() == 4 {
            return NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
        }
        return NaiveDate::parse_from_str(raw, "%d-%b-%y").ok();
    }
    if let Some(segments) = split_segments(raw, '/') {
        if segments[0].len() == 4 {
            return NaiveDate::parse_from_str(raw, "%Y/%m/%d").ok();
        }
        let fmt = if segments[2].len() == 4 { "%m/%d/%Y" } else { "%m/%d/%y" };
        return NaiveDate::parse_from_str(raw, fmt).ok();
    }
    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(raw, "%Y%m%d").ok();
    }
    None
}

fn split_segments(raw: &str, sep: char) -> Option<[&str; 3]> {
    let mut parts = raw.split(sep);
    let a = parts.next()?;
    let b = parts.next()?;
    let c = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some([a, b, c])
}

pub fn required_date(
    raw: Option<&str>,
    section: &str,
    source_row_ref: &str,
    field: &str,
) -> Result<NaiveDate, MappingContractViolationError> {
    match sentinel_or(raw) {
        None => Err(violation(section, source_row_ref, field, raw)),
        Some(s) => parse_date_str(s).ok_or_else(|| violation(section, source_row_ref, field, raw)),
    }
}

pub fn optional_date(raw: Option<&str>) -> Option<NaiveDate> {
    sentinel_or(raw).and_then(parse_date_str)
}

/// Must resolve to an explicit UTC instant; naive local strings are
/// rejected (`spec.md` §4.5 "Timestamps"). IBKR emits either an RFC 3339
/// instant (`...Z`) or its own `YYYYMMDD;HHMMSS` pair, which this crate
/// treats as UTC only when explicitly suffixed `Z` or `UTC`.
pub fn required_timestamp_utc(
    raw: Option<&str>,
    section: &str,
    source_row_ref: &str,
    field: &str,
) -> Result<DateTime<Utc>, MappingContractViolationError> {
    let s = sentinel_or(raw).ok_or_else(|| violation(section, source_row_ref, field, raw))?;

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Some(rest) = s.strip_suffix(" UTC") {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(rest, "%Y%m%d;%H%M%S") {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    Err(violation(section, source_row_ref, field, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sentinels_normalize_to_null() {
        for s in ["", "-", "--", "N/A"] {
            assert!(is_sentinel(s), "{s} should be a sentinel");
        }
        assert!(!is_sentinel("0"));
    }

    #[test]
    fn thousands_separator_parses_exactly() {
        assert_eq!(
            required_decimal(Some("1,234.56"), "Trades", "Trades:0", "price").unwrap(),
            dec!(1234.56)
        );
    }

    #[test]
    fn required_field_with_sentinel_is_contract_violation() {
        let err = required_decimal(Some("N/A"), "Trades", "Trades:0", "price").unwrap_err();
        assert_eq!(err.field, "price");
        assert_eq!(err.raw_value.as_deref(), Some("N/A"));
    }

    #[test]
    fn optional_field_with_sentinel_is_none() {
        assert_eq!(optional_decimal(Some("N/A")), None);
    }

    #[test]
    fn rfc3339_timestamp_parses() {
        let ts = required_timestamp_utc(
            Some("2026-02-10T14:30:00Z"),
            "Trades",
            "Trades:0",
            "dateTime",
        )
        .unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-02-10T14:30:00+00:00");
    }

    #[test]
    fn naive_local_timestamp_without_zone_is_rejected() {
        let err =
            required_timestamp_utc(Some("2026-02-10 14:30:00"), "Trades", "Trades:0", "dateTime")
                .unwrap_err();
        assert_eq!(err.field, "dateTime");
    }

    #[test]
    fn alternate_date_formats_all_parse() {
        let expected = NaiveDate::from_ymd_opt(2026, 2, 9).unwrap();
        for raw in ["2026-02-09", "2026/02/09", "20260209", "02/09/2026", "02/09/26", "09-Feb-26"] {
            assert_eq!(
                required_date(Some(raw), "CashTransactions", "x", "reportDate").unwrap(),
                expected,
                "failed to parse {raw}"
            );
        }
    }
}
