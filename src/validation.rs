//! Input validation for capability arguments
//!
//! Tickers and date ranges are normalized here before any capability
//! touches the remote data source. Everything in this module is pure.

use crate::error::OrchestrationError;
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Accepted date layouts, tried in this order.
///
/// The order decides ambiguous inputs: `03/04/2024` parses as
/// `DD/MM/YYYY` (3 April), never as `MM/DD/YYYY`. Callers that mean
/// month-first must send a date that is invalid day-first (e.g. `12/31/2024`)
/// or use ISO form.
pub const ACCEPTED_DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y"];

/// Normalized security identifier (trimmed, uppercase, non-empty).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive calendar range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(OrchestrationError::validation("start after end"));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Trim and uppercase a raw ticker.
pub fn normalize_ticker(raw: &str) -> Result<Ticker> {
    let normalized = raw.trim().to_uppercase();
    if normalized.is_empty() {
        return Err(OrchestrationError::validation("empty ticker"));
    }
    Ok(Ticker(normalized))
}

/// Parse a single date against [`ACCEPTED_DATE_FORMATS`], first match wins.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    ACCEPTED_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

/// Build a [`DateRange`] from two raw date strings.
pub fn normalize_date_range(raw_start: &str, raw_end: &str) -> Result<DateRange> {
    let start = parse_date(raw_start).ok_or_else(|| invalid_format(raw_start))?;
    let end = parse_date(raw_end).ok_or_else(|| invalid_format(raw_end))?;
    DateRange::new(start, end)
}

fn invalid_format(raw: &str) -> OrchestrationError {
    OrchestrationError::validation(format!(
        "invalid date format: '{}' (use YYYY-MM-DD, DD-MM-YYYY, DD/MM/YYYY or MM/DD/YYYY)",
        raw.trim()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_ticker_is_trimmed_and_uppercased() {
        assert_eq!(normalize_ticker("  aapl ").unwrap().as_str(), "AAPL");
        assert_eq!(normalize_ticker("reliance.ns").unwrap().as_str(), "RELIANCE.NS");
    }

    #[test]
    fn test_blank_ticker_rejected() {
        let err = normalize_ticker("   ").unwrap_err();
        assert_eq!(err.to_string(), "empty ticker");
    }

    #[test]
    fn test_all_accepted_formats_normalize_to_iso() {
        let cases = [
            ("2024-01-05", ymd(2024, 1, 5)),
            ("05-01-2024", ymd(2024, 1, 5)),
            ("05/01/2024", ymd(2024, 1, 5)),
            ("12/31/2024", ymd(2024, 12, 31)),
        ];

        for (raw, expected) in cases {
            assert_eq!(parse_date(raw), Some(expected), "input {}", raw);
        }

        let range = normalize_date_range("01-01-2024", " 2024-01-05 ").unwrap();
        assert_eq!(range.to_string(), "2024-01-01..2024-01-05");
    }

    #[test]
    fn test_ambiguous_date_resolves_day_first() {
        assert_eq!(parse_date("03/04/2024"), Some(ymd(2024, 4, 3)));
    }

    #[test]
    fn test_unknown_formats_rejected() {
        for raw in ["2024/01/05", "Jan 5 2024", "", "2024-13-01", "31/02/2024"] {
            let err = normalize_date_range(raw, "2024-01-05").unwrap_err();
            assert!(
                err.to_string().starts_with("invalid date format"),
                "input {:?} gave {}",
                raw,
                err
            );
        }
    }

    #[test]
    fn test_start_after_end_rejected() {
        let err = normalize_date_range("2024-02-10", "2024-01-01").unwrap_err();
        assert_eq!(err.to_string(), "start after end");
    }

    #[test]
    fn test_single_day_range_allowed() {
        let range = tokio_test::assert_ok!(normalize_date_range("2024-01-05", "05/01/2024"));
        assert_eq!(range.start(), range.end());
    }
}
