use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::errors::ReaderError;
use crate::model::ColumnKind;

pub(crate) fn is_null(value: &str) -> bool {
    value.trim().is_empty()
}

/// Parses a timestamp cell into microseconds since the epoch (naive, no
/// timezone conversion). Blank cells are `None`.
pub fn parse_timestamp_micros(value: &str) -> Option<i64> {
    static FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %H:%M",
    ];
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.and_utc().timestamp_micros());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc().and_utc().timestamp_micros());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_micros())
}

pub(crate) fn parse_timestamp(
    value: &str,
    line: u64,
    column: &str,
) -> Result<Option<i64>, ReaderError> {
    if is_null(value) {
        return Ok(None);
    }
    parse_timestamp_micros(value)
        .map(Some)
        .ok_or_else(|| ReaderError::DataRow {
            line,
            column: column.to_string(),
            message: format!("invalid timestamp '{}'", value.trim()),
        })
}

pub(crate) fn parse_optional_i64(
    value: &str,
    line: u64,
    column: &str,
) -> Result<Option<i64>, ReaderError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<i64>()
        .map(Some)
        .map_err(|err| ReaderError::DataRow {
            line,
            column: column.to_string(),
            message: format!("failed to parse '{trimmed}' as integer: {err}"),
        })
}

pub(crate) fn parse_optional_f64(
    value: &str,
    line: u64,
    column: &str,
) -> Result<Option<f64>, ReaderError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|err| ReaderError::DataRow {
            line,
            column: column.to_string(),
            message: format!("failed to parse '{trimmed}' as float: {err}"),
        })
}

/// Picks the narrowest kind that every non-blank value parses as.
pub(crate) fn infer_kind<'a>(values: impl IntoIterator<Item = &'a str>) -> ColumnKind {
    let mut saw_value = false;
    let mut all_int = true;

    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        saw_value = true;
        if all_int && trimmed.parse::<i64>().is_ok() {
            continue;
        }
        all_int = false;
        if trimmed.parse::<f64>().is_err() {
            return ColumnKind::Str;
        }
    }

    match (saw_value, all_int) {
        (false, _) => ColumnKind::Str,
        (true, true) => ColumnKind::Int64,
        (true, false) => ColumnKind::Float64,
    }
}
