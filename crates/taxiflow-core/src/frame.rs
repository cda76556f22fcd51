use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;

use crate::error::{PipelineError, Result};

/// Casts a frame to the handful of dtypes the loaders know how to write:
/// Int64, Float64, Boolean, String and Datetime. Narrow integers widen to
/// Int64, Float32 to Float64, Date to Datetime; anything else becomes String.
pub fn normalize_for_load(df: &DataFrame) -> Result<DataFrame> {
    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let target = match column.dtype() {
            DataType::Int64
            | DataType::Float64
            | DataType::Boolean
            | DataType::String
            | DataType::Datetime(_, _) => None,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => Some(DataType::Int64),
            DataType::Float32 => Some(DataType::Float64),
            DataType::Date => Some(DataType::Datetime(TimeUnit::Microseconds, None)),
            _ => Some(DataType::String),
        };
        match target {
            Some(dtype) => columns.push(column.cast(&dtype)?),
            None => columns.push(column.clone()),
        }
    }
    Ok(DataFrame::new(columns)?)
}

pub fn timestamp_from(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value).naive_utc()),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value).map(|dt| dt.naive_utc()),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value).map(|dt| dt.naive_utc()),
    }
}

/// A single cell read out of a normalized frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue<'a> {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(&'a str),
    Timestamp(NaiveDateTime),
}

/// Typed, borrow-only access to one column of a normalized frame.
pub enum ColumnView<'a> {
    Int(&'a Int64Chunked),
    Float(&'a Float64Chunked),
    Bool(&'a BooleanChunked),
    Str(&'a StringChunked),
    Datetime(&'a DatetimeChunked, TimeUnit),
}

impl<'a> ColumnView<'a> {
    pub fn new(column: &'a Column) -> Result<Self> {
        let view = match column.dtype() {
            DataType::Int64 => ColumnView::Int(column.i64()?),
            DataType::Float64 => ColumnView::Float(column.f64()?),
            DataType::Boolean => ColumnView::Bool(column.bool()?),
            DataType::String => ColumnView::Str(column.str()?),
            DataType::Datetime(unit, _) => ColumnView::Datetime(column.datetime()?, *unit),
            other => {
                return Err(PipelineError::Validation(format!(
                    "column '{}' has unsupported dtype {other}; normalize the frame first",
                    column.name()
                )))
            }
        };
        Ok(view)
    }

    pub fn views(df: &'a DataFrame) -> Result<Vec<ColumnView<'a>>> {
        df.get_columns().iter().map(ColumnView::new).collect()
    }

    pub fn get(&self, idx: usize) -> CellValue<'a> {
        let value = match self {
            ColumnView::Int(ca) => ca.get(idx).map(CellValue::Int),
            ColumnView::Float(ca) => ca.get(idx).map(CellValue::Float),
            ColumnView::Bool(ca) => ca.get(idx).map(CellValue::Bool),
            ColumnView::Str(ca) => ca.get(idx).map(CellValue::Str),
            ColumnView::Datetime(ca, unit) => ca
                .get(idx)
                .and_then(|raw| timestamp_from(raw, *unit))
                .map(CellValue::Timestamp),
        };
        value.unwrap_or(CellValue::Null)
    }
}
