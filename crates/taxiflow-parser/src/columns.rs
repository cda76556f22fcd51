use polars::prelude::*;

use crate::errors::ReaderError;
use crate::model::ColumnKind;
use crate::values::{is_null, parse_optional_f64, parse_optional_i64, parse_timestamp};

/// Typed accumulator for one column of a chunk.
#[derive(Debug)]
pub(crate) enum ColumnValues {
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Str(Vec<Option<String>>),
    Datetime(Vec<Option<i64>>),
}

impl ColumnValues {
    pub fn with_capacity(kind: ColumnKind, capacity: usize) -> Self {
        match kind {
            ColumnKind::Int64 => ColumnValues::Int64(Vec::with_capacity(capacity)),
            ColumnKind::Float64 => ColumnValues::Float64(Vec::with_capacity(capacity)),
            ColumnKind::Str => ColumnValues::Str(Vec::with_capacity(capacity)),
            ColumnKind::Datetime => ColumnValues::Datetime(Vec::with_capacity(capacity)),
        }
    }

    pub fn push(&mut self, raw: &str, line: u64, column: &str) -> Result<(), ReaderError> {
        match self {
            ColumnValues::Int64(values) => values.push(parse_optional_i64(raw, line, column)?),
            ColumnValues::Float64(values) => values.push(parse_optional_f64(raw, line, column)?),
            ColumnValues::Str(values) => {
                if is_null(raw) {
                    values.push(None);
                } else {
                    values.push(Some(raw.to_string()));
                }
            }
            ColumnValues::Datetime(values) => values.push(parse_timestamp(raw, line, column)?),
        }
        Ok(())
    }

    pub fn into_column(self, name: &str) -> Result<Column, PolarsError> {
        let series = match self {
            ColumnValues::Int64(values) => Series::new(name.into(), values),
            ColumnValues::Float64(values) => Series::new(name.into(), values),
            ColumnValues::Str(values) => {
                let utf8: Vec<Option<&str>> = values.iter().map(|v| v.as_deref()).collect();
                Series::new(name.into(), utf8)
            }
            ColumnValues::Datetime(values) => Series::new(name.into(), values)
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
        };
        Ok(series.into())
    }
}
