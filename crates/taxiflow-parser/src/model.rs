use std::fmt;

use polars::prelude::{DataType, TimeUnit};

/// Rows per chunk when streaming a CSV source.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Column type assigned to a CSV column, either inferred from the rows read
/// or forced by the datetime column list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Int64,
    Float64,
    Str,
    Datetime,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Int64 => "int64",
            ColumnKind::Float64 => "float64",
            ColumnKind::Str => "string",
            ColumnKind::Datetime => "datetime",
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ColumnKind::Int64 => DataType::Int64,
            ColumnKind::Float64 => DataType::Float64,
            ColumnKind::Str => DataType::String,
            ColumnKind::Datetime => DataType::Datetime(TimeUnit::Microseconds, None),
        }
    }

    pub fn from_dtype(dtype: &DataType) -> Option<Self> {
        match dtype {
            DataType::Int64 => Some(ColumnKind::Int64),
            DataType::Float64 => Some(ColumnKind::Float64),
            DataType::String => Some(ColumnKind::Str),
            DataType::Datetime(_, _) => Some(ColumnKind::Datetime),
            _ => None,
        }
    }

    /// Narrowest kind that holds values of both kinds: integers widen to
    /// floats, anything else mixed widens to strings.
    pub fn widen(self, other: ColumnKind) -> ColumnKind {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnKind::Int64, ColumnKind::Float64) | (ColumnKind::Float64, ColumnKind::Int64) => {
                ColumnKind::Float64
            }
            _ => ColumnKind::Str,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub chunk_size: usize,
    pub datetime_columns: Vec<String>,
    pub delimiter: u8,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            datetime_columns: Vec::new(),
            delimiter: b',',
        }
    }
}

impl ReadOptions {
    pub fn with_datetime_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datetime_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// Splits a comma separated column list such as
/// `tpep_pickup_datetime,tpep_dropoff_datetime`, dropping blank entries.
pub fn split_column_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
