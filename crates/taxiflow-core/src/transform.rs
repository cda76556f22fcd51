use polars::prelude::*;
use taxiflow_parser::parse_timestamp_micros;
use tracing::info;

use crate::error::{PipelineError, Result};

fn count_zeros(df: &DataFrame, column: &str) -> Result<usize> {
    let values = df.column(column)?.cast(&DataType::Float64)?;
    let values = values.f64()?;
    Ok(values.into_iter().filter(|value| *value == Some(0.0)).count())
}

/// Keeps only rows whose `column` is strictly positive. Nulls and zeros are
/// dropped.
pub fn drop_zero_passengers(df: &DataFrame, column: &str) -> Result<DataFrame> {
    let before = count_zeros(df, column)?;
    info!(column, zero_rows = before, "PRE: Found {before} trips with 0 passengers");

    let filtered = df
        .clone()
        .lazy()
        .filter(col(column).gt(lit(0)))
        .collect()?;

    let after = count_zeros(&filtered, column)?;
    info!(
        column,
        zero_rows = after,
        dropped = df.height() - filtered.height(),
        "POST: Found {after} trips with 0 passengers"
    );
    Ok(filtered)
}

/// Replaces nulls in `column` with zero.
pub fn fill_missing_passengers(df: &DataFrame, column: &str) -> Result<DataFrame> {
    let before = df.column(column)?.null_count();
    info!(column, null_rows = before, "pre: {before} missing values");

    let filled = df
        .clone()
        .lazy()
        .with_column(col(column).fill_null(lit(0)))
        .collect()?;

    let after = filled.column(column)?.null_count();
    info!(column, null_rows = after, "post: {after} missing values");
    Ok(filled)
}

/// Logs the first two rows and the column dtypes.
pub fn preview(df: &DataFrame) {
    info!(rows = df.height(), "{}", df.head(Some(2)));
    let columns: Vec<String> = df
        .get_columns()
        .iter()
        .map(|column| format!("({}, {})", column.name(), column.dtype()))
        .collect();
    info!("columns: [{}]", columns.join(", "));
}

/// Casts string columns named in `columns` to microsecond timestamps.
/// Columns that are already temporal are left untouched. A non-null cell
/// that is not a timestamp is an error naming its column and row.
pub fn parse_datetime_columns(df: &DataFrame, columns: &[String]) -> Result<DataFrame> {
    let mut output = df.clone();
    for name in columns {
        let column = df.column(name)?;
        match column.dtype() {
            DataType::Datetime(_, _) => continue,
            DataType::Date => {
                let cast = column.cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;
                output.with_column(cast)?;
            }
            _ => {
                let text = column.cast(&DataType::String)?;
                let parsed = text
                    .str()?
                    .into_iter()
                    .enumerate()
                    .map(|(row, value)| match value {
                        None => Ok(None),
                        Some(raw) if raw.trim().is_empty() => Ok(None),
                        Some(raw) => parse_timestamp_micros(raw).map(Some).ok_or_else(|| {
                            PipelineError::Validation(format!(
                                "column '{name}' row {row}: invalid timestamp '{raw}'"
                            ))
                        }),
                    })
                    .collect::<Result<Vec<Option<i64>>>>()?;
                let series = Series::new(name.as_str().into(), parsed)
                    .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;
                output.with_column(series)?;
            }
        }
    }
    Ok(output)
}
