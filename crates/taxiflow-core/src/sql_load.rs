// crates/taxiflow-core/src/sql_load.rs

use std::time::Instant;

use polars::prelude::*;
use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::{QueryBuilder, Row};
use taxiflow_parser::ReaderError;
use tracing::{debug, info};

use crate::db::DbPool;
use crate::error::{PipelineError, Result};
use crate::frame::{normalize_for_load, timestamp_from, ColumnView};

/// Postgres rejects statements with more than this many bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_STATEMENT: usize = 5_000;

/// What to do when the destination table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfExists {
    Fail,
    Replace,
    Append,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub chunks: usize,
    pub rows: u64,
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Postgres column type for a normalized polars dtype.
pub fn sql_type(dtype: &DataType) -> Result<&'static str> {
    match dtype {
        DataType::Int64 => Ok("BIGINT"),
        DataType::Float64 => Ok("DOUBLE PRECISION"),
        DataType::Boolean => Ok("BOOLEAN"),
        DataType::String => Ok("TEXT"),
        DataType::Datetime(_, _) => Ok("TIMESTAMP"),
        other => Err(PipelineError::Validation(format!(
            "no SQL type for dtype {other}"
        ))),
    }
}

pub fn create_table_sql(table: &str, df: &DataFrame, if_not_exists: bool) -> Result<String> {
    let columns = df
        .get_columns()
        .iter()
        .map(|column| Ok(format!("{} {}", quote_ident(column.name()), sql_type(column.dtype())?)))
        .collect::<Result<Vec<_>>>()?;
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    Ok(format!(
        "CREATE TABLE {guard}{} ({})",
        quote_ident(table),
        columns.join(", ")
    ))
}

pub fn rows_per_statement(width: usize) -> usize {
    if width == 0 {
        return 0;
    }
    (MAX_BIND_PARAMS / width).clamp(1, MAX_ROWS_PER_STATEMENT)
}

pub async fn table_exists(pool: &DbPool, table: &str) -> Result<bool> {
    let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
        .bind(quote_ident(table))
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("present")?)
}

fn push_cell(row: &mut Separated<'_, '_, Postgres, &'static str>, view: &ColumnView<'_>, idx: usize) {
    match view {
        ColumnView::Int(ca) => {
            row.push_bind(ca.get(idx));
        }
        ColumnView::Float(ca) => {
            row.push_bind(ca.get(idx));
        }
        ColumnView::Bool(ca) => {
            row.push_bind(ca.get(idx));
        }
        ColumnView::Str(ca) => {
            row.push_bind(ca.get(idx).map(str::to_owned));
        }
        ColumnView::Datetime(ca, unit) => {
            row.push_bind(ca.get(idx).and_then(|raw| timestamp_from(raw, *unit)));
        }
    }
}

/// Writes `df` into `table` inside a single transaction, returning the number
/// of rows inserted.
pub async fn write_frame(pool: &DbPool, table: &str, df: &DataFrame, if_exists: IfExists) -> Result<u64> {
    let df = normalize_for_load(df)?;
    let exists = table_exists(pool, table).await?;

    let mut tx = pool.begin().await?;
    match (if_exists, exists) {
        (IfExists::Fail, true) => {
            return Err(PipelineError::Validation(format!(
                "table '{table}' already exists"
            )));
        }
        (IfExists::Replace, _) => {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
                .execute(&mut *tx)
                .await?;
            sqlx::query(&create_table_sql(table, &df, false)?)
                .execute(&mut *tx)
                .await?;
            debug!(table, "Recreated table");
        }
        (_, false) => {
            sqlx::query(&create_table_sql(table, &df, true)?)
                .execute(&mut *tx)
                .await?;
            debug!(table, "Created table");
        }
        (IfExists::Append, true) => {}
    }

    let views = ColumnView::views(&df)?;
    let step = rows_per_statement(df.width());
    let column_list = df
        .get_column_names()
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut inserted: u64 = 0;
    let mut start = 0;
    while step > 0 && start < df.height() {
        let end = (start + step).min(df.height());
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} ({column_list}) ", quote_ident(table)));
        builder.push_values(start..end, |mut row, idx| {
            for view in &views {
                push_cell(&mut row, view, idx);
            }
        });
        let result = builder.build().execute(&mut *tx).await?;
        inserted += result.rows_affected();
        start = end;
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Replaces `table` with the schema of `df` (no rows), then appends every
/// row of `df`.
pub async fn load_header_then_rows(pool: &DbPool, table: &str, df: &DataFrame) -> Result<u64> {
    write_frame(pool, table, &df.head(Some(0)), IfExists::Replace).await?;
    let rows = write_frame(pool, table, df, IfExists::Append).await?;
    info!(table, rows, "Loaded dataframe into postgres");
    Ok(rows)
}

/// Writes the first chunk's schema, then appends every chunk as it is read.
/// A failure mid-stream leaves the already appended chunks in place.
pub async fn load_chunks<I>(pool: &DbPool, table: &str, chunks: I) -> Result<LoadSummary>
where
    I: IntoIterator<Item = std::result::Result<DataFrame, ReaderError>>,
{
    let mut summary = LoadSummary::default();
    for chunk in chunks {
        let started = Instant::now();
        let df = chunk?;
        if summary.chunks == 0 {
            write_frame(pool, table, &df.head(Some(0)), IfExists::Replace).await?;
        }
        let rows = write_frame(pool, table, &df, IfExists::Append).await?;
        summary.chunks += 1;
        summary.rows += rows;
        let elapsed = started.elapsed().as_secs_f64();
        info!(
            table,
            chunk = summary.chunks,
            rows,
            elapsed_secs = elapsed,
            "inserted another chunk, took {elapsed:.3} second"
        );
    }
    info!(
        table,
        chunks = summary.chunks,
        rows = summary.rows,
        "Finished ingesting data into the postgres database"
    );
    Ok(summary)
}
