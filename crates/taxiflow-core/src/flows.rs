//! The pipelines: CSV to Postgres, web to bucket, bucket to warehouse.
//!
//! Each flow runs its steps strictly in order, wrapping the fallible ones in
//! [`run_task`]/[`run_cached_task`] for retries and input-hash caching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use polars::prelude::DataFrame;
use tracing::info;

use crate::blocks::BlockRegistry;
use crate::dataset::{DatasetRef, TaxiColor, PASSENGER_COUNT};
use crate::db::{self, DbPool};
use crate::extract::{fetch_csv, fetch_first_chunk, http_client, open_chunks};
use crate::object_store::ObjectStore;
use crate::parquet_io::{read_parquet, write_local};
use crate::sql_load::{load_chunks, load_header_then_rows, LoadSummary};
use crate::tasks::{run_cached_task, run_task, TaskCache, TaskOptions};
use crate::transform::{drop_zero_passengers, fill_missing_passengers, parse_datetime_columns, preview};
use crate::warehouse::{write_frame, TableRef, WarehouseSink, DEFAULT_BATCH_ROWS};

pub const POSTGRES_BLOCK: &str = "postgres-connector";
pub const BUCKET_BLOCK: &str = "prefect-de-zoomcamp-bucket";
pub const GCP_CREDENTIALS_BLOCK: &str = "gcp-service-account";

pub const DEFAULT_TABLE_NAME: &str = "yellow_taxi_trips";
pub const DEFAULT_DATETIME_COLUMNS: &str = "tpep_pickup_datetime,tpep_dropoff_datetime";
pub const DEFAULT_INGEST_URL: &str =
    "https://github.com/DataTalksClub/nyc-tlc-data/releases/download/yellow/yellow_tripdata_2021-01.csv.gz";
pub const DEFAULT_BQ_DESTINATION: &str =
    "datatalksclub-de.datatalksclub_de_demo_bq_dataset.yellow-taxi-trips";

const EXTRACT_RETRIES: u32 = 3;
const LOAD_RETRIES: u32 = 3;

fn one_day() -> chrono::Duration {
    chrono::Duration::days(1)
}

/// Shared state every flow runs against.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub blocks: BlockRegistry,
    pub http: reqwest::Client,
    pub cache: TaskCache,
    pub data_dir: PathBuf,
    pub work_dir: PathBuf,
    pub source_base_url: String,
    pub retry_delay: Duration,
}

impl FlowContext {
    pub fn from_blocks(blocks: BlockRegistry) -> Result<Self> {
        let settings = blocks.settings.clone();
        let http = http_client().context("failed to build HTTP client")?;
        Ok(Self {
            cache: TaskCache::new(settings.cache_dir),
            data_dir: settings.data_dir,
            work_dir: settings.work_dir,
            source_base_url: settings.source_base_url,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
            http,
            blocks,
        })
    }

    fn task(&self, name: &'static str) -> TaskOptions {
        TaskOptions::new(name).with_retry_delay(self.retry_delay)
    }

    pub async fn bucket(&self) -> Result<ObjectStore> {
        let block = self.blocks.bucket(BUCKET_BLOCK)?;
        Ok(ObjectStore::from_block(block).await?)
    }

    pub async fn postgres(&self) -> Result<DbPool> {
        let block = self.blocks.postgres(POSTGRES_BLOCK)?;
        db::connect(&block.database_url()).await
    }
}

/// Arguments of the standalone CSV-to-Postgres ingest.
#[derive(Debug, Clone)]
pub struct IngestArgs {
    pub table_name: String,
    pub url: String,
    pub datetime_columns: Vec<String>,
    pub work_dir: PathBuf,
}

/// Downloads the CSV and streams every chunk into `table_name`, replacing
/// any existing table.
pub async fn ingest_csv_to_postgres(pool: &DbPool, http: &reqwest::Client, args: &IngestArgs) -> Result<LoadSummary> {
    let reader = open_chunks(http, &args.url, &args.datetime_columns, &args.work_dir)
        .await
        .with_context(|| format!("failed to open {}", args.url))?;
    let summary = load_chunks(pool, &args.table_name, reader)
        .await
        .with_context(|| format!("failed to load into table {}", args.table_name))?;
    Ok(summary)
}

pub fn log_subflow(table_name: &str) {
    info!(flow = "Subflow", table_name, "Logging subflow: {table_name}");
}

/// First chunk of the CSV at `url`, passenger-filtered, into the connector
/// block's database.
pub async fn ingest_flow(ctx: &FlowContext, table_name: &str, datetime_cols: &str, url: &str) -> Result<u64> {
    info!(flow = "Ingest Flow", table_name, url, "Flow started");
    log_subflow(table_name);

    let datetime_columns = taxiflow_parser::split_column_list(datetime_cols);
    let extract = ctx
        .task("extract_data")
        .with_retries(EXTRACT_RETRIES)
        .with_cache_expiration(one_day());
    let raw: DataFrame = run_cached_task(&extract, &ctx.cache, &(url, datetime_cols), || {
        fetch_first_chunk(&ctx.http, url, &datetime_columns, &ctx.work_dir)
    })
    .await
    .with_context(|| format!("failed to extract {url}"))?;

    let transformed = run_task(&ctx.task("transform_data"), || async {
        drop_zero_passengers(&raw, PASSENGER_COUNT)
    })
    .await?;

    let load = ctx.task("ingest_data").with_retries(LOAD_RETRIES);
    let rows = run_task(&load, || async {
        let pool = ctx.postgres().await?;
        let rows = load_header_then_rows(&pool, table_name, &transformed).await?;
        pool.close().await;
        Ok::<u64, anyhow::Error>(rows)
    })
    .await
    .with_context(|| format!("failed to ingest into table {table_name}"))?;

    info!(flow = "Ingest Flow", table_name, rows, "Flow finished");
    Ok(rows)
}

fn clean(df: &DataFrame) -> crate::error::Result<DataFrame> {
    preview(df);
    drop_zero_passengers(df, PASSENGER_COUNT)
}

/// Fetches one month of trips, optionally cleans it, writes it as local
/// gzip Parquet and uploads it to the bucket. Returns the remote key.
pub async fn etl_web_to_gcs(ctx: &FlowContext, dataset: &DatasetRef, clean_data: bool) -> Result<String> {
    info!(flow = "etl_web_to_gcs", %dataset, clean_data, "Flow started");
    let url = dataset.source_url_from(&ctx.source_base_url);
    let date_cols = dataset.datetime_columns();

    let fetch = ctx
        .task("fetch")
        .with_retries(EXTRACT_RETRIES)
        .with_cache_expiration(one_day());
    let mut df: DataFrame = run_cached_task(&fetch, &ctx.cache, &(&url, &date_cols), || {
        fetch_csv(&ctx.http, &url, &date_cols, &ctx.work_dir)
    })
    .await
    .with_context(|| format!("failed to fetch {url}"))?;

    if clean_data {
        let cleaned = run_task(&ctx.task("clean"), || async { clean(&df) }).await?;
        df = cleaned;
    }

    let local_path = run_task(&ctx.task("write_local"), || async {
        write_local(&df, &ctx.data_dir, dataset)
    })
    .await?;

    let remote_path = dataset.remote_path();
    let store = ctx.bucket().await?;
    run_task(&ctx.task("write_gcs"), || store.upload_from_path(&local_path, &remote_path))
        .await
        .with_context(|| format!("failed to upload {}", local_path.display()))?;

    info!(flow = "etl_web_to_gcs", %dataset, key = %remote_path, rows = df.height(), "Flow finished");
    Ok(remote_path)
}

pub async fn etl_parent_flow(
    ctx: &FlowContext,
    months: &[u32],
    year: i32,
    color: TaxiColor,
    clean_data: bool,
) -> Result<Vec<String>> {
    let mut keys = Vec::with_capacity(months.len());
    for &month in months {
        let dataset = DatasetRef::new(color, year, month)?;
        keys.push(etl_web_to_gcs(ctx, &dataset, clean_data).await?);
    }
    Ok(keys)
}

/// Downloads the month's Parquet object into `{data_dir}/{color}/{file}`.
pub async fn extract_from_gcs(ctx: &FlowContext, dataset: &DatasetRef) -> Result<PathBuf> {
    let store = ctx.bucket().await?;
    let key = dataset.remote_path();
    let local_path = dataset.local_path(&ctx.data_dir);
    let options = ctx.task("extract_from_gcs").with_retries(EXTRACT_RETRIES);
    let path = run_task(&options, || store.download_object_to_path(&key, &local_path))
        .await
        .with_context(|| format!("failed to download {key}"))?;
    Ok(path)
}

fn read_and_fill(path: &Path, datetime_columns: &[String]) -> crate::error::Result<DataFrame> {
    let df = parse_datetime_columns(&read_parquet(path)?, datetime_columns)?;
    info!(rows = df.height(), "Number of rows: {}", df.height());
    preview(&df);
    fill_missing_passengers(&df, PASSENGER_COUNT)
}

pub async fn write_month_to_bq(
    ctx: &FlowContext,
    sink: &dyn WarehouseSink,
    dataset: &DatasetRef,
    destination: &TableRef,
) -> Result<usize> {
    info!(flow = "write_month_to_bq", %dataset, destination = %destination, "Flow started");
    let path = extract_from_gcs(ctx, dataset).await?;
    let date_cols = dataset.datetime_columns();
    let df = run_task(&ctx.task("transform"), || async { read_and_fill(&path, &date_cols) })
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let rows = run_task(&ctx.task("write_bq"), || {
        write_frame(sink, destination, &df, DEFAULT_BATCH_ROWS)
    })
    .await
    .with_context(|| format!("failed to append to {destination}"))?;
    Ok(rows)
}

pub async fn etl_gcs_to_bq(
    ctx: &FlowContext,
    sink: &dyn WarehouseSink,
    months: &[u32],
    year: i32,
    color: TaxiColor,
    destination: &TableRef,
) -> Result<usize> {
    let mut total = 0;
    for &month in months {
        let dataset = DatasetRef::new(color, year, month)?;
        total += write_month_to_bq(ctx, sink, &dataset, destination).await?;
    }
    info!(flow = "etl_gcs_to_bq", months = months.len(), rows = total, "Flow finished");
    Ok(total)
}

/// Parses a destination table; a two-part `dataset.table` takes the project
/// of the credentials block.
pub fn resolve_destination(ctx: &FlowContext, raw: &str) -> Result<TableRef> {
    let project = ctx
        .blocks
        .gcp_credentials(GCP_CREDENTIALS_BLOCK)
        .ok()
        .map(|block| block.project.as_str());
    Ok(TableRef::parse(raw, project)?)
}
