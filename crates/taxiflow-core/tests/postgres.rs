use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use polars::prelude::*;
use sqlx::Row;
use taxiflow_core::blocks::{BlockRegistry, PostgresBlock};
use taxiflow_core::db;
use taxiflow_core::flows::{ingest_csv_to_postgres, ingest_flow, FlowContext, IngestArgs, POSTGRES_BLOCK};
use taxiflow_core::sql_load::{load_chunks, write_frame, IfExists};
use taxiflow_parser::{read_first_chunk, CsvChunkReader, ReadOptions};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../taxiflow-parser/tests/data")
        .join(name)
}

fn database_url(test: &str) -> Option<String> {
    match env::var("TAXIFLOW_TEST_DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping {test} because TAXIFLOW_TEST_DATABASE_URL is not set");
            None
        }
    }
}

fn yellow_options() -> ReadOptions {
    ReadOptions::default().with_datetime_columns(["tpep_pickup_datetime", "tpep_dropoff_datetime"])
}

async fn count_rows(pool: &db::DbPool, table: &str) -> Result<i64> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM \"{table}\""))
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("n")?)
}

async fn table_columns(pool: &db::DbPool, table: &str) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        "SELECT column_name::text AS name, data_type::text AS data_type \
         FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| -> Result<(String, String)> { Ok((row.try_get("name")?, row.try_get("data_type")?)) })
        .collect()
}

fn postgres_type(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Int64 => "bigint",
        DataType::Float64 => "double precision",
        DataType::Boolean => "boolean",
        DataType::String => "text",
        DataType::Datetime(_, _) => "timestamp without time zone",
        other => panic!("unexpected dtype {other}"),
    }
}

fn frame_columns(df: &DataFrame) -> Vec<(String, String)> {
    df.get_columns()
        .iter()
        .map(|column| (column.name().to_string(), postgres_type(column.dtype()).to_string()))
        .collect()
}

#[tokio::test]
async fn write_frame_honours_if_exists() -> Result<()> {
    let Some(url) = database_url("write_frame_honours_if_exists") else {
        return Ok(());
    };
    let pool = db::connect(&url).await?;
    let table = "taxiflow_test_if_exists";
    let df = DataFrame::new(vec![
        Series::new("passenger_count".into(), vec![Some(1i64), None]).into(),
        Series::new("store_and_fwd_flag".into(), vec![Some("N"), None]).into(),
    ])?;

    assert_eq!(write_frame(&pool, table, &df, IfExists::Replace).await?, 2);
    assert_eq!(write_frame(&pool, table, &df, IfExists::Append).await?, 2);
    assert_eq!(count_rows(&pool, table).await?, 4);
    assert!(write_frame(&pool, table, &df, IfExists::Fail).await.is_err());
    assert_eq!(write_frame(&pool, table, &df, IfExists::Replace).await?, 2);
    assert_eq!(count_rows(&pool, table).await?, 2);

    sqlx::query(&format!("DROP TABLE \"{table}\"")).execute(&pool).await?;
    Ok(())
}

#[tokio::test]
async fn chunked_load_writes_every_chunk() -> Result<()> {
    let Some(url) = database_url("chunked_load_writes_every_chunk") else {
        return Ok(());
    };
    let pool = db::connect(&url).await?;
    let table = "taxiflow_test_chunks";

    let reader = CsvChunkReader::open(fixture("yellow_tripdata_sample.csv"), yellow_options().with_chunk_size(2))?;
    let summary = load_chunks(&pool, table, reader).await?;
    assert_eq!(summary.chunks, 2);
    assert_eq!(summary.rows, 3);
    assert_eq!(count_rows(&pool, table).await?, 3);

    let expected = read_first_chunk(fixture("yellow_tripdata_sample.csv"), yellow_options().with_chunk_size(2))?;
    assert_eq!(table_columns(&pool, table).await?, frame_columns(&expected));

    let row = sqlx::query(&format!(
        "SELECT tpep_pickup_datetime::text AS pickup FROM \"{table}\" ORDER BY tpep_pickup_datetime LIMIT 1"
    ))
    .fetch_one(&pool)
    .await?;
    let pickup: String = row.try_get("pickup")?;
    assert_eq!(pickup, "2021-01-01 00:30:10");

    sqlx::query(&format!("DROP TABLE \"{table}\"")).execute(&pool).await?;
    Ok(())
}

#[tokio::test]
async fn standalone_ingest_replaces_the_table() -> Result<()> {
    let Some(url) = database_url("standalone_ingest_replaces_the_table") else {
        return Ok(());
    };
    let pool = db::connect(&url).await?;
    let work = tempfile::tempdir()?;
    let args = IngestArgs {
        table_name: "taxiflow_test_standalone".into(),
        url: fixture("yellow_tripdata_sample.csv").display().to_string(),
        datetime_columns: vec!["tpep_pickup_datetime".into(), "tpep_dropoff_datetime".into()],
        work_dir: work.path().to_path_buf(),
    };
    let http = taxiflow_core::extract::http_client()?;

    sqlx::query("DROP TABLE IF EXISTS \"taxiflow_test_standalone\"").execute(&pool).await?;
    sqlx::query("CREATE TABLE \"taxiflow_test_standalone\" (stale_column TEXT, extra BIGINT)")
        .execute(&pool)
        .await?;
    sqlx::query("INSERT INTO \"taxiflow_test_standalone\" VALUES ('old', 1)")
        .execute(&pool)
        .await?;

    ingest_csv_to_postgres(&pool, &http, &args).await?;
    let summary = ingest_csv_to_postgres(&pool, &http, &args).await?;
    assert_eq!(summary.rows, 3);
    assert_eq!(count_rows(&pool, &args.table_name).await?, 3);

    let expected = read_first_chunk(fixture("yellow_tripdata_sample.csv"), yellow_options())?;
    let columns = table_columns(&pool, &args.table_name).await?;
    assert_eq!(columns, frame_columns(&expected));
    assert!(columns.iter().all(|(name, _)| name != "stale_column"));

    sqlx::query("DROP TABLE \"taxiflow_test_standalone\"").execute(&pool).await?;
    Ok(())
}

#[tokio::test]
async fn ingest_flow_loads_filtered_first_chunk() -> Result<()> {
    let Some(url) = database_url("ingest_flow_loads_filtered_first_chunk") else {
        return Ok(());
    };
    let root = tempfile::tempdir()?;
    let mut blocks = BlockRegistry::default();
    blocks.settings.work_dir = root.path().join("work");
    blocks.settings.cache_dir = root.path().join("cache");
    blocks.insert_postgres(POSTGRES_BLOCK, PostgresBlock { url: url.clone() });
    let ctx = FlowContext::from_blocks(blocks)?;

    let source = fixture("yellow_tripdata_sample.csv").display().to_string();
    let rows = ingest_flow(
        &ctx,
        "taxiflow_test_ingest_flow",
        "tpep_pickup_datetime,tpep_dropoff_datetime",
        &source,
    )
    .await?;
    assert_eq!(rows, 2);

    let pool = db::connect(&url).await?;
    assert_eq!(count_rows(&pool, "taxiflow_test_ingest_flow").await?, 2);
    sqlx::query("DROP TABLE \"taxiflow_test_ingest_flow\"").execute(&pool).await?;
    Ok(())
}
