use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgConnectOptions;
use taxiflow_core::db;
use taxiflow_core::extract::http_client;
use taxiflow_core::flows::{ingest_csv_to_postgres, IngestArgs, DEFAULT_DATETIME_COLUMNS};
use taxiflow_parser::split_column_list;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ingest CSV data to Postgres
#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
struct Cli {
    /// username for postgres
    #[arg(long, required_unless_present = "database_url")]
    user: Option<String>,
    /// password for postgres
    #[arg(long, required_unless_present = "database_url")]
    password: Option<String>,
    /// host for postgres
    #[arg(long, required_unless_present = "database_url")]
    host: Option<String>,
    /// port for postgres
    #[arg(long, required_unless_present = "database_url")]
    port: Option<u16>,
    /// database name for postgres
    #[arg(long, required_unless_present = "database_url")]
    db: Option<String>,
    /// full `postgres://` URL, in place of the five connection flags
    #[arg(long, conflicts_with_all = ["user", "password", "host", "port", "db"])]
    database_url: Option<String>,
    /// name of the table where we will write the results to
    #[arg(long)]
    table_name: String,
    /// comma separated list of columns that are datetime
    #[arg(long, default_value = DEFAULT_DATETIME_COLUMNS)]
    datetime_cols: String,
    /// dataset_url of the csv file
    #[arg(long)]
    url: String,
    /// directory the downloaded csv is written to
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
}

impl Cli {
    fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.database_url {
            return url.parse().context("invalid --database-url");
        }
        let user = self.user.as_deref().context("--user is required")?;
        let password = self.password.as_deref().context("--password is required")?;
        let host = self.host.as_deref().context("--host is required")?;
        let port = self.port.context("--port is required")?;
        let database = self.db.as_deref().context("--db is required")?;
        Ok(PgConnectOptions::new()
            .username(user)
            .password(password)
            .host(host)
            .port(port)
            .database(database))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let pool = db::connect_with(cli.connect_options()?).await?;
    let http = http_client().context("failed to build HTTP client")?;
    let args = IngestArgs {
        table_name: cli.table_name.clone(),
        url: cli.url.clone(),
        datetime_columns: split_column_list(&cli.datetime_cols),
        work_dir: cli.work_dir.clone(),
    };

    let summary = ingest_csv_to_postgres(&pool, &http, &args).await?;
    info!(
        table = %args.table_name,
        chunks = summary.chunks,
        rows = summary.rows,
        "Ingest complete"
    );
    pool.close().await;
    Ok(())
}
