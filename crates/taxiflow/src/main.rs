use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use taxiflow_core::blocks::BlockRegistry;
use taxiflow_core::dataset::{DatasetRef, TaxiColor};
use taxiflow_core::flows::{
    self, FlowContext, DEFAULT_BQ_DESTINATION, DEFAULT_DATETIME_COLUMNS, DEFAULT_INGEST_URL,
    DEFAULT_TABLE_NAME, GCP_CREDENTIALS_BLOCK,
};
use taxiflow_core::warehouse::BigQuerySink;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "NYC taxi trip ETL flows", long_about = None)]
struct Cli {
    /// Blocks file; defaults to $TAXIFLOW_BLOCKS, then ./blocks.toml
    #[arg(long, global = true)]
    blocks: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the first chunk of a trip CSV into Postgres, dropping empty trips
    IngestFlow(IngestFlowArgs),
    /// Fetch one month of trips and upload it to the bucket as Parquet
    WebToGcs(WebToGcsArgs),
    /// Run web-to-gcs for several months in sequence
    ParentFlow(ParentFlowArgs),
    /// Append months of trips from the bucket to the warehouse
    GcsToBq(GcsToBqArgs),
}

#[derive(Args, Debug)]
struct IngestFlowArgs {
    #[arg(long, default_value = DEFAULT_TABLE_NAME)]
    table_name: String,
    /// Comma-separated timestamp columns
    #[arg(long, default_value = DEFAULT_DATETIME_COLUMNS)]
    datetime_cols: String,
    #[arg(long, default_value = DEFAULT_INGEST_URL)]
    url: String,
}

#[derive(Args, Debug)]
struct WebToGcsArgs {
    #[arg(long, default_value_t = 2021)]
    year: i32,
    #[arg(long, default_value_t = 1)]
    month: u32,
    #[arg(long, default_value = "yellow")]
    color: TaxiColor,
    /// Drop trips with no passengers before writing
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    clean_data: bool,
}

#[derive(Args, Debug)]
struct ParentFlowArgs {
    #[arg(long, value_delimiter = ',', default_value = "1,2,3")]
    months: Vec<u32>,
    #[arg(long, default_value_t = 2021)]
    year: i32,
    #[arg(long, default_value = "yellow")]
    color: TaxiColor,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    clean_data: bool,
}

#[derive(Args, Debug)]
struct GcsToBqArgs {
    #[arg(long, value_delimiter = ',', default_value = "1,2")]
    months: Vec<u32>,
    #[arg(long, default_value_t = 2021)]
    year: i32,
    #[arg(long, default_value = "yellow")]
    color: TaxiColor,
    /// `project.dataset.table`, or `dataset.table` in the credentials project
    #[arg(long, default_value = DEFAULT_BQ_DESTINATION)]
    destination: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let ctx = load_context(cli.blocks.as_ref())?;

    match cli.command {
        Command::IngestFlow(args) => {
            let rows = flows::ingest_flow(&ctx, &args.table_name, &args.datetime_cols, &args.url).await?;
            info!(table = %args.table_name, rows, "Ingest flow complete");
        }
        Command::WebToGcs(args) => {
            let dataset = DatasetRef::new(args.color, args.year, args.month)?;
            let key = flows::etl_web_to_gcs(&ctx, &dataset, args.clean_data).await?;
            info!(%key, "Web to bucket flow complete");
        }
        Command::ParentFlow(args) => {
            let keys = flows::etl_parent_flow(&ctx, &args.months, args.year, args.color, args.clean_data).await?;
            info!(uploaded = keys.len(), "Parent flow complete");
        }
        Command::GcsToBq(args) => {
            let destination = flows::resolve_destination(&ctx, &args.destination)?;
            let credentials = ctx
                .blocks
                .gcp_credentials(GCP_CREDENTIALS_BLOCK)
                .context("warehouse flows need a gcp_credentials block")?;
            let sink = BigQuerySink::from_credentials(ctx.http.clone(), credentials);
            let rows =
                flows::etl_gcs_to_bq(&ctx, &sink, &args.months, args.year, args.color, &destination).await?;
            info!(%destination, rows, "Bucket to warehouse flow complete");
        }
    }

    Ok(())
}

fn load_context(path: Option<&PathBuf>) -> Result<FlowContext> {
    let blocks = match path {
        Some(path) => BlockRegistry::load(path)
            .with_context(|| format!("failed to load blocks from {}", path.display()))?,
        None => BlockRegistry::load_default().context("failed to load blocks")?,
    };
    FlowContext::from_blocks(blocks)
}
