use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use polars::prelude::DataFrame;
use taxiflow_parser::{read_csv, read_first_chunk, CsvChunkReader, ReadOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

pub fn http_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("taxiflow/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

/// Where a CSV source lives: anything that is not an `http(s)://` URL is
/// treated as a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Remote(String),
    Local(PathBuf),
}

impl SourceLocation {
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            SourceLocation::Remote(source.to_string())
        } else {
            let path = source.strip_prefix("file://").unwrap_or(source);
            SourceLocation::Local(PathBuf::from(path))
        }
    }
}

/// Gzip files keep their extension so the download is recognisable on disk.
pub fn local_csv_name(url: &str) -> &'static str {
    if url.ends_with(".csv.gz") {
        "output.csv.gz"
    } else {
        "output.csv"
    }
}

/// Streams `url` into `dest`, returning the number of bytes written.
pub async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(%url, dest = %dest.display(), "Downloading source file");
    let response = client.get(url).send().await?.error_for_status()?;
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    debug!(bytes = written, "Download finished");
    Ok(written)
}

/// Resolves `source` to a readable local file, downloading it into
/// `work_dir` when it is remote.
pub async fn materialize(client: &reqwest::Client, source: &str, work_dir: &Path) -> Result<PathBuf> {
    match SourceLocation::parse(source) {
        SourceLocation::Remote(url) => {
            let dest = work_dir.join(local_csv_name(&url));
            download(client, &url, &dest).await?;
            Ok(dest)
        }
        SourceLocation::Local(path) => {
            if !path.exists() {
                return Err(PipelineError::Validation(format!(
                    "source file {} does not exist",
                    path.display()
                )));
            }
            Ok(path)
        }
    }
}

fn read_options(datetime_columns: &[String]) -> ReadOptions {
    ReadOptions::default().with_datetime_columns(datetime_columns.iter().cloned())
}

/// Downloads (if needed) and reads a whole CSV source.
pub async fn fetch_csv(
    client: &reqwest::Client,
    source: &str,
    datetime_columns: &[String],
    work_dir: &Path,
) -> Result<DataFrame> {
    let path = materialize(client, source, work_dir).await?;
    let options = read_options(datetime_columns);
    let df = tokio::task::spawn_blocking(move || read_csv(&path, options)).await??;
    info!(rows = df.height(), "Loaded dataframe");
    Ok(df)
}

/// Downloads (if needed) and reads only the first chunk of a CSV source.
pub async fn fetch_first_chunk(
    client: &reqwest::Client,
    source: &str,
    datetime_columns: &[String],
    work_dir: &Path,
) -> Result<DataFrame> {
    let path = materialize(client, source, work_dir).await?;
    let options = read_options(datetime_columns);
    let df = tokio::task::spawn_blocking(move || read_first_chunk(&path, options)).await??;
    info!(rows = df.height(), "Loaded first chunk");
    Ok(df)
}

/// Downloads (if needed) and opens a chunked reader over a CSV source.
pub async fn open_chunks(
    client: &reqwest::Client,
    source: &str,
    datetime_columns: &[String],
    work_dir: &Path,
) -> Result<CsvChunkReader> {
    let path = materialize(client, source, work_dir).await?;
    Ok(CsvChunkReader::open(&path, read_options(datetime_columns))?)
}
