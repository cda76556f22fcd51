use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use tracing::info;

use crate::dataset::DatasetRef;
use crate::error::Result;

/// Writes a frame to `path` with the given compression, creating parent
/// directories as needed.
pub fn write_parquet(df: &DataFrame, path: &Path, compression: ParquetCompression) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut clone = df.clone();
    ParquetWriter::new(file)
        .with_compression(compression)
        .with_statistics(StatisticsOptions::default())
        .finish(&mut clone)?;
    Ok(())
}

/// Writes a dataset as gzip Parquet to `{root}/{color}/{file_name}`.
pub fn write_local(df: &DataFrame, root: &Path, dataset: &DatasetRef) -> Result<PathBuf> {
    let path = dataset.local_path(root);
    write_parquet(df, &path, ParquetCompression::Gzip(None))?;
    let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());
    info!(path = %resolved.display(), rows = df.height(), "Wrote dataframe to parquet");
    Ok(path)
}

pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

pub(crate) fn to_parquet_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut clone = df.clone();
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Zstd(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut clone)?;
    }
    Ok(buffer)
}

pub(crate) fn from_parquet_bytes(bytes: &[u8]) -> Result<DataFrame> {
    Ok(ParquetReader::new(Cursor::new(bytes)).finish()?)
}
