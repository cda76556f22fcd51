use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while reading CSV source: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("datetime column '{column}' is not present in the header")]
    MissingColumn { column: String },

    #[error("data row {line} column '{column}' invalid: {message}")]
    DataRow {
        line: u64,
        column: String,
        message: String,
    },

    #[error("CSV source did not contain any data rows")]
    EmptyData,

    #[error("failed to build dataframe: {0}")]
    Polars(#[from] PolarsError),
}
