use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Public release host for the NYC TLC trip CSV mirrors.
pub const DATA_RELEASE_BASE_URL: &str =
    "https://github.com/DataTalksClub/nyc-tlc-data/releases/download";

pub const PASSENGER_COUNT: &str = "passenger_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxiColor {
    Yellow,
    Green,
}

impl TaxiColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxiColor::Yellow => "yellow",
            TaxiColor::Green => "green",
        }
    }

    /// Pickup/dropoff columns that carry timestamps for this dataset class.
    pub fn datetime_columns(&self) -> [&'static str; 2] {
        match self {
            TaxiColor::Yellow => ["tpep_pickup_datetime", "tpep_dropoff_datetime"],
            TaxiColor::Green => ["lpep_pickup_datetime", "lpep_dropoff_datetime"],
        }
    }
}

impl fmt::Display for TaxiColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaxiColor {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yellow" => Ok(TaxiColor::Yellow),
            "green" => Ok(TaxiColor::Green),
            other => Err(PipelineError::Validation(format!(
                "unknown taxi color '{other}'"
            ))),
        }
    }
}

/// One monthly trip dataset, e.g. yellow taxis for January 2021.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DatasetRef {
    pub color: TaxiColor,
    pub year: i32,
    pub month: u32,
}

impl DatasetRef {
    pub fn new(color: TaxiColor, year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(PipelineError::Validation(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        Ok(Self { color, year, month })
    }

    /// `{color}_tripdata_{year}-{month:02}`
    pub fn file_stem(&self) -> String {
        format!("{}_tripdata_{}-{:02}", self.color, self.year, self.month)
    }

    pub fn file_name(&self) -> String {
        format!("{}.parquet", self.file_stem())
    }

    /// Object key inside the bucket: `{color}/{file_name}`.
    pub fn remote_path(&self) -> String {
        format!("{}/{}", self.color, self.file_name())
    }

    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(self.color.as_str()).join(self.file_name())
    }

    pub fn source_url(&self) -> String {
        self.source_url_from(DATA_RELEASE_BASE_URL)
    }

    pub fn source_url_from(&self, base: &str) -> String {
        format!(
            "{}/{}/{}.csv.gz",
            base.trim_end_matches('/'),
            self.color,
            self.file_stem()
        )
    }

    pub fn datetime_columns(&self) -> Vec<String> {
        self.color
            .datetime_columns()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}
