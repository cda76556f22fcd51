//! Named configuration blocks (database connectors, buckets, cloud
//! credentials) resolved by name at runtime from a TOML file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};

pub const BLOCKS_ENV_VAR: &str = "TAXIFLOW_BLOCKS";
pub const DEFAULT_BLOCKS_PATH: &str = "blocks.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockRegistry {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    postgres: HashMap<String, PostgresBlock>,
    #[serde(default)]
    bucket: HashMap<String, BucketBlock>,
    #[serde(default)]
    gcp_credentials: HashMap<String, GcpCredentialsBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root for local Parquet output and bucket downloads.
    pub data_dir: PathBuf,
    /// Scratch directory for downloaded CSV files.
    pub work_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub retry_delay_secs: u64,
    pub source_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            work_dir: PathBuf::from("."),
            cache_dir: PathBuf::from(".taxiflow-cache"),
            retry_delay_secs: 0,
            source_base_url: crate::dataset::DATA_RELEASE_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresBlock {
    pub url: String,
}

impl PostgresBlock {
    /// `DATABASE_URL` takes precedence over the configured URL.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.url.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BucketBlock {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        force_path_style: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcpCredentialsBlock {
    pub project: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl GcpCredentialsBlock {
    /// Static token from the block, then `GOOGLE_OAUTH_ACCESS_TOKEN`; `None`
    /// means the metadata server should be asked.
    pub fn static_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|token| !token.is_empty())
            .or_else(|| {
                std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN")
                    .ok()
                    .filter(|token| !token.is_empty())
            })
    }
}

impl BlockRegistry {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|err| PipelineError::Config(format!("invalid blocks file: {err}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads the file named by `TAXIFLOW_BLOCKS`, or `blocks.toml` in the
    /// working directory. A missing default file yields an empty registry.
    pub fn load_default() -> Result<Self> {
        match std::env::var(BLOCKS_ENV_VAR) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => {
                let path = Path::new(DEFAULT_BLOCKS_PATH);
                if path.exists() {
                    Self::load(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn postgres(&self, name: &str) -> Result<&PostgresBlock> {
        self.postgres
            .get(name)
            .ok_or_else(|| PipelineError::BlockNotFound {
                kind: "postgres",
                name: name.to_string(),
            })
    }

    pub fn bucket(&self, name: &str) -> Result<&BucketBlock> {
        self.bucket
            .get(name)
            .ok_or_else(|| PipelineError::BlockNotFound {
                kind: "bucket",
                name: name.to_string(),
            })
    }

    pub fn gcp_credentials(&self, name: &str) -> Result<&GcpCredentialsBlock> {
        self.gcp_credentials
            .get(name)
            .ok_or_else(|| PipelineError::BlockNotFound {
                kind: "gcp_credentials",
                name: name.to_string(),
            })
    }

    pub fn insert_postgres(&mut self, name: impl Into<String>, block: PostgresBlock) {
        self.postgres.insert(name.into(), block);
    }

    pub fn insert_bucket(&mut self, name: impl Into<String>, block: BucketBlock) {
        self.bucket.insert(name.into(), block);
    }

    pub fn insert_gcp_credentials(&mut self, name: impl Into<String>, block: GcpCredentialsBlock) {
        self.gcp_credentials.insert(name.into(), block);
    }
}
