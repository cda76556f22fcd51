//! Retry and result-caching wrapper around pipeline steps.
//!
//! A task is a plain async closure. [`run_task`] re-runs it on failure up to
//! a fixed number of times; [`run_cached_task`] additionally short-circuits
//! with a stored result when the same task was run with the same inputs
//! within the cache expiration window.

use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use blake3::Hasher;
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::parquet_io::{from_parquet_bytes, to_parquet_bytes};

#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub name: &'static str,
    pub retries: u32,
    pub retry_delay: Duration,
    pub cache_expiration: Option<chrono::Duration>,
}

impl TaskOptions {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            retries: 0,
            retry_delay: Duration::ZERO,
            cache_expiration: None,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_cache_expiration(mut self, expiration: chrono::Duration) -> Self {
        self.cache_expiration = Some(expiration);
        self
    }
}

/// Runs `operation`, retrying up to `options.retries` additional times. The
/// error of the final attempt is returned.
pub async fn run_task<T, E, F, Fut>(options: &TaskOptions, mut operation: F) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    info!(task = options.name, "Task started");

    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                info!(
                    task = options.name,
                    attempts = attempt + 1,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Task completed"
                );
                return Ok(value);
            }
            Err(err) if attempt < options.retries => {
                attempt += 1;
                warn!(
                    task = options.name,
                    attempt,
                    max_retries = options.retries,
                    error = %err,
                    "Task failed; retrying"
                );
                if !options.retry_delay.is_zero() {
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
            Err(err) => {
                error!(
                    task = options.name,
                    attempts = attempt + 1,
                    error = %err,
                    "Task failed"
                );
                return Err(err);
            }
        }
    }
}

/// Values that can be stored in the task cache.
pub trait CacheValue: Sized {
    fn encode(&self) -> Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl CacheValue for DataFrame {
    fn encode(&self) -> Result<Vec<u8>> {
        to_parquet_bytes(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        from_parquet_bytes(bytes)
    }
}

impl CacheValue for PathBuf {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntryMeta {
    task: String,
    created_at: DateTime<Utc>,
}

/// On-disk store of task results keyed by a hash of task name and inputs.
#[derive(Debug, Clone)]
pub struct TaskCache {
    dir: PathBuf,
}

impl TaskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// blake3 over the task name and the JSON encoding of its inputs.
    pub fn key<I: Serialize + ?Sized>(task: &str, inputs: &I) -> Result<String> {
        let mut hasher = Hasher::new();
        hasher.update(task.as_bytes());
        hasher.update(&[0]);
        hasher.update(&serde_json::to_vec(inputs)?);
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Returns the cached value if present and younger than `expiration`.
    pub fn lookup<T: CacheValue>(
        &self,
        key: &str,
        expiration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<T>> {
        let meta_path = self.meta_path(key);
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta: CacheEntryMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
        if now - meta.created_at > expiration {
            return Ok(None);
        }
        let bytes = std::fs::read(self.data_path(key))?;
        T::decode(&bytes).map(Some)
    }

    pub fn store<T: CacheValue>(
        &self,
        key: &str,
        task: &str,
        value: &T,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.data_path(key), value.encode()?)?;
        let meta = CacheEntryMeta {
            task: task.to_string(),
            created_at,
        };
        std::fs::write(self.meta_path(key), serde_json::to_vec_pretty(&meta)?)?;
        Ok(())
    }
}

/// Like [`run_task`], but consults `cache` first when the options carry a
/// cache expiration. Cache read/write failures are logged and ignored.
pub async fn run_cached_task<T, I, E, F, Fut>(
    options: &TaskOptions,
    cache: &TaskCache,
    inputs: &I,
    operation: F,
) -> std::result::Result<T, E>
where
    T: CacheValue + Send + 'static,
    I: Serialize + ?Sized,
    E: Display + From<PipelineError>,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let Some(expiration) = options.cache_expiration else {
        return run_task(options, operation).await;
    };

    let key = TaskCache::key(options.name, inputs)?;
    let lookup = {
        let cache = cache.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || cache.lookup::<T>(&key, expiration, Utc::now()))
            .await
            .map_err(PipelineError::from)
            .and_then(|found| found)
    };
    match lookup {
        Ok(Some(value)) => {
            info!(task = options.name, cache_key = %key, "Cache hit; skipping task");
            return Ok(value);
        }
        Ok(None) => {}
        Err(err) => {
            warn!(task = options.name, cache_key = %key, error = %err, "Ignoring unreadable cache entry");
        }
    }

    let value = run_task(options, operation).await?;
    let (value, stored) = {
        let cache = cache.clone();
        let key = key.clone();
        let task = options.name;
        tokio::task::spawn_blocking(move || {
            let stored = cache.store(&key, task, &value, Utc::now());
            (value, stored)
        })
        .await
        .map_err(PipelineError::from)?
    };
    if let Err(err) = stored {
        warn!(task = options.name, cache_key = %key, error = %err, "Failed to cache task result");
    }
    Ok(value)
}
