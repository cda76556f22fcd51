// crates/taxiflow-core/src/db.rs

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use tracing::info;

pub type DbPool = Pool<Postgres>;

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
}

/// Establish a Postgres connection pool from a `postgres://` URL.
pub async fn connect(database_url: &str) -> Result<DbPool> {
    let pool = pool_options()
        .connect(database_url)
        .await
        .with_context(|| "failed to connect to Postgres")?;
    info!("Database connection pool established");
    Ok(pool)
}

/// Establish a Postgres connection pool from discrete connection settings.
pub async fn connect_with(options: PgConnectOptions) -> Result<DbPool> {
    let pool = pool_options()
        .connect_with(options)
        .await
        .with_context(|| "failed to connect to Postgres")?;
    info!("Database connection pool established");
    Ok(pool)
}
