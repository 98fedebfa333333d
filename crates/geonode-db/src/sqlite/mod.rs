//! SQLite repositories
//!
//! Every table stores the serialized record in a `data` column next to the
//! few columns queries filter or order on. The schema lives in
//! `migrations/` and is applied on connect.

mod assets;
mod executions;
mod limits;
mod tasks;
mod uploads;

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use geonode_core::AppError;

pub use assets::SqliteAssetRepository;
pub use executions::SqliteExecutionRepository;
pub use limits::SqliteLimitsRepository;
pub use tasks::SqliteTaskRepository;
pub use uploads::SqliteUploadRepository;

const MAX_CONNECTIONS: u32 = 5;

/// Open the database at `url` and apply pending migrations. An in-memory
/// database lives in a single connection that is never recycled.
#[tracing::instrument]
pub async fn connect(url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid DATABASE_URL '{}'", url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    let pool = pool_options
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .context("Failed to connect to the database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!(in_memory, "Database ready");
    Ok(pool)
}

pub(crate) fn db_err(err: sqlx::Error) -> AppError {
    tracing::error!(error = %err, "Database query failed");
    AppError::Database(err.to_string())
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| AppError::Database(format!("Failed to encode row: {}", e)))
}

pub(crate) fn decode<T: DeserializeOwned>(data: &str) -> Result<T, AppError> {
    serde_json::from_str(data).map_err(|e| AppError::Database(format!("Failed to decode row: {}", e)))
}

pub(crate) fn decode_row<T: DeserializeOwned>(row: &SqliteRow) -> Result<T, AppError> {
    let data: &str = row.try_get("data").map_err(db_err)?;
    decode(data)
}

/// Serialized name of a unit enum, as stored in status columns.
pub(crate) fn label<T: Serialize>(value: &T) -> Result<String, AppError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(AppError::Database(format!("{} is not a label", other))),
        Err(e) => Err(AppError::Database(e.to_string())),
    }
}

pub(crate) fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    connect("sqlite::memory:").await.unwrap()
}
