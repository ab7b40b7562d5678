use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
pub use sqlx::SqlitePool;
use thiserror::Error;

pub mod merged;
pub mod registry;

pub use merged::{
    create_merged_table, load_known_place_ids, upsert_merged_record, upsert_merged_records,
};
pub use registry::{count_canonical_records, load_canonical_records, Partition};

const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database file not found: {0}")]
    MissingDatabase(String),
    #[error("invalid partition: start {start} is past end {end}")]
    InvalidPartition { start: u64, end: u64 },
    #[error("failed to encode column {column}: {source}")]
    Encode {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Open the registry read-only. The file must already exist.
///
/// # Errors
///
/// Returns [`DbError::MissingDatabase`] if the file is absent, or
/// [`DbError::Sqlx`] if the connection cannot be established.
pub async fn connect_registry(path: &Path) -> Result<SqlitePool, DbError> {
    if !path.exists() {
        return Err(DbError::MissingDatabase(path.display().to_string()));
    }
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    Ok(pool_options().connect_with(options).await?)
}

/// Open (creating if needed) the database that receives merged rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the connection cannot be established.
pub async fn connect_merged(path: &Path) -> Result<SqlitePool, DbError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    Ok(pool_options().connect_with(options).await?)
}

fn pool_options() -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(DEFAULT_MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
}
