//! SQLite connection pool shared by the CLI and the dispatcher's workers.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    // Every worker may hold a connection while it writes grades.
    let pool = SqlitePoolOptions::new()
        .max_connections(config.worker.concurrency.max(1) as u32 + 1)
        .connect_with(options)
        .await?;

    tracing::debug!(path = %db_path.display(), "database connected");
    Ok(pool)
}
