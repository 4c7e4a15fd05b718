//! History database connection pool
//!
//! Opens the SQLite file configured as `storage.database` and keeps its
//! schema current. The applied schema version lives in SQLite's
//! `user_version` header, so a database written by a newer TideSync is
//! refused instead of being silently misread.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::CacheError;

/// Schema version this build reads and writes
pub const SCHEMA_VERSION: i64 = 1;

/// Migrations in order; entry `n` brings the schema from version `n` to `n + 1`
const MIGRATIONS: &[&str] = &[include_str!("migrations/20261019_initial.sql")];

/// Pool of SQLite connections to the history database
///
/// File databases get up to 4 connections and a 5-second busy timeout, so
/// concurrent dispatch tasks can record mappings without failing on write
/// contention. In-memory databases are per-connection and use exactly one.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the database at `db_path` and migrates it
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the file cannot be opened,
    /// or `CacheError::MigrationFailed` if the schema is newer than
    /// [`SCHEMA_VERSION`] or a migration fails.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to create history directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to open history database at {}: {e}",
                    db_path.display()
                ))
            })?;

        let version = Self::migrate(&pool).await?;
        info!(path = %db_path.display(), version, "History database ready");

        Ok(Self { pool })
    }

    /// Creates an in-memory database for tests
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Schema version recorded in the database header
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        Self::read_version(&self.pool).await
    }

    async fn read_version(pool: &SqlitePool) -> Result<i64, CacheError> {
        sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .map_err(|e| CacheError::MigrationFailed(format!("Failed to read schema version: {e}")))
    }

    /// Applies the migrations past the recorded version; returns the final version
    async fn migrate(pool: &SqlitePool) -> Result<i64, CacheError> {
        let current = Self::read_version(pool).await?;
        if current > SCHEMA_VERSION {
            return Err(CacheError::MigrationFailed(format!(
                "history schema v{current} is newer than v{SCHEMA_VERSION} supported by this build"
            )));
        }

        for (from, sql) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
            let to = from as i64 + 1;
            sqlx::raw_sql(sql).execute(pool).await.map_err(|e| {
                CacheError::MigrationFailed(format!("Failed to migrate history to v{to}: {e}"))
            })?;
            // PRAGMA does not take bound parameters
            sqlx::raw_sql(&format!("PRAGMA user_version = {to}"))
                .execute(pool)
                .await
                .map_err(|e| {
                    CacheError::MigrationFailed(format!("Failed to record schema v{to}: {e}"))
                })?;
            debug!(version = to, "History schema migrated");
        }
        Ok(SCHEMA_VERSION)
    }
}
