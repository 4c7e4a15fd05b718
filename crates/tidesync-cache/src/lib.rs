//! TideSync Cache - Persistent sync history
//!
//! SQLite-based store for:
//! - The last synced version of every key (mappings)
//! - Local delete and rename events
//! - The plans of past runs
//!
//! ## Architecture
//!
//! This crate implements the `HistoryStore` port from `tidesync-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use tidesync_cache::{DatabasePool, SqliteHistoryStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/tidesync/history.db")).await?;
//! let store = SqliteHistoryStore::new(pool.pool().clone());
//! // Use store as HistoryStore...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::{DatabasePool, SCHEMA_VERSION};
pub use repository::SqliteHistoryStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row no longer decodes into a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
