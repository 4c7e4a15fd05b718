//! Error types for conflict backups

use thiserror::Error;

/// Errors that can occur while preserving a conflicting version
#[derive(Debug, Error)]
pub enum ConflictError {
    /// No free backup name could be found next to the key
    #[error("no free conflict copy name for {0}")]
    NoFreeName(String),

    /// The generated backup name is not a valid key
    #[error("invalid conflict copy name: {0}")]
    InvalidName(String),

    /// Remote or local store failure while creating the backup
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
