//! Remote object-store port (driven/secondary port)
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific.
//! - Keys passed here are raw object keys: already prefixed by the engine and,
//!   when content encryption is active, already encrypted.
//! - Folders are zero-byte objects whose key ends with `/`.
//! - Rate limiting, 5xx answers and dropped connections are reported by
//!   wrapping the failure in [`TransientError`]; the engine retries only
//!   those and I/O errors of a transient kind, never by matching on text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Raw object key
    pub key: String,
    /// Last-modified in epoch milliseconds
    pub mtime: i64,
    /// Stored size in bytes
    pub size: u64,
    pub etag: Option<String>,
}

/// A failure the remote expects to go away on its own
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransientError {
    pub message: String,
}

impl TransientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Port trait for remote object-store operations
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Lists every object whose key starts with `prefix`
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<RemoteObject>>;

    /// Returns the metadata of one object, or `None` when it does not exist
    async fn get_meta(&self, key: &str) -> anyhow::Result<Option<RemoteObject>>;

    /// Stores `data` under `key`, replacing any previous object
    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<RemoteObject>;

    /// Fetches the whole content of an object
    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    /// Removes an object; removing a missing object is not an error
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}
