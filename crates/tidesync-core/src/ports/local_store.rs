//! Local file-store port (driven/secondary port)
//!
//! All paths are [`SyncKey`]s relative to the synced root. Folder keys end
//! with `/`.

use serde::{Deserialize, Serialize};

use crate::domain::key::SyncKey;

/// One entry of a local tree listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub key: SyncKey,
    /// Modification time in epoch milliseconds
    pub mtime: i64,
    /// Creation time in epoch milliseconds (falls back to `mtime`)
    pub ctime: i64,
    /// Size in bytes (0 for folders)
    pub size: u64,
}

/// Result of a stat call on an existing path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStat {
    pub is_folder: bool,
    pub mtime: i64,
    pub ctime: i64,
    pub size: u64,
}

/// Port trait for local tree operations
#[async_trait::async_trait]
pub trait LocalStore: Send + Sync {
    /// Lists the tree
    ///
    /// With `subtree = None` the whole tree is walked and hidden entries
    /// (any segment starting with `.`) are skipped. With `Some(dir)` only that
    /// folder is walked and hidden entries inside it are included, which is
    /// how the configuration folder is listed.
    async fn list(&self, subtree: Option<&SyncKey>) -> anyhow::Result<Vec<LocalEntry>>;

    /// Reads the whole content of a file
    async fn read(&self, key: &SyncKey) -> anyhow::Result<Vec<u8>>;

    /// Writes a file, creating parent folders, optionally stamping its mtime
    async fn write(&self, key: &SyncKey, data: &[u8], mtime: Option<i64>) -> anyhow::Result<()>;

    /// Creates a folder and all missing parents
    async fn mkdir_p(&self, key: &SyncKey) -> anyhow::Result<()>;

    /// Renames a file or folder
    async fn rename(&self, from: &SyncKey, to: &SyncKey) -> anyhow::Result<()>;

    /// Removes a file (to the system trash when the adapter is configured so)
    async fn delete_file(&self, key: &SyncKey) -> anyhow::Result<()>;

    /// Removes a folder only when it is empty; returns whether it was removed
    async fn remove_dir_if_empty(&self, key: &SyncKey) -> anyhow::Result<bool>;

    /// Returns metadata for a path, or `None` when it does not exist
    async fn stat(&self, key: &SyncKey) -> anyhow::Result<Option<LocalStat>>;

    /// Appends text to the end of a file
    async fn append_text(&self, key: &SyncKey, text: &str) -> anyhow::Result<()>;
}
