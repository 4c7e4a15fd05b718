//! Listing and history records
//!
//! These are the raw inputs of state assembly: one snapshot of each side's
//! listing plus what the history store remembers from earlier runs. All
//! timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};

use crate::domain::key::SyncKey;

/// A remote object as seen by the engine, keyed by its decrypted key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub key: SyncKey,
    /// Object key on the remote when it differs from `key` (content encryption)
    pub remote_encrypted_key: Option<String>,
    /// Last-modified reported by the remote listing
    pub mtime: i64,
    /// Object size as stored on the remote
    pub size: u64,
    /// Stored size when content encryption is active
    pub size_enc: Option<u64>,
    pub etag: Option<String>,
}

/// A file or folder found in the local tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntity {
    pub key: SyncKey,
    pub mtime: i64,
    /// Creation time, or the mtime when the platform does not report one
    pub ctime: i64,
    pub size: u64,
    /// Size the content will have once encrypted, when encryption is active
    pub size_enc: Option<u64>,
}

/// Kind of a recorded local history event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// The key was deleted locally
    Delete,
    /// The key was renamed away (its old name is gone)
    Rename,
    /// The key is the new name of a rename (evidence of existence)
    RenameDestination,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Delete => "delete",
            HistoryAction::Rename => "rename",
            HistoryAction::RenameDestination => "rename_destination",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delete" => Some(HistoryAction::Delete),
            "rename" => Some(HistoryAction::Rename),
            "rename_destination" => Some(HistoryAction::RenameDestination),
            _ => None,
        }
    }
}

/// Append-only record of a local delete or rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub key: SyncKey,
    pub action: HistoryAction,
    pub action_when: i64,
}

impl HistoryEvent {
    pub fn new(key: SyncKey, action: HistoryAction, action_when: i64) -> Self {
        Self {
            key,
            action,
            action_when,
        }
    }
}

/// Baseline recorded after a successful transfer of a key
///
/// Object stores stamp their own last-modified on upload, so the mapping
/// remembers which remote version corresponds to which local mtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMapping {
    pub key: SyncKey,
    pub local_mtime: i64,
    pub local_size: u64,
    pub remote_mtime: i64,
    pub remote_size: u64,
    pub remote_etag: Option<String>,
}

impl SyncMapping {
    /// Whether a listed remote object is still the version recorded here
    pub fn matches_remote(&self, remote: &RemoteEntity) -> bool {
        if self.remote_mtime != remote.mtime || self.remote_size != remote.size {
            return false;
        }
        match (&self.remote_etag, &remote.etag) {
            (Some(recorded), Some(listed)) => recorded == listed,
            _ => true,
        }
    }

    /// Whether a listed local entry is still the version recorded here
    pub fn matches_local(&self, local: &LocalEntity) -> bool {
        self.local_mtime == local.mtime && self.local_size == local.size
    }
}
