//! Per-key decisions
//!
//! [`Decision`] is the closed set of actions a planning pass can assign to a
//! key. Every consumer (dispatcher, phase splitter, touched-key filter)
//! matches on it exhaustively, so adding a variant forces each of them to
//! handle it.
//!
//! [`DecisionTrace`] records which rule produced the decision together with
//! the inputs it compared, so tests and logs can explain a decision without
//! magic branch numbers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The single action assigned to a key for one sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    /// Both sides hold the same version
    SkipUploading,
    /// Local is newest but larger than the size limit
    SkipUploadingTooLarge,
    /// Remote is newest but larger than the size limit
    SkipDownloadingTooLarge,
    /// Local deletion is newest but a side is larger than the size limit
    SkipUsingLocalDelTooLarge,
    /// Remote deletion is newest but a side is larger than the size limit
    SkipUsingRemoteDelTooLarge,
    /// Push local content to the remote
    UploadLocalToRemote,
    /// Pull remote content to the local tree
    DownloadRemoteToLocal,
    /// Propagate a local deletion: remove both copies, advertise a tombstone
    UploadLocalDelHistToRemote,
    /// Accept a remote deletion: remove both copies, keep the tombstone
    KeepRemoteDelHist,
    /// Local is too large to handle while the remote side would be touched
    ErrorLocalTooLargeConflictRemote,
    /// Remote is too large to handle while the local side would be touched
    ErrorRemoteTooLargeConflictLocal,
    /// Folder exists on both sides and stays
    SkipFolder,
    /// Folder must exist on both sides but is missing on one
    CreateFolder,
    /// Propagate a local folder deletion
    UploadLocalDelHistToRemoteFolder,
    /// Accept a remote folder deletion
    KeepRemoteDelHistFolder,
}

impl Decision {
    /// Decisions that remove the key and record a tombstone on the remote
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            Decision::UploadLocalDelHistToRemote
                | Decision::KeepRemoteDelHist
                | Decision::UploadLocalDelHistToRemoteFolder
                | Decision::KeepRemoteDelHistFolder
        )
    }

    /// Decisions that must be resolved by the user before execution
    pub fn is_oversized_conflict(&self) -> bool {
        matches!(
            self,
            Decision::ErrorLocalTooLargeConflictRemote | Decision::ErrorRemoteTooLargeConflictLocal
        )
    }

    /// Decisions that perform no mutation at all
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Decision::SkipUploading
                | Decision::SkipUploadingTooLarge
                | Decision::SkipDownloadingTooLarge
                | Decision::SkipUsingLocalDelTooLarge
                | Decision::SkipUsingRemoteDelTooLarge
                | Decision::SkipFolder
        )
    }

    /// Decisions that move file content across sides
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            Decision::UploadLocalToRemote | Decision::DownloadRemoteToLocal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::SkipUploading => "skipUploading",
            Decision::SkipUploadingTooLarge => "skipUploadingTooLarge",
            Decision::SkipDownloadingTooLarge => "skipDownloadingTooLarge",
            Decision::SkipUsingLocalDelTooLarge => "skipUsingLocalDelTooLarge",
            Decision::SkipUsingRemoteDelTooLarge => "skipUsingRemoteDelTooLarge",
            Decision::UploadLocalToRemote => "uploadLocalToRemote",
            Decision::DownloadRemoteToLocal => "downloadRemoteToLocal",
            Decision::UploadLocalDelHistToRemote => "uploadLocalDelHistToRemote",
            Decision::KeepRemoteDelHist => "keepRemoteDelHist",
            Decision::ErrorLocalTooLargeConflictRemote => "errorLocalTooLargeConflictRemote",
            Decision::ErrorRemoteTooLargeConflictLocal => "errorRemoteTooLargeConflictLocal",
            Decision::SkipFolder => "skipFolder",
            Decision::CreateFolder => "createFolder",
            Decision::UploadLocalDelHistToRemoteFolder => "uploadLocalDelHistToRemoteFolder",
            Decision::KeepRemoteDelHistFolder => "keepRemoteDelHistFolder",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule of the decision algorithm produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    /// Local mtime is the maximum and equals the remote mtime
    LocalMtimeEqualsRemote,
    /// Local mtime is the strict maximum over the remote mtime
    LocalMtimeNewest,
    /// Remote mtime is the maximum
    RemoteMtimeNewest,
    /// Local deletion time is the maximum
    LocalDeletionNewest,
    /// Remote deletion time is the maximum
    RemoteDeletionNewest,
    /// A descendant must survive, so the folder survives
    FolderKeptByChildren,
    /// The folder has no deletion records
    FolderWithoutDeletions,
    /// The folder was created or touched on disk after its deletion
    FolderRecreatedAfterDeletion,
    /// The folder was renamed into place after its deletion
    FolderRenamedAfterDeletion,
    /// Local folder deletion is newer than the remote one
    FolderLocalDeletionNewer,
    /// Remote folder deletion is newer than or equal to the local one
    FolderRemoteDeletionNewer,
}

/// Outcome of the size-limit check inside a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCheck {
    /// No limit configured, or the rule does not look at sizes
    Unlimited,
    WithinLimit,
    LocalTooLarge,
    RemoteTooLarge,
    BothTooLarge,
}

/// The four timestamps (absent = -1) and sizes a rule compared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceInputs {
    pub mtime_local: i64,
    pub mtime_remote: i64,
    pub deltime_local: i64,
    pub deltime_remote: i64,
    pub size_local: Option<u64>,
    pub size_remote: Option<u64>,
}

/// Structured explanation attached to each decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub rule: DecisionRule,
    pub size_check: SizeCheck,
    pub inputs: TraceInputs,
}
