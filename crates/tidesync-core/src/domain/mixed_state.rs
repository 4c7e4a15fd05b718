//! The merged per-key record
//!
//! A [`MixedState`] is created fresh for every planning pass from the remote
//! listing, the local listing and both deletion histories. It is never
//! persisted on its own; only the plan that embeds it is stored for audit.

use serde::{Deserialize, Serialize};

use crate::domain::decision::{Decision, DecisionTrace, TraceInputs};
use crate::domain::errors::DomainError;
use crate::domain::key::SyncKey;

/// Everything the planner knows about one key. Timestamps are epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedState {
    pub key: SyncKey,
    pub exist_local: bool,
    pub exist_remote: bool,
    pub mtime_local: Option<i64>,
    pub mtime_remote: Option<i64>,
    pub deltime_local: Option<i64>,
    pub deltime_remote: Option<i64>,
    pub size_local: Option<u64>,
    pub size_remote: Option<u64>,
    pub size_local_enc: Option<u64>,
    pub size_remote_enc: Option<u64>,
    /// Remote changed after the baseline this plan compares against
    pub remote_unsync: bool,
    /// Object key on the remote when content encryption renames keys
    pub remote_encrypted_key: Option<String>,
    /// `mtime_local` was raised by a rename-destination event
    pub change_local_mtime_using_mapping: bool,
    /// `mtime_remote` was replaced by the recorded local mtime of the same version
    pub change_remote_mtime_using_mapping: bool,
    /// Local mtime exactly as listed, before any history adjustment
    pub mtime_local_listed: Option<i64>,
    /// Remote mtime exactly as listed, before any mapping substitution
    pub mtime_remote_listed: Option<i64>,
    pub etag_remote: Option<String>,
    /// Local creation time as listed (folders use it for resurrection checks)
    pub ctime_local: Option<i64>,
    pub decision: Option<Decision>,
    pub trace: Option<DecisionTrace>,
}

impl MixedState {
    /// Creates an empty record that exists on neither side
    pub fn new(key: SyncKey) -> Self {
        Self {
            key,
            exist_local: false,
            exist_remote: false,
            mtime_local: None,
            mtime_remote: None,
            deltime_local: None,
            deltime_remote: None,
            size_local: None,
            size_remote: None,
            size_local_enc: None,
            size_remote_enc: None,
            remote_unsync: false,
            remote_encrypted_key: None,
            change_local_mtime_using_mapping: false,
            change_remote_mtime_using_mapping: false,
            mtime_local_listed: None,
            mtime_remote_listed: None,
            etag_remote: None,
            ctime_local: None,
            decision: None,
            trace: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.key.is_folder()
    }

    /// Checks the existence/timestamp invariants
    ///
    /// Existence on a side requires a positive mtime on that side, and a
    /// recorded deletion time must be positive. `encrypted` additionally
    /// requires encrypted sizes for every existing file side.
    pub fn check_consistency(&self, encrypted: bool) -> Result<(), DomainError> {
        let fail = |reason: String| DomainError::Inconsistent {
            key: self.key.to_string(),
            reason,
        };

        if self.exist_local && !matches!(self.mtime_local, Some(t) if t > 0) {
            return Err(fail(format!(
                "exists locally with abnormal mtime {:?}",
                self.mtime_local
            )));
        }
        if self.exist_remote && !matches!(self.mtime_remote, Some(t) if t > 0) {
            return Err(fail(format!(
                "exists remotely with abnormal mtime {:?}",
                self.mtime_remote
            )));
        }
        if matches!(self.deltime_local, Some(t) if t <= 0) {
            return Err(fail(format!(
                "abnormal local deletion time {:?}",
                self.deltime_local
            )));
        }
        if matches!(self.deltime_remote, Some(t) if t <= 0) {
            return Err(fail(format!(
                "abnormal remote deletion time {:?}",
                self.deltime_remote
            )));
        }
        if encrypted && !self.is_folder() {
            if self.exist_local && self.size_local_enc.is_none() {
                return Err(fail("exists locally without encrypted size".to_string()));
            }
            if self.exist_remote && self.size_remote_enc.is_none() {
                return Err(fail("exists remotely without encrypted size".to_string()));
            }
        }
        Ok(())
    }

    /// Whether both sides hold content of the same size
    ///
    /// Encrypted sizes are compared when both are known, plain sizes otherwise.
    pub fn sizes_match(&self) -> bool {
        match (self.size_local_enc, self.size_remote_enc) {
            (Some(local), Some(remote)) => local == remote,
            _ => self.size_local == self.size_remote,
        }
    }

    /// The four candidate timestamps with absent sides normalized to -1
    pub fn trace_inputs(&self) -> TraceInputs {
        TraceInputs {
            mtime_local: self.mtime_local.filter(|_| self.exist_local).unwrap_or(-1),
            mtime_remote: self
                .mtime_remote
                .filter(|_| self.exist_remote)
                .unwrap_or(-1),
            deltime_local: self.deltime_local.unwrap_or(-1),
            deltime_remote: self.deltime_remote.unwrap_or(-1),
            size_local: self.size_local,
            size_remote: self.size_remote,
        }
    }

    /// Whether executing the assigned decision changes what either side shows
    pub fn is_touched(&self) -> bool {
        let Some(decision) = self.decision else {
            return false;
        };
        match decision {
            Decision::UploadLocalToRemote
            | Decision::DownloadRemoteToLocal
            | Decision::CreateFolder => true,
            Decision::UploadLocalDelHistToRemote
            | Decision::KeepRemoteDelHist
            | Decision::UploadLocalDelHistToRemoteFolder
            | Decision::KeepRemoteDelHistFolder => self.exist_local || self.exist_remote,
            Decision::SkipUploading
            | Decision::SkipUploadingTooLarge
            | Decision::SkipDownloadingTooLarge
            | Decision::SkipUsingLocalDelTooLarge
            | Decision::SkipUsingRemoteDelTooLarge
            | Decision::SkipFolder
            | Decision::ErrorLocalTooLargeConflictRemote
            | Decision::ErrorRemoteTooLargeConflictLocal => false,
        }
    }
}
