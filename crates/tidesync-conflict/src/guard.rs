//! Transfer guard
//!
//! Runs right before an upload or download overwrites one side. When that
//! side changed after the plan was computed, the version about to be lost
//! is preserved next to the original as a conflict copy. The guard never
//! blocks the transfer itself.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use tidesync_core::domain::{MixedState, SyncKey};
use tidesync_core::ports::{Cipher, LocalStat, LocalStore, RemoteObject, RemoteStore, SyncObserver};

use crate::error::ConflictError;
use crate::namer::ConflictNamer;

const MAX_NAME_ATTEMPTS: usize = 5;

/// What the guard did before a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Nothing raced the plan
    Clear,
    /// The clobbered version was saved under `backup`
    BackedUp { backup: SyncKey },
}

/// Creates conflict copies before racing transfers
pub struct ConflictGuard {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    cipher: Arc<dyn Cipher>,
    observer: Arc<dyn SyncObserver>,
}

impl ConflictGuard {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        cipher: Arc<dyn Cipher>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            remote,
            local,
            cipher,
            observer,
        }
    }

    /// Before an upload: saves the current remote version locally if it
    /// changed since the plan's snapshot
    pub async fn guard_upload(
        &self,
        state: &MixedState,
        remote_key: &str,
    ) -> Result<GuardOutcome, ConflictError> {
        let current = self.remote.get_meta(remote_key).await?;
        let Some(current) = current else {
            // Nothing on the remote to lose.
            return Ok(GuardOutcome::Clear);
        };
        if !state.remote_unsync && !remote_changed(state, &current) {
            return Ok(GuardOutcome::Clear);
        }

        let data = self.remote.download(remote_key).await?;
        let plain = self.cipher.decrypt(&data)?;
        let backup = self.free_backup_key(&state.key).await?;
        self.local.write(&backup, &plain, None).await?;
        self.finish_backup(&state.key, &backup, "remote").await?;
        Ok(GuardOutcome::BackedUp { backup })
    }

    /// Before a download: moves the local file aside if it changed since
    /// the plan's snapshot
    pub async fn guard_download(&self, state: &MixedState) -> Result<GuardOutcome, ConflictError> {
        let Some(current) = self.local.stat(&state.key).await? else {
            return Ok(GuardOutcome::Clear);
        };
        if current.is_folder || !local_changed(state, &current) {
            return Ok(GuardOutcome::Clear);
        }

        let backup = self.free_backup_key(&state.key).await?;
        self.local.rename(&state.key, &backup).await?;
        self.finish_backup(&state.key, &backup, "local").await?;
        Ok(GuardOutcome::BackedUp { backup })
    }

    async fn free_backup_key(&self, key: &SyncKey) -> Result<SyncKey, ConflictError> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let candidate = ConflictNamer::backup_key(key)?;
            if self.local.stat(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            debug!(candidate = %candidate, "Conflict copy name taken, retrying");
        }
        Err(ConflictError::NoFreeName(key.to_string()))
    }

    async fn finish_backup(
        &self,
        key: &SyncKey,
        backup: &SyncKey,
        side: &str,
    ) -> Result<(), ConflictError> {
        if ConflictNamer::is_text(backup) {
            self.local.append_text(backup, &banner(key, side)).await?;
        }
        warn!(key = %key, backup = %backup, side, "Conflict detected, kept a copy");
        self.observer.on_conflict_detected(key);
        Ok(())
    }
}

/// Whether the remote object differs from what the plan listed
///
/// Etags are compared when both are known, listed mtimes otherwise. An
/// object that appeared after planning always counts as changed.
pub fn remote_changed(state: &MixedState, current: &RemoteObject) -> bool {
    if !state.exist_remote {
        return true;
    }
    match (&current.etag, &state.etag_remote) {
        (Some(now), Some(planned)) => now != planned,
        _ => Some(current.mtime) != state.mtime_remote_listed,
    }
}

/// Whether the local file differs from what the plan listed
pub fn local_changed(state: &MixedState, current: &LocalStat) -> bool {
    if !state.exist_local {
        return true;
    }
    Some(current.mtime) != state.mtime_local_listed || Some(current.size) != state.size_local
}

fn banner(key: &SyncKey, side: &str) -> String {
    format!(
        "\n\n> [!WARNING]\n> TideSync conflict copy of `{key}`: this is the {side} version \
         that was about to be overwritten on {}.\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}
