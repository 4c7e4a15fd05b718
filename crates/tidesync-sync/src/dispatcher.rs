//! Decision dispatcher
//!
//! Maps each [`Decision`] to remote and local primitive calls, then brings
//! the history store up to date so the next planning pass starts from a
//! consistent baseline:
//!
//! - transfers record a fresh [`SyncMapping`] for the key
//! - deletions forget the mapping
//! - every mutating decision clears the key's delete/rename events

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, instrument};

use tidesync_conflict::ConflictGuard;
use tidesync_core::domain::{Decision, MixedState, SyncMapping};
use tidesync_core::ports::{
    remote_object_key, Cipher, HistoryStore, LocalStore, RemoteStore, SyncObserver,
};

use crate::retry::with_retry;

/// Content type of zero-byte folder marker objects
pub const FOLDER_CONTENT_TYPE: &str = "application/x-directory";

/// Applies one decided record
#[async_trait::async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, state: &MixedState) -> Result<()>;
}

/// Dispatcher backed by the store ports
pub struct Dispatcher {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    history: Arc<dyn HistoryStore>,
    cipher: Arc<dyn Cipher>,
    guard: ConflictGuard,
    prefix: String,
}

impl Dispatcher {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        history: Arc<dyn HistoryStore>,
        cipher: Arc<dyn Cipher>,
        observer: Arc<dyn SyncObserver>,
        prefix: impl Into<String>,
    ) -> Self {
        let guard = ConflictGuard::new(
            Arc::clone(&remote),
            Arc::clone(&local),
            Arc::clone(&cipher),
            observer,
        );
        Self {
            remote,
            local,
            history,
            cipher,
            guard,
            prefix: prefix.into(),
        }
    }

    async fn upload(&self, state: &MixedState) -> Result<()> {
        let remote_key = remote_object_key(&self.prefix, self.cipher.as_ref(), state)?;
        self.guard.guard_upload(state, &remote_key).await?;

        // Stat before reading so a concurrent edit shows up as a change next run.
        let before = self
            .local
            .stat(&state.key)
            .await?
            .ok_or_else(|| anyhow!("{} disappeared before upload", state.key))?;
        let data = self.local.read(&state.key).await?;
        let payload = self.cipher.encrypt(&data)?;
        let content_type = if self.cipher.is_passthrough() {
            content_type_for(state.key.name())
        } else {
            "application/octet-stream"
        };

        let meta = with_retry("upload", || {
            self.remote
                .upload(&remote_key, payload.clone(), content_type)
        })
        .await
        .with_context(|| format!("uploading {}", state.key))?;

        self.history
            .upsert_mapping(&SyncMapping {
                key: state.key.clone(),
                local_mtime: before.mtime,
                local_size: before.size,
                remote_mtime: meta.mtime,
                remote_size: meta.size,
                remote_etag: meta.etag,
            })
            .await?;
        self.history.clear_events(&state.key).await
    }

    async fn download(&self, state: &MixedState) -> Result<()> {
        self.guard.guard_download(state).await?;

        let remote_key = remote_object_key(&self.prefix, self.cipher.as_ref(), state)?;
        let data = with_retry("download", || self.remote.download(&remote_key))
            .await
            .with_context(|| format!("downloading {}", state.key))?;
        let plain = self.cipher.decrypt(&data)?;

        self.local
            .write(&state.key, &plain, state.mtime_remote)
            .await?;
        let after = self
            .local
            .stat(&state.key)
            .await?
            .ok_or_else(|| anyhow!("{} missing right after download", state.key))?;

        self.history
            .upsert_mapping(&SyncMapping {
                key: state.key.clone(),
                local_mtime: after.mtime,
                local_size: after.size,
                remote_mtime: state.mtime_remote_listed.unwrap_or_default(),
                remote_size: state.size_remote.unwrap_or_default(),
                remote_etag: state.etag_remote.clone(),
            })
            .await?;
        self.history.clear_events(&state.key).await
    }

    async fn delete_file(&self, state: &MixedState) -> Result<()> {
        if state.exist_local && self.local.stat(&state.key).await?.is_some() {
            self.local.delete_file(&state.key).await?;
        }
        if state.exist_remote {
            let remote_key = remote_object_key(&self.prefix, self.cipher.as_ref(), state)?;
            with_retry("delete", || self.remote.delete(&remote_key)).await?;
        }
        self.history.remove_mapping(&state.key).await?;
        self.history.clear_events(&state.key).await
    }

    async fn delete_folder(&self, state: &MixedState) -> Result<()> {
        if state.exist_local
            && self.local.stat(&state.key).await?.is_some()
            && !self.local.remove_dir_if_empty(&state.key).await?
        {
            debug!(key = %state.key, "Local folder not empty, kept");
        }
        if state.exist_remote {
            let remote_key = remote_object_key(&self.prefix, self.cipher.as_ref(), state)?;
            with_retry("delete", || self.remote.delete(&remote_key)).await?;
        }
        self.history.clear_events(&state.key).await
    }

    async fn create_folder(&self, state: &MixedState) -> Result<()> {
        if !state.exist_local {
            self.local.mkdir_p(&state.key).await?;
        }
        if !state.exist_remote {
            let remote_key = remote_object_key(&self.prefix, self.cipher.as_ref(), state)?;
            with_retry("mkdir", || {
                self.remote
                    .upload(&remote_key, Vec::new(), FOLDER_CONTENT_TYPE)
            })
            .await?;
        }
        self.history.clear_events(&state.key).await
    }
}

#[async_trait::async_trait]
impl Dispatch for Dispatcher {
    #[instrument(skip(self, state), fields(key = %state.key))]
    async fn dispatch(&self, state: &MixedState) -> Result<()> {
        let Some(decision) = state.decision else {
            bail!("{} reached dispatch without a decision", state.key);
        };
        debug!(%decision, "Dispatching");

        match decision {
            Decision::UploadLocalToRemote => self.upload(state).await,
            Decision::DownloadRemoteToLocal => self.download(state).await,
            Decision::UploadLocalDelHistToRemote | Decision::KeepRemoteDelHist => {
                self.delete_file(state).await
            }
            Decision::UploadLocalDelHistToRemoteFolder | Decision::KeepRemoteDelHistFolder => {
                self.delete_folder(state).await
            }
            Decision::CreateFolder => self.create_folder(state).await,
            Decision::SkipUploading
            | Decision::SkipUploadingTooLarge
            | Decision::SkipDownloadingTooLarge
            | Decision::SkipUsingLocalDelTooLarge
            | Decision::SkipUsingRemoteDelTooLarge
            | Decision::SkipFolder => Ok(()),
            Decision::ErrorLocalTooLargeConflictRemote
            | Decision::ErrorRemoteTooLargeConflictLocal => {
                bail!("{}: {decision} must be resolved before syncing", state.key)
            }
        }
    }
}

/// Content type sent with plain uploads
fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "html" => "text/html",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
