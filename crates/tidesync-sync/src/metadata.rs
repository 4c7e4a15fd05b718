//! Remote metadata file
//!
//! One remote object carries the deletion tombstones every device needs to
//! see. It is read at the start of a run as the remote deletion history and
//! re-uploaded only when the tombstone list changed structurally, so idle
//! runs never touch the remote.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tidesync_core::domain::DeletionOnRemote;
use tidesync_core::ports::{Cipher, RemoteStore};

use crate::retry::with_retry;

/// Format version written by this crate
pub const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFile {
    pub version: u32,
    /// Epoch millis of the run that wrote the file
    pub generated_when: i64,
    pub deletions: Vec<DeletionOnRemote>,
}

impl MetadataFile {
    pub fn new(mut deletions: Vec<DeletionOnRemote>) -> Self {
        canonicalize(&mut deletions);
        Self {
            version: METADATA_VERSION,
            generated_when: Utc::now().timestamp_millis(),
            deletions,
        }
    }
}

impl Default for MetadataFile {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn canonicalize(deletions: &mut Vec<DeletionOnRemote>) {
    deletions.sort_by(|a, b| a.key.cmp(&b.key).then(b.action_when.cmp(&a.action_when)));
    deletions.dedup_by(|a, b| a.key == b.key);
}

/// Whether two tombstone lists differ once ordering is ignored
pub fn deletions_changed(previous: &[DeletionOnRemote], current: &[DeletionOnRemote]) -> bool {
    let mut previous = previous.to_vec();
    let mut current = current.to_vec();
    canonicalize(&mut previous);
    canonicalize(&mut current);
    previous != current
}

/// Reads and writes the metadata object under the remote prefix
pub struct MetadataStore {
    remote: Arc<dyn RemoteStore>,
    cipher: Arc<dyn Cipher>,
    object_key: String,
}

impl MetadataStore {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        cipher: Arc<dyn Cipher>,
        prefix: &str,
        file_name: &str,
    ) -> Self {
        Self {
            remote,
            cipher,
            object_key: format!("{prefix}{file_name}"),
        }
    }

    /// Raw object key of the metadata file; it is never encrypted
    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    /// Loads the file, or an empty one when it does not exist yet
    pub async fn load(&self, exists: bool) -> Result<MetadataFile> {
        if !exists {
            debug!(key = %self.object_key, "No metadata file yet");
            return Ok(MetadataFile::default());
        }
        let data = with_retry("download metadata", || self.remote.download(&self.object_key))
            .await?;
        let plain = self.cipher.decrypt(&data)?;
        let file: MetadataFile = serde_json::from_slice(&plain)
            .with_context(|| format!("parsing metadata file {}", self.object_key))?;
        debug!(
            version = file.version,
            deletions = file.deletions.len(),
            "Loaded metadata file"
        );
        Ok(file)
    }

    /// Uploads `current` unless it equals `previous`; returns whether it did
    pub async fn save_if_changed(
        &self,
        previous: &[DeletionOnRemote],
        current: Vec<DeletionOnRemote>,
    ) -> Result<bool> {
        if !deletions_changed(previous, &current) {
            debug!("Deletions unchanged, metadata file kept");
            return Ok(false);
        }

        let file = MetadataFile::new(current);
        let json = serde_json::to_vec_pretty(&file)?;
        let payload = self.cipher.encrypt(&json)?;
        with_retry("upload metadata", || {
            self.remote
                .upload(&self.object_key, payload.clone(), "application/json")
        })
        .await?;
        info!(deletions = file.deletions.len(), "Metadata file updated");
        Ok(true)
    }
}
