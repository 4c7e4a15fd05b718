//! Directory-backed remote store
//!
//! Gives a plain directory object-store semantics so a second folder (a
//! mounted share, a USB drive) can act as the remote:
//!
//! - object keys map to relative paths, folder markers (`key/`) to folders
//! - last-modified is whatever the filesystem stamps on write
//! - etags are the hex SHA-256 of the content

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use tidesync_core::ports::{RemoteObject, RemoteStore};

const TMP_SUFFIX: &str = ".tidesync-upload";

/// [`RemoteStore`] over a local directory
#[derive(Debug, Clone)]
pub struct DirectoryRemoteStore {
    root: PathBuf,
}

impl DirectoryRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> anyhow::Result<PathBuf> {
        let trimmed = key.trim_end_matches('/');
        if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
            bail!("invalid object key: {key:?}");
        }
        if trimmed.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
            bail!("invalid object key: {key:?}");
        }
        Ok(self.root.join(trimmed))
    }
}

fn millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn etag_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Metadata of the object stored at `path`, computing the etag for files
fn object_at(key: String, path: &Path) -> std::io::Result<RemoteObject> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata.modified().map(millis).unwrap_or(0);
    if metadata.is_dir() {
        return Ok(RemoteObject {
            key,
            mtime,
            size: 0,
            etag: None,
        });
    }
    let data = std::fs::read(path)?;
    Ok(RemoteObject {
        key,
        mtime,
        size: metadata.len(),
        etag: Some(etag_of(&data)),
    })
}

fn list_blocking(root: &Path, prefix: &str) -> Vec<RemoteObject> {
    let mut objects = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable remote entry");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(mut key) = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join("/"))
        else {
            warn!(path = %entry.path().display(), "Skipping non UTF-8 object name");
            continue;
        };
        if key.ends_with(TMP_SUFFIX) {
            continue;
        }
        if entry.file_type().is_dir() {
            key.push('/');
        }
        if !key.starts_with(prefix) {
            continue;
        }
        match object_at(key, entry.path()) {
            Ok(object) => objects.push(object),
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Skipping object"),
        }
    }
    objects
}

#[async_trait::async_trait]
impl RemoteStore for DirectoryRemoteStore {
    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<RemoteObject>> {
        if tokio::fs::metadata(&self.root).await.is_err() {
            debug!(root = %self.root.display(), "Remote root missing, listing nothing");
            return Ok(Vec::new());
        }
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let objects = tokio::task::spawn_blocking(move || list_blocking(&root, &prefix))
            .await
            .context("remote listing task failed")?;
        debug!(count = objects.len(), "Listed remote objects");
        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn get_meta(&self, key: &str) -> anyhow::Result<Option<RemoteObject>> {
        let path = self.path_of(key)?;
        let owned_key = key.to_string();
        let wants_folder = key.ends_with('/');
        let result = tokio::task::spawn_blocking(move || object_at(owned_key, &path)).await?;
        match result {
            Ok(object) if (object.etag.is_none()) == wants_folder => Ok(Some(object)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<RemoteObject> {
        let path = self.path_of(key)?;
        if key.ends_with('/') {
            tokio::fs::create_dir_all(&path).await?;
        } else {
            let parent = path
                .parent()
                .ok_or_else(|| anyhow!("object {key} has no parent"))?;
            tokio::fs::create_dir_all(parent).await?;
            let mut tmp = path.as_os_str().to_owned();
            tmp.push(TMP_SUFFIX);
            let tmp = PathBuf::from(tmp);
            tokio::fs::write(&tmp, &data).await?;
            tokio::fs::rename(&tmp, &path).await?;
        }
        debug!(content_type, "Object stored");

        self.get_meta(key)
            .await?
            .ok_or_else(|| anyhow!("object {key} missing right after upload"))
    }

    #[instrument(skip(self))]
    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        if key.ends_with('/') {
            return Ok(Vec::new());
        }
        let path = self.path_of(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("object {key} not readable"))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_of(key)?;
        let result = if key.ends_with('/') {
            // A folder marker only goes away once nothing is stored below it.
            match tokio::fs::remove_dir(&path).await {
                Err(e) if e.kind() != ErrorKind::NotFound && path.is_dir() => {
                    debug!(error = %e, "Folder still holds objects, kept");
                    Ok(())
                }
                other => other,
            }
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
