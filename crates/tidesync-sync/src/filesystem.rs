//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`LocalStore`] over a root directory using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content goes to a hidden temporary sibling first and
//!   is renamed into place, so a crash never leaves a half-written file.
//! - **Stamped mtimes**: downloads carry the remote mtime, set with
//!   `filetime` after the rename.
//! - **Blocking walks**: `walkdir` runs inside `spawn_blocking`.
//! - **Trash**: deletions go to the system trash when enabled.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context};
use filetime::FileTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use tidesync_core::domain::SyncKey;
use tidesync_core::ports::{LocalEntry, LocalStat, LocalStore};

/// Adapter that bridges the [`LocalStore`] port to a real directory
#[derive(Debug, Clone)]
pub struct LocalFileSystemAdapter {
    root: PathBuf,
    use_trash: bool,
}

impl LocalFileSystemAdapter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            use_trash: false,
        }
    }

    /// Sends deleted files to the system trash instead of unlinking them
    #[must_use]
    pub fn with_trash(mut self, use_trash: bool) -> Self {
        self.use_trash = use_trash;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &SyncKey) -> PathBuf {
        if key.is_root() {
            return self.root.clone();
        }
        self.root.join(key.as_str().trim_end_matches('/'))
    }
}

fn millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn stat_of(metadata: &std::fs::Metadata) -> LocalStat {
    let mtime = metadata.modified().map(millis).unwrap_or(0);
    let ctime = metadata.created().map(millis).unwrap_or(mtime);
    LocalStat {
        is_folder: metadata.is_dir(),
        mtime,
        ctime,
        size: if metadata.is_dir() { 0 } else { metadata.len() },
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

/// Relative key of a walked path, or `None` when it cannot be a key
fn key_for(root: &Path, path: &Path, is_dir: bool) -> Option<SyncKey> {
    let relative = path.strip_prefix(root).ok()?;
    let mut raw = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?
        .join("/");
    if raw.is_empty() {
        return None;
    }
    if is_dir {
        raw.push('/');
    }
    SyncKey::new(raw).ok()
}

fn walk(root: &Path, start: &Path, skip_hidden: bool) -> Vec<LocalEntry> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(start)
        .min_depth(if start == root { 1 } else { 0 })
        .into_iter()
        .filter_entry(|e| !(skip_hidden && e.depth() > 0 && is_hidden(e.file_name())));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping entry without metadata");
                continue;
            }
        };
        let Some(key) = key_for(root, entry.path(), metadata.is_dir()) else {
            warn!(path = %entry.path().display(), "Skipping path that is not a valid key");
            continue;
        };
        let stat = stat_of(&metadata);
        entries.push(LocalEntry {
            key,
            mtime: stat.mtime,
            ctime: stat.ctime,
            size: stat.size,
        });
    }
    entries
}

#[async_trait::async_trait]
impl LocalStore for LocalFileSystemAdapter {
    #[instrument(skip(self))]
    async fn list(&self, subtree: Option<&SyncKey>) -> anyhow::Result<Vec<LocalEntry>> {
        let root = self.root.clone();
        let (start, skip_hidden) = match subtree {
            Some(dir) => (self.path_of(dir), false),
            None => (self.root.clone(), true),
        };
        if tokio::fs::metadata(&start).await.is_err() {
            debug!(start = %start.display(), "Nothing to list");
            return Ok(Vec::new());
        }

        let entries = tokio::task::spawn_blocking(move || walk(&root, &start, skip_hidden))
            .await
            .context("listing task failed")?;
        debug!(count = entries.len(), "Listed local tree");
        Ok(entries)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn read(&self, key: &SyncKey) -> anyhow::Result<Vec<u8>> {
        let data = tokio::fs::read(self.path_of(key))
            .await
            .with_context(|| format!("reading {key}"))?;
        debug!(bytes = data.len(), "File read");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(key = %key, bytes = data.len()))]
    async fn write(&self, key: &SyncKey, data: &[u8], mtime: Option<i64>) -> anyhow::Result<()> {
        let target = self.path_of(key);
        let parent = target
            .parent()
            .ok_or_else(|| anyhow!("{key} has no parent folder"))?
            .to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        // Hidden sibling, so a crash leftover is never listed.
        let tmp_path = parent.join(format!(".{}.tidesync-tmp", key.name()));
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &target).await?;

        if let Some(mtime) = mtime {
            let stamp = FileTime::from_unix_time(
                mtime.div_euclid(1000),
                (mtime.rem_euclid(1000) * 1_000_000) as u32,
            );
            let stamped = target.clone();
            tokio::task::spawn_blocking(move || filetime::set_file_mtime(&stamped, stamp))
                .await??;
        }
        debug!("Write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn mkdir_p(&self, key: &SyncKey) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(self.path_of(key)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn rename(&self, from: &SyncKey, to: &SyncKey) -> anyhow::Result<()> {
        let target = self.path_of(to);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(self.path_of(from), &target)
            .await
            .with_context(|| format!("renaming {from} to {to}"))?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key, trash = self.use_trash))]
    async fn delete_file(&self, key: &SyncKey) -> anyhow::Result<()> {
        let path = self.path_of(key);
        if self.use_trash {
            tokio::task::spawn_blocking(move || trash::delete(&path))
                .await?
                .map_err(|e| anyhow!("moving {key} to trash: {e}"))?;
            return Ok(());
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn remove_dir_if_empty(&self, key: &SyncKey) -> anyhow::Result<bool> {
        let path = self.path_of(key);
        let mut children = match tokio::fs::read_dir(&path).await {
            Ok(children) => children,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if children.next_entry().await?.is_some() {
            return Ok(false);
        }
        tokio::fs::remove_dir(&path).await?;
        Ok(true)
    }

    async fn stat(&self, key: &SyncKey) -> anyhow::Result<Option<LocalStat>> {
        match tokio::fs::metadata(self.path_of(key)).await {
            Ok(metadata) => Ok(Some(stat_of(&metadata))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, text), fields(key = %key))]
    async fn append_text(&self, key: &SyncKey, text: &str) -> anyhow::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.path_of(key))
            .await
            .with_context(|| format!("opening {key} for append"))?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
