//! Shared in-memory stores for integration tests
//!
//! - [`MemoryRemote`] stamps its own last-modified on upload from a clock far
//!   ahead of the local test times, like a real object store would
//! - [`MemoryLocal`] creates parent folders on write, like a filesystem
//! - [`MemoryHistory`] keeps mappings, events and plans in maps
//! - [`RecordingObserver`] records every notification
//! - [`HexCipher`] hex-encodes keys and tags content, so encrypted runs are
//!   easy to inspect

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use sha2::{Digest, Sha256};

use tidesync_core::config::{Config, ConfigBuilder};
use tidesync_core::domain::{
    Decision, HistoryEvent, MixedState, SyncKey, SyncMapping, SyncPlan,
};
use tidesync_core::ports::{
    Cipher, HistoryStore, LocalEntry, LocalStat, LocalStore, RemoteObject, RemoteStore,
    SyncObserver, TransientError,
};
use tidesync_sync::SyncEngine;

pub const PREFIX: &str = "vault/";
pub const METADATA_KEY: &str = "vault/_tidesync_metadata.json";

pub fn key(raw: &str) -> SyncKey {
    SyncKey::new(raw).unwrap()
}

// ============================================================================
// Remote
// ============================================================================

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub mtime: i64,
    pub etag: Option<String>,
}

pub struct MemoryRemote {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    clock: AtomicI64,
    failing: Mutex<HashSet<String>>,
    flaky: Mutex<BTreeMap<String, u32>>,
    uploads: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            clock: AtomicI64::new(1_000_000),
            failing: Mutex::new(HashSet::new()),
            flaky: Mutex::new(BTreeMap::new()),
            uploads: AtomicUsize::new(0),
        }
    }

    fn etag(key: &str, data: &[u8]) -> Option<String> {
        (!key.ends_with('/')).then(|| hex::encode(Sha256::digest(data)))
    }

    /// Seeds an object with a chosen last-modified
    pub fn put(&self, key: &str, data: &[u8], mtime: i64) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                mtime,
                etag: Self::etag(key, data),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Makes every later call touching `key` fail
    pub fn fail_on(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    /// Makes the next `times` calls touching `key` fail with a 503
    pub fn fail_transiently(&self, key: &str, times: u32) {
        self.flaky.lock().unwrap().insert(key.to_string(), times);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.flaky.lock().unwrap().clear();
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> anyhow::Result<()> {
        if self.failing.lock().unwrap().contains(key) {
            bail!("permission denied for {key}");
        }
        if let Some(left) = self.flaky.lock().unwrap().get_mut(key) {
            if *left > 0 {
                *left -= 1;
                return Err(TransientError::new(format!("503 Service Unavailable: {key}")).into());
            }
        }
        Ok(())
    }

    fn meta(key: &str, object: &StoredObject) -> RemoteObject {
        RemoteObject {
            key: key.to_string(),
            mtime: object.mtime,
            size: object.data.len() as u64,
            etag: object.etag.clone(),
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryRemote {
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<RemoteObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| Self::meta(k, o))
            .collect())
    }

    async fn get_meta(&self, key: &str) -> anyhow::Result<Option<RemoteObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| Self::meta(key, o)))
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> anyhow::Result<RemoteObject> {
        self.check(key)?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let mtime = self.clock.fetch_add(1000, Ordering::SeqCst) + 1000;
        let object = StoredObject {
            etag: Self::etag(key, &data),
            data,
            mtime,
        };
        let meta = Self::meta(key, &object);
        self.objects.lock().unwrap().insert(key.to_string(), object);
        Ok(meta)
    }

    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.check(key)?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| anyhow!("no such object: {key}"))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.check(key)?;
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// ============================================================================
// Local tree
// ============================================================================

#[derive(Debug, Clone)]
struct LocalFile {
    data: Vec<u8>,
    mtime: i64,
    ctime: i64,
}

pub struct MemoryLocal {
    entries: Mutex<BTreeMap<SyncKey, LocalFile>>,
    clock: AtomicI64,
}

fn is_hidden(key: &SyncKey) -> bool {
    key.as_str()
        .trim_end_matches('/')
        .split('/')
        .any(|segment| segment.starts_with('.'))
}

impl MemoryLocal {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            clock: AtomicI64::new(5_000),
        }
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn insert_parents(&self, entries: &mut BTreeMap<SyncKey, LocalFile>, key: &SyncKey) {
        let mut parent = key.parent();
        while !parent.is_root() {
            if !entries.contains_key(&parent) {
                let now = self.tick();
                entries.insert(
                    parent.clone(),
                    LocalFile {
                        data: Vec::new(),
                        mtime: now,
                        ctime: now,
                    },
                );
            }
            parent = parent.parent();
        }
    }

    /// Seeds a file (and its parent folders) with a chosen mtime
    pub fn put(&self, raw: &str, data: &[u8], mtime: i64) {
        let key = key(raw);
        let mut entries = self.entries.lock().unwrap();
        self.insert_parents(&mut entries, &key);
        entries.insert(
            key,
            LocalFile {
                data: data.to_vec(),
                mtime,
                ctime: mtime,
            },
        );
    }

    /// Seeds a folder with chosen times
    pub fn put_folder(&self, raw: &str, mtime: i64, ctime: i64) {
        let key = key(raw);
        let mut entries = self.entries.lock().unwrap();
        self.insert_parents(&mut entries, &key);
        entries.insert(
            key,
            LocalFile {
                data: Vec::new(),
                mtime,
                ctime,
            },
        );
    }

    pub fn remove(&self, raw: &str) {
        self.entries.lock().unwrap().remove(&key(raw));
    }

    pub fn content(&self, raw: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(&key(raw))
            .map(|f| f.data.clone())
    }

    pub fn mtime(&self, raw: &str) -> Option<i64> {
        self.entries.lock().unwrap().get(&key(raw)).map(|f| f.mtime)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .keys()
            .map(|k| k.to_string())
            .collect()
    }
}

#[async_trait::async_trait]
impl LocalStore for MemoryLocal {
    async fn list(&self, subtree: Option<&SyncKey>) -> anyhow::Result<Vec<LocalEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(k, _)| match subtree {
                None => !is_hidden(k),
                Some(dir) => *k == dir || k.is_under(dir),
            })
            .map(|(k, f)| LocalEntry {
                key: k.clone(),
                mtime: f.mtime,
                ctime: f.ctime,
                size: f.data.len() as u64,
            })
            .collect())
    }

    async fn read(&self, key: &SyncKey) -> anyhow::Result<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|f| f.data.clone())
            .ok_or_else(|| anyhow!("no such file: {key}"))
    }

    async fn write(&self, key: &SyncKey, data: &[u8], mtime: Option<i64>) -> anyhow::Result<()> {
        let now = self.tick();
        let mut entries = self.entries.lock().unwrap();
        self.insert_parents(&mut entries, key);
        let ctime = entries.get(key).map(|f| f.ctime).unwrap_or(now);
        entries.insert(
            key.clone(),
            LocalFile {
                data: data.to_vec(),
                mtime: mtime.unwrap_or(now),
                ctime,
            },
        );
        Ok(())
    }

    async fn mkdir_p(&self, key: &SyncKey) -> anyhow::Result<()> {
        let now = self.tick();
        let mut entries = self.entries.lock().unwrap();
        self.insert_parents(&mut entries, key);
        entries.entry(key.clone()).or_insert(LocalFile {
            data: Vec::new(),
            mtime: now,
            ctime: now,
        });
        Ok(())
    }

    async fn rename(&self, from: &SyncKey, to: &SyncKey) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let file = entries
            .remove(from)
            .ok_or_else(|| anyhow!("no such file: {from}"))?;
        self.insert_parents(&mut entries, to);
        entries.insert(to.clone(), file);
        Ok(())
    }

    async fn delete_file(&self, key: &SyncKey) -> anyhow::Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn remove_dir_if_empty(&self, key: &SyncKey) -> anyhow::Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.keys().any(|k| k.is_under(key)) {
            return Ok(false);
        }
        Ok(entries.remove(key).is_some())
    }

    async fn stat(&self, key: &SyncKey) -> anyhow::Result<Option<LocalStat>> {
        Ok(self.entries.lock().unwrap().get(key).map(|f| LocalStat {
            is_folder: key.is_folder(),
            mtime: f.mtime,
            ctime: f.ctime,
            size: f.data.len() as u64,
        }))
    }

    async fn append_text(&self, key: &SyncKey, text: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let file = entries
            .get_mut(key)
            .ok_or_else(|| anyhow!("no such file: {key}"))?;
        file.data.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

// ============================================================================
// History
// ============================================================================

#[derive(Default)]
pub struct MemoryHistory {
    mappings: Mutex<BTreeMap<SyncKey, SyncMapping>>,
    events: Mutex<Vec<HistoryEvent>>,
    plans: Mutex<Vec<SyncPlan>>,
}

impl MemoryHistory {
    pub fn mapping(&self, raw: &str) -> Option<SyncMapping> {
        self.mappings.lock().unwrap().get(&key(raw)).cloned()
    }

    pub fn plan_count(&self) -> usize {
        self.plans.lock().unwrap().len()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistory {
    async fn mappings(&self) -> anyhow::Result<Vec<SyncMapping>> {
        Ok(self.mappings.lock().unwrap().values().cloned().collect())
    }

    async fn upsert_mapping(&self, mapping: &SyncMapping) -> anyhow::Result<()> {
        self.mappings
            .lock()
            .unwrap()
            .insert(mapping.key.clone(), mapping.clone());
        Ok(())
    }

    async fn remove_mapping(&self, key: &SyncKey) -> anyhow::Result<()> {
        self.mappings.lock().unwrap().remove(key);
        Ok(())
    }

    async fn events(&self) -> anyhow::Result<Vec<HistoryEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn record_event(&self, event: &HistoryEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn clear_events(&self, key: &SyncKey) -> anyhow::Result<()> {
        self.events.lock().unwrap().retain(|e| &e.key != key);
        Ok(())
    }

    async fn save_plan(&self, plan: &SyncPlan) -> anyhow::Result<()> {
        self.plans.lock().unwrap().push(plan.clone());
        Ok(())
    }

    async fn recent_plans(&self, limit: usize) -> anyhow::Result<Vec<SyncPlan>> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Observer
// ============================================================================

#[derive(Default)]
pub struct RecordingObserver {
    pub progress: Mutex<Vec<(usize, usize, SyncKey, Decision)>>,
    pub sizes_conflicts: Mutex<Vec<SyncKey>>,
    pub conflicts: Mutex<Vec<SyncKey>>,
}

impl SyncObserver for RecordingObserver {
    fn on_progress(&self, index: usize, total: usize, key: &SyncKey, decision: Decision) {
        self.progress
            .lock()
            .unwrap()
            .push((index, total, key.clone(), decision));
    }

    fn on_sizes_conflict(&self, conflicts: &[MixedState]) {
        self.sizes_conflicts
            .lock()
            .unwrap()
            .extend(conflicts.iter().map(|s| s.key.clone()));
    }

    fn on_conflict_detected(&self, key: &SyncKey) {
        self.conflicts.lock().unwrap().push(key.clone());
    }
}

// ============================================================================
// Cipher
// ============================================================================

/// Test cipher: keys are hex-encoded (folders keep their trailing `/`) and
/// content is prefixed with [`HexCipher::TAG`]
#[derive(Debug, Clone, Copy, Default)]
pub struct HexCipher;

impl HexCipher {
    pub const TAG: &'static [u8] = b"HEX1";

    /// Remote object key of a plain key, prefix included
    pub fn object_key(raw: &str) -> String {
        format!("{PREFIX}{}", HexCipher.encrypt_key(raw).unwrap())
    }
}

impl Cipher for HexCipher {
    fn is_passthrough(&self) -> bool {
        false
    }

    fn encrypt_key(&self, key: &str) -> anyhow::Result<String> {
        Ok(match key.strip_suffix('/') {
            Some(folder) => format!("{}/", hex::encode(folder)),
            None => hex::encode(key),
        })
    }

    fn decrypt_key(&self, remote_key: &str) -> anyhow::Result<String> {
        let (encoded, suffix) = match remote_key.strip_suffix('/') {
            Some(folder) => (folder, "/"),
            None => (remote_key, ""),
        };
        let plain = String::from_utf8(hex::decode(encoded)?)?;
        Ok(format!("{plain}{suffix}"))
    }

    fn encrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok([Self::TAG, data].concat())
    }

    fn decrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        data.strip_prefix(Self::TAG)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| anyhow!("content is not tagged"))
    }

    fn encrypted_size(&self, plain_size: u64) -> u64 {
        plain_size + Self::TAG.len() as u64
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub remote: Arc<MemoryRemote>,
    pub local: Arc<MemoryLocal>,
    pub history: Arc<MemoryHistory>,
    pub observer: Arc<RecordingObserver>,
    pub config: Config,
}

impl Harness {
    /// Stores with protection disabled and two concurrent dispatches
    pub fn new() -> Self {
        Self::with_config(
            ConfigBuilder::new()
                .remote_prefix(PREFIX)
                .concurrency(2)
                .protect_modify_percentage(100)
                .build(),
        )
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            remote: Arc::new(MemoryRemote::new()),
            local: Arc::new(MemoryLocal::new()),
            history: Arc::new(MemoryHistory::default()),
            observer: Arc::new(RecordingObserver::default()),
            config,
        }
    }

    pub fn engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.config.clone(),
            self.remote.clone(),
            self.local.clone(),
            self.history.clone(),
        )
        .with_observer(self.observer.clone())
    }

    pub fn encrypted_engine(&self) -> SyncEngine {
        self.engine().with_cipher(Arc::new(HexCipher))
    }
}
