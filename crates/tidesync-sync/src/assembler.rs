//! State assembly
//!
//! Merges the independent sources of truth of one run into a single
//! `key -> MixedState` map:
//!
//! 1. remote listing (seeds the map)
//! 2. local listing, then the local configuration folder listing
//! 3. remote deletion tombstones (`deltime_remote`)
//! 4. local delete/rename history (`deltime_local`, or a raised `mtime_local`
//!    for rename destinations)
//!
//! The [`KeyFilter`] is applied at every merge point. Assembly performs no
//! I/O: listings and histories are fetched beforehand by the engine.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use tidesync_core::domain::{
    DeletionOnRemote, HistoryAction, HistoryEvent, LocalEntity, MixedState, RemoteEntity,
    SyncKey, SyncMapping,
};
use tidesync_core::ports::{Cipher, LocalEntry, RemoteObject};

use crate::filter::KeyFilter;

/// Everything state assembly consumes for one run
#[derive(Debug, Clone, Default)]
pub struct AssemblerInput {
    pub remote: Vec<RemoteEntity>,
    pub local: Vec<LocalEntity>,
    /// Listing of the configuration folder, when it is synchronized
    pub local_config: Option<Vec<LocalEntity>>,
    pub remote_deletions: Vec<DeletionOnRemote>,
    pub local_history: Vec<HistoryEvent>,
    pub mappings: Vec<SyncMapping>,
}

/// Builds the unified per-key state map
pub struct StateAssembler<'a> {
    filter: &'a KeyFilter,
}

impl<'a> StateAssembler<'a> {
    pub fn new(filter: &'a KeyFilter) -> Self {
        Self { filter }
    }

    pub fn assemble(&self, input: AssemblerInput) -> BTreeMap<SyncKey, MixedState> {
        let mappings: HashMap<SyncKey, SyncMapping> = input
            .mappings
            .into_iter()
            .map(|m| (m.key.clone(), m))
            .collect();
        let mut states: BTreeMap<SyncKey, MixedState> = BTreeMap::new();

        for remote in input.remote {
            if !self.filter.is_allowed(&remote.key) {
                continue;
            }
            let mut state = MixedState::new(remote.key.clone());
            state.exist_remote = true;
            state.mtime_remote_listed = Some(remote.mtime);
            state.mtime_remote = Some(remote.mtime);
            state.size_remote = Some(remote.size);
            state.size_remote_enc = remote.size_enc;
            state.etag_remote = remote.etag.clone();
            state.remote_encrypted_key = remote.remote_encrypted_key.clone();

            if let Some(mapping) = mappings.get(&remote.key) {
                if !remote.key.is_folder() && mapping.matches_remote(&remote) {
                    state.mtime_remote = Some(mapping.local_mtime);
                    state.change_remote_mtime_using_mapping = true;
                }
            }
            states.insert(remote.key, state);
        }

        let config_entries = input.local_config.unwrap_or_default();
        for local in input.local.into_iter().chain(config_entries) {
            if !self.filter.is_allowed(&local.key) {
                continue;
            }
            let state = states
                .entry(local.key.clone())
                .or_insert_with(|| MixedState::new(local.key.clone()));
            state.exist_local = true;
            state.mtime_local = Some(local.mtime);
            state.mtime_local_listed = Some(local.mtime);
            state.ctime_local = Some(local.ctime);
            state.size_local = Some(local.size);
            state.size_local_enc = local.size_enc;

            // Both sides moved away from the last synced version.
            if let Some(mapping) = mappings.get(&local.key) {
                if state.exist_remote
                    && !state.change_remote_mtime_using_mapping
                    && !mapping.matches_local(&local)
                {
                    debug!(key = %local.key, "Remote and local both changed since last sync");
                    state.remote_unsync = true;
                }
            }
        }

        for deletion in input.remote_deletions {
            if !self.filter.is_allowed(&deletion.key) {
                continue;
            }
            let state = states
                .entry(deletion.key.clone())
                .or_insert_with(|| MixedState::new(deletion.key.clone()));
            state.deltime_remote = Some(
                state
                    .deltime_remote
                    .map_or(deletion.action_when, |t| t.max(deletion.action_when)),
            );
        }

        for event in input.local_history {
            if !self.filter.is_allowed(&event.key) {
                continue;
            }
            let state = states
                .entry(event.key.clone())
                .or_insert_with(|| MixedState::new(event.key.clone()));
            match event.action {
                HistoryAction::Delete | HistoryAction::Rename => {
                    state.deltime_local = Some(
                        state
                            .deltime_local
                            .map_or(event.action_when, |t| t.max(event.action_when)),
                    );
                }
                HistoryAction::RenameDestination => {
                    state.mtime_local = Some(
                        state
                            .mtime_local
                            .map_or(event.action_when, |t| t.max(event.action_when)),
                    );
                    state.change_local_mtime_using_mapping = true;
                }
            }
        }

        debug!(keys = states.len(), "Assembled mixed states");
        states
    }
}

/// Converts a raw remote listing into entities keyed by plain keys
///
/// Objects outside `prefix`, the prefix marker itself and objects whose key
/// cannot be decrypted or validated are skipped with a warning.
pub fn remote_entities(
    objects: Vec<RemoteObject>,
    prefix: &str,
    cipher: &dyn Cipher,
) -> Vec<RemoteEntity> {
    let encrypted = !cipher.is_passthrough();
    let mut entities = Vec::with_capacity(objects.len());

    for object in objects {
        let Some(rest) = object.key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() || rest == "/" {
            continue;
        }
        let plain = if encrypted {
            match cipher.decrypt_key(rest) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Skipping undecryptable remote key");
                    continue;
                }
            }
        } else {
            rest.to_string()
        };
        let key = match SyncKey::new(plain) {
            Ok(key) => key,
            Err(e) => {
                warn!(key = %object.key, error = %e, "Skipping invalid remote key");
                continue;
            }
        };

        entities.push(RemoteEntity {
            key,
            remote_encrypted_key: encrypted.then(|| rest.to_string()),
            mtime: object.mtime,
            size: object.size,
            size_enc: encrypted.then_some(object.size),
            etag: object.etag,
        });
    }

    entities
}

/// Converts a local listing into entities, computing encrypted sizes
pub fn local_entities(entries: Vec<LocalEntry>, cipher: &dyn Cipher) -> Vec<LocalEntity> {
    let encrypted = !cipher.is_passthrough();
    entries
        .into_iter()
        .map(|entry| {
            let size_enc =
                (encrypted && !entry.key.is_folder()).then(|| cipher.encrypted_size(entry.size));
            LocalEntity {
                key: entry.key,
                mtime: entry.mtime,
                ctime: entry.ctime,
                size: entry.size,
                size_enc,
            }
        })
        .collect()
}
