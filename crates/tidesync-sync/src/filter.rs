//! Key filtering
//!
//! A single [`KeyFilter`] decides which keys take part in a run. State
//! assembly applies it at every merge point, so a key rejected here never
//! reaches the planner regardless of which source mentions it.

use std::collections::HashSet;

use glob::Pattern;
use tracing::warn;

use tidesync_core::config::SyncConfig;
use tidesync_core::domain::SyncKey;

/// Predicate over keys built from the sync configuration
#[derive(Debug, Clone)]
pub struct KeyFilter {
    metadata_file: String,
    config_dir: String,
    sync_config_dir: bool,
    sync_underscore_items: bool,
    ignore: Vec<Pattern>,
    /// Allowed keys plus every ancestor folder of them
    only_keys: Option<HashSet<String>>,
    watched_root: Option<SyncKey>,
}

impl KeyFilter {
    /// Builds the filter; invalid ignore patterns are logged and skipped
    pub fn from_config(config: &SyncConfig, metadata_file: &str) -> Self {
        let ignore = config
            .ignore_paths
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "Skipping invalid ignore pattern");
                    None
                }
            })
            .collect();

        let only_keys = config.only_keys.as_ref().map(|keys| {
            let mut allowed = HashSet::new();
            for raw in keys {
                let Ok(key) = SyncKey::new(raw.as_str()) else {
                    warn!(key = %raw, "Skipping invalid allow-list key");
                    continue;
                };
                let mut parent = key.parent();
                while !parent.is_root() {
                    allowed.insert(parent.to_string());
                    parent = parent.parent();
                }
                allowed.insert(key.to_string());
            }
            allowed
        });

        Self {
            metadata_file: metadata_file.to_string(),
            config_dir: config.config_dir.clone(),
            sync_config_dir: config.sync_config_dir,
            sync_underscore_items: config.sync_underscore_items,
            ignore,
            only_keys,
            watched_root: None,
        }
    }

    /// Restricts the run to one folder and everything below it
    pub fn with_watched_root(mut self, root: SyncKey) -> Self {
        self.watched_root = if root.is_root() { None } else { Some(root) };
        self
    }

    pub fn is_allowed(&self, key: &SyncKey) -> bool {
        if key.is_root() || key.as_str() == self.metadata_file {
            return false;
        }

        if let Some(root) = &self.watched_root {
            if key != root && !key.is_under(root) {
                return false;
            }
        }

        if self.is_hidden(key) || self.is_underscore(key) || self.is_ignored(key) {
            return false;
        }

        match &self.only_keys {
            Some(allowed) => allowed.contains(key.as_str()),
            None => true,
        }
    }

    fn segments(key: &SyncKey) -> impl Iterator<Item = &str> {
        key.as_str().split('/').filter(|s| !s.is_empty())
    }

    fn is_hidden(&self, key: &SyncKey) -> bool {
        let mut segments = Self::segments(key);
        let Some(first) = segments.next() else {
            return false;
        };
        let in_config_dir = self.sync_config_dir && first == self.config_dir;
        if first.starts_with('.') && !in_config_dir {
            return true;
        }
        // Dot-entries inside the configuration folder are part of it.
        if in_config_dir {
            return false;
        }
        segments.any(|s| s.starts_with('.'))
    }

    fn is_underscore(&self, key: &SyncKey) -> bool {
        !self.sync_underscore_items && Self::segments(key).any(|s| s.starts_with('_'))
    }

    fn is_ignored(&self, key: &SyncKey) -> bool {
        if self.ignore.is_empty() {
            return false;
        }
        let trimmed = key.as_str().trim_end_matches('/');
        let mut candidate = String::with_capacity(trimmed.len());
        for (i, segment) in trimmed.split('/').enumerate() {
            if i > 0 {
                candidate.push('/');
            }
            candidate.push_str(segment);
            if self.ignore.iter().any(|p| p.matches(&candidate)) {
                return true;
            }
        }
        false
    }
}
