//! Sync engine
//!
//! The [`SyncEngine`] runs one complete reconciliation:
//!
//! 1. **Gather**: list the remote (splitting off the metadata object), the
//!    local tree and the configuration folder; load mappings and events
//! 2. **Plan**: assemble, decide and collect artifacts
//! 3. **Guard**: persist the plan, refuse oversized conflicts, apply the
//!    protect-modify threshold
//! 4. **Publish**: re-upload the metadata file if tombstones changed
//! 5. **Execute**: sequential or phased
//!
//! A failed run leaves every completed operation recorded in the history
//! store, so running again only redoes what is still pending.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use tidesync_core::config::Config;
use tidesync_core::domain::{DeletionOnRemote, SyncKey, TriggerSource};
use tidesync_core::ports::{
    Cipher, HistoryStore, LocalStore, NoopObserver, PassthroughCipher, RemoteStore, SyncObserver,
};

use crate::assembler::{local_entities, remote_entities, AssemblerInput};
use crate::dispatcher::Dispatcher;
use crate::executor::{ExecutionScheduler, ExecutionSummary};
use crate::filter::KeyFilter;
use crate::metadata::{MetadataFile, MetadataStore};
use crate::plan::{PlanBuilder, PlanOutcome};
use crate::SyncError;

/// Below this many planned keys the protect-modify check is skipped
const MIN_KEYS_FOR_PROTECTION: usize = 3;

/// Per-run options
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Skip the protect-modify threshold
    pub force: bool,
    /// Overrides the configured concurrency
    pub concurrency: Option<usize>,
    /// Restricts the run to one folder
    pub watched_root: Option<SyncKey>,
    pub trigger_source: TriggerSource,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            concurrency: None,
            watched_root: None,
            trigger_source: TriggerSource::Manual,
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub trigger_source: TriggerSource,
    pub total_keys: usize,
    pub touched_keys: usize,
    pub decisions: BTreeMap<String, usize>,
    pub execution: ExecutionSummary,
    pub metadata_updated: bool,
    pub duration_ms: u64,
}

/// Planned run plus what is needed to finish its bookkeeping
struct PreparedRun {
    outcome: PlanOutcome,
    previous: MetadataFile,
    /// Tombstones of keys outside this run's filter, kept as they are
    carried_deletions: Vec<DeletionOnRemote>,
}

pub struct SyncEngine {
    config: Config,
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    history: Arc<dyn HistoryStore>,
    cipher: Arc<dyn Cipher>,
    observer: Arc<dyn SyncObserver>,
}

impl SyncEngine {
    pub fn new(
        config: Config,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            config,
            remote,
            local,
            history,
            cipher: Arc::new(PassthroughCipher),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn metadata_store(&self) -> MetadataStore {
        MetadataStore::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.cipher),
            &self.config.sync.remote_prefix,
            &self.config.storage.metadata_file,
        )
    }

    fn filter(&self, watched_root: Option<&SyncKey>) -> KeyFilter {
        let filter = KeyFilter::from_config(&self.config.sync, &self.config.storage.metadata_file);
        match watched_root {
            Some(root) => filter.with_watched_root(root.clone()),
            None => filter,
        }
    }

    /// Builds the plan of a run without executing or persisting anything
    #[instrument(skip(self))]
    pub async fn plan(
        &self,
        trigger_source: TriggerSource,
        watched_root: Option<&SyncKey>,
    ) -> Result<PlanOutcome, SyncError> {
        Ok(self.prepare(trigger_source, watched_root).await?.outcome)
    }

    async fn prepare(
        &self,
        trigger_source: TriggerSource,
        watched_root: Option<&SyncKey>,
    ) -> Result<PreparedRun, SyncError> {
        let sync = &self.config.sync;
        let prefix = sync.remote_prefix.as_str();
        let metadata = self.metadata_store();

        let objects = self.remote.list(prefix).await?;
        let (metadata_objects, objects): (Vec<_>, Vec<_>) = objects
            .into_iter()
            .partition(|o| o.key == metadata.object_key());
        let previous = metadata.load(!metadata_objects.is_empty()).await?;

        let remote = remote_entities(objects, prefix, self.cipher.as_ref());
        let local = local_entities(self.local.list(None).await?, self.cipher.as_ref());
        let local_config = if sync.sync_config_dir {
            let dir = SyncKey::folder(&sync.config_dir)?;
            Some(local_entities(
                self.local.list(Some(&dir)).await?,
                self.cipher.as_ref(),
            ))
        } else {
            None
        };
        let mappings = self.history.mappings().await?;
        let local_history = self.history.events().await?;

        let filter = self.filter(watched_root);
        let carried_deletions = previous
            .deletions
            .iter()
            .filter(|d| !filter.is_allowed(&d.key))
            .cloned()
            .collect();

        let outcome = PlanBuilder::new(
            &filter,
            sync.skip_size_larger_than,
            !self.cipher.is_passthrough(),
        )
        .with_trigger_source(trigger_source)
        .build(AssemblerInput {
            remote,
            local,
            local_config,
            remote_deletions: previous.deletions.clone(),
            local_history,
            mappings,
        })?;

        Ok(PreparedRun {
            outcome,
            previous,
            carried_deletions,
        })
    }

    /// Runs one full sync
    #[instrument(skip(self, options), fields(trigger = %options.trigger_source, force = options.force))]
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let PreparedRun {
            outcome,
            previous,
            carried_deletions,
        } = self
            .prepare(options.trigger_source, options.watched_root.as_ref())
            .await?;

        self.history.save_plan(&outcome.plan).await?;

        if !outcome.oversized_conflicts.is_empty() {
            warn!(
                count = outcome.oversized_conflicts.len(),
                "Oversized conflicts block the run"
            );
            self.observer.on_sizes_conflict(&outcome.oversized_conflicts);
            return Err(SyncError::OversizedConflicts {
                count: outcome.oversized_conflicts.len(),
            });
        }

        if !options.force {
            self.check_protection(&outcome)?;
        }

        // Published before execution: a run failing halfway must still
        // carry the tombstones of the deletions it already made.
        let mut deletions = outcome.deletions.clone();
        deletions.extend(carried_deletions);
        let metadata_updated = self
            .metadata_store()
            .save_if_changed(&previous.deletions, deletions)
            .await?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.local),
            Arc::clone(&self.history),
            Arc::clone(&self.cipher),
            Arc::clone(&self.observer),
            self.config.sync.remote_prefix.clone(),
        );
        let concurrency = options.concurrency.unwrap_or(self.config.sync.concurrency);
        let execution = ExecutionScheduler::new(Arc::new(dispatcher), concurrency)
            .execute(&outcome, Arc::clone(&self.observer))
            .await?;

        let report = SyncReport {
            trigger_source: options.trigger_source,
            total_keys: outcome.sorted_keys.len(),
            touched_keys: outcome.touched_keys.len(),
            decisions: outcome
                .decision_counts()
                .into_iter()
                .map(|(name, count)| (name.to_string(), count))
                .collect(),
            execution,
            metadata_updated,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            keys = report.total_keys,
            touched = report.touched_keys,
            transfers = report.execution.transfers,
            deletions = report.execution.deletions,
            duration_ms = report.duration_ms,
            "Sync complete"
        );
        Ok(report)
    }

    /// Refuses runs that would overwrite or delete too much at once
    fn check_protection(&self, outcome: &PlanOutcome) -> Result<(), SyncError> {
        let percentage = self.config.sync.protect_modify_percentage;
        let total = outcome.sorted_keys.len();
        if percentage >= 100 || total < MIN_KEYS_FOR_PROTECTION {
            return Ok(());
        }

        let destructive = outcome
            .touched_keys
            .iter()
            .filter_map(|key| outcome.plan.get(key))
            .filter(|state| {
                state.decision.is_some_and(|d| d.is_deletion())
                    || (state.exist_local && state.exist_remote)
            })
            .count();

        if destructive * 100 > total * usize::from(percentage) {
            warn!(destructive, total, percentage, "Protect-modify threshold exceeded");
            return Err(SyncError::TooManyChanges {
                touched: destructive,
                total,
                percentage,
            });
        }
        Ok(())
    }
}
