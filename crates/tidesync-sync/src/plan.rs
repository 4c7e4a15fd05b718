//! Plan building
//!
//! Runs state assembly, orders keys so children precede their folders,
//! decides every key and collects the artifacts the executor and the caller
//! need: deletions to advertise, oversized conflicts to surface and the
//! touched keys to confirm.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument};

use tidesync_core::domain::{
    DeletionOnRemote, DomainError, MixedState, SyncKey, SyncPlan, TriggerSource,
};

use crate::assembler::{AssemblerInput, StateAssembler};
use crate::decision::{ListedFolderTimes, Planner};
use crate::filter::KeyFilter;

/// A decided plan plus its derived artifacts
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: SyncPlan,
    /// Descending key length, then ascending key
    pub sorted_keys: Vec<SyncKey>,
    pub deletions: Vec<DeletionOnRemote>,
    pub oversized_conflicts: Vec<MixedState>,
    pub touched_keys: Vec<SyncKey>,
}

impl PlanOutcome {
    /// Number of keys per decision name
    pub fn decision_counts(&self) -> BTreeMap<&'static str, usize> {
        self.plan.decision_counts()
    }
}

/// Orders keys so that every key precedes its ancestors
pub fn sort_keys<'a>(keys: impl IntoIterator<Item = &'a SyncKey>) -> Vec<SyncKey> {
    let mut sorted: Vec<SyncKey> = keys.into_iter().cloned().collect();
    sorted.sort_by(|a, b| {
        b.as_str()
            .len()
            .cmp(&a.as_str().len())
            .then_with(|| a.cmp(b))
    });
    sorted
}

pub struct PlanBuilder<'a> {
    filter: &'a KeyFilter,
    size_limit: i64,
    encrypted: bool,
    trigger_source: TriggerSource,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(filter: &'a KeyFilter, size_limit: i64, encrypted: bool) -> Self {
        Self {
            filter,
            size_limit,
            encrypted,
            trigger_source: TriggerSource::Manual,
        }
    }

    pub fn with_trigger_source(mut self, trigger_source: TriggerSource) -> Self {
        self.trigger_source = trigger_source;
        self
    }

    #[instrument(skip(self, input), fields(trigger = %self.trigger_source))]
    pub fn build(&self, input: AssemblerInput) -> Result<PlanOutcome, DomainError> {
        let stats = ListedFolderTimes::from_entities(
            input
                .local
                .iter()
                .chain(input.local_config.iter().flatten()),
        );
        let mut states = StateAssembler::new(self.filter).assemble(input);
        let sorted_keys = sort_keys(states.keys());

        let mut planner = Planner::new(self.size_limit, self.encrypted);
        let mut deletions = Vec::new();
        let mut oversized_conflicts = Vec::new();
        let mut touched_keys = Vec::new();

        for key in &sorted_keys {
            let Some(state) = states.get_mut(key) else {
                continue;
            };
            let decision = planner.decide(state, &stats)?;

            if decision.is_deletion() {
                let winning = state.deltime_local.into_iter().chain(state.deltime_remote).max();
                if let Some(action_when) = winning {
                    deletions.push(DeletionOnRemote {
                        key: key.clone(),
                        action_when,
                    });
                }
            }
            if decision.is_oversized_conflict() {
                oversized_conflicts.push(state.clone());
            }
            if state.is_touched() {
                touched_keys.push(key.clone());
            }
        }

        let plan = SyncPlan::new(self.trigger_source, states);
        let outcome = PlanOutcome {
            plan,
            sorted_keys,
            deletions,
            oversized_conflicts,
            touched_keys,
        };
        debug!(counts = ?outcome.decision_counts(), "Decision summary");
        info!(
            keys = outcome.sorted_keys.len(),
            touched = outcome.touched_keys.len(),
            deletions = outcome.deletions.len(),
            conflicts = outcome.oversized_conflicts.len(),
            "Plan built"
        );
        Ok(outcome)
    }
}
