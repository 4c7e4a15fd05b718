//! Plan artifacts
//!
//! A [`SyncPlan`] is written to the history store before any destructive
//! action runs, so a run can be audited or replayed. [`DeletionOnRemote`]
//! entries are the tombstones advertised through the remote metadata file.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::key::SyncKey;
use crate::domain::mixed_state::MixedState;

/// What started a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Started explicitly by the user
    Manual,
    /// Started by a periodic schedule
    Scheduled,
    /// Started because a local file was saved
    OnSave,
    /// Planning only; nothing is executed
    DryRun,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduled => "scheduled",
            TriggerSource::OnSave => "on_save",
            TriggerSource::DryRun => "dry_run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TriggerSource::Manual),
            "scheduled" => Some(TriggerSource::Scheduled),
            "on_save" => Some(TriggerSource::OnSave),
            "dry_run" => Some(TriggerSource::DryRun),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tombstone advertised to the remote metadata file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionOnRemote {
    pub key: SyncKey,
    pub action_when: i64,
}

/// The decided state of one planning pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub timestamp: DateTime<Utc>,
    pub trigger_source: TriggerSource,
    pub mixed_states: BTreeMap<SyncKey, MixedState>,
}

impl SyncPlan {
    pub fn new(trigger_source: TriggerSource, mixed_states: BTreeMap<SyncKey, MixedState>) -> Self {
        Self {
            timestamp: Utc::now(),
            trigger_source,
            mixed_states,
        }
    }

    pub fn get(&self, key: &SyncKey) -> Option<&MixedState> {
        self.mixed_states.get(key)
    }

    pub fn len(&self) -> usize {
        self.mixed_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mixed_states.is_empty()
    }

    /// Number of keys per decision name; undecided keys are not counted
    pub fn decision_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for state in self.mixed_states.values() {
            if let Some(decision) = state.decision {
                *counts.entry(decision.as_str()).or_insert(0) += 1;
            }
        }
        counts
    }
}
