//! History store port (driven/secondary port)
//!
//! The history store is one of the inputs of state assembly and is updated by
//! the dispatcher after each successful operation:
//!
//! - a key -> [`SyncMapping`] table of the last synced version of each key
//! - append-only [`HistoryEvent`] records of local deletes and renames
//! - the [`SyncPlan`]s of past runs, kept for audit

use crate::domain::entity::{HistoryEvent, SyncMapping};
use crate::domain::key::SyncKey;
use crate::domain::plan::SyncPlan;

/// Port trait for persistent sync history
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Returns every recorded mapping
    async fn mappings(&self) -> anyhow::Result<Vec<SyncMapping>>;

    /// Inserts or replaces the mapping of `mapping.key`
    async fn upsert_mapping(&self, mapping: &SyncMapping) -> anyhow::Result<()>;

    /// Forgets the mapping of a key
    async fn remove_mapping(&self, key: &SyncKey) -> anyhow::Result<()>;

    /// Returns every recorded delete/rename event
    async fn events(&self) -> anyhow::Result<Vec<HistoryEvent>>;

    /// Appends a delete/rename event
    async fn record_event(&self, event: &HistoryEvent) -> anyhow::Result<()>;

    /// Drops every event recorded for a key
    async fn clear_events(&self, key: &SyncKey) -> anyhow::Result<()>;

    /// Persists a plan before it is executed
    async fn save_plan(&self, plan: &SyncPlan) -> anyhow::Result<()>;

    /// Returns the most recent plans, newest first
    async fn recent_plans(&self, limit: usize) -> anyhow::Result<Vec<SyncPlan>>;
}
