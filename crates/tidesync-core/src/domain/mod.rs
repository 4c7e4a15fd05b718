//! Domain entities and business rules
//!
//! - [`key`] - the `SyncKey` reconciliation unit (folders end with `/`)
//! - [`entity`] - listing and history records fed into state assembly
//! - [`decision`] - the closed set of per-key actions and their traces
//! - [`mixed_state`] - the merged per-key record the planner decides on
//! - [`plan`] - the persisted plan artifact and remote tombstones
//! - [`errors`] - domain error types

pub mod decision;
pub mod entity;
pub mod errors;
pub mod key;
pub mod mixed_state;
pub mod plan;

pub use decision::{Decision, DecisionRule, DecisionTrace, SizeCheck, TraceInputs};
pub use entity::{HistoryAction, HistoryEvent, LocalEntity, RemoteEntity, SyncMapping};
pub use errors::DomainError;
pub use key::SyncKey;
pub use mixed_state::MixedState;
pub use plan::{DeletionOnRemote, SyncPlan, TriggerSource};
