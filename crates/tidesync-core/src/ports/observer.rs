//! Progress and conflict notification port
//!
//! Pure notification hooks: the engine never consumes a return value, so an
//! observer cannot change the control flow of a run.

use crate::domain::decision::Decision;
use crate::domain::key::SyncKey;
use crate::domain::mixed_state::MixedState;

/// Receives notifications while a run is planned and executed
pub trait SyncObserver: Send + Sync {
    /// Called after each dispatched key; `index` is 1-based
    fn on_progress(&self, _index: usize, _total: usize, _key: &SyncKey, _decision: Decision) {}

    /// Called with every oversized conflict before execution is refused
    fn on_sizes_conflict(&self, _conflicts: &[MixedState]) {}

    /// Called when a conflict backup copy was created for a key
    fn on_conflict_detected(&self, _key: &SyncKey) {}
}

/// Observer that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}
