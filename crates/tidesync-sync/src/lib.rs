//! TideSync Sync - Planning and execution engine
//!
//! Provides:
//! - State assembly from listings, tombstones and local history
//! - Per-key decisions with structured traces
//! - Phased, concurrency-bounded execution
//! - Local filesystem and directory-backed remote adapters
//!
//! ## Modules
//!
//! - [`assembler`] - Merges the four sources into `key -> MixedState`
//! - [`decision`] - The [`Planner`](decision::Planner) and its folder rules
//! - [`plan`] - Sorted keys, deletions, oversized conflicts, touched keys
//! - [`executor`] - Sequential and phased execution with a failure threshold
//! - [`dispatcher`] - Maps each decision to store primitives
//! - [`engine`] - One full sync run

pub mod assembler;
pub mod decision;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod filesystem;
pub mod filter;
pub mod metadata;
pub mod plan;
pub mod remote_dir;
pub mod retry;

use thiserror::Error;

use tidesync_core::domain::DomainError;

pub use engine::{SyncEngine, SyncOptions, SyncReport};
pub use executor::{ExecutionError, Phase, TaskFailure};

/// Errors that end a sync run
#[derive(Debug, Error)]
pub enum SyncError {
    /// Planning failed before anything was changed
    #[error("planning failed: {0}")]
    Planning(#[from] DomainError),

    /// Execution failed part-way; re-running is safe
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// Keys too large to sync conflict with the other side
    #[error("{count} oversized conflict(s) must be resolved before syncing")]
    OversizedConflicts { count: usize },

    /// Too large a share of keys would change in one run
    #[error(
        "{touched} of {total} keys would change, above the {percentage}% protection threshold \
         (use --force to proceed)"
    )]
    TooManyChanges {
        touched: usize,
        total: usize,
        percentage: u8,
    },

    /// Store or adapter failure outside of execution
    #[error("port error: {0:#}")]
    Port(#[from] anyhow::Error),
}
