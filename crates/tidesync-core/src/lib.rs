//! TideSync Core - Domain logic and port definitions
//!
//! This crate contains the hexagonal core of the reconciliation engine:
//! - **Domain types** - `SyncKey`, `MixedState`, `Decision`, `SyncPlan`, listing entities
//! - **Port definitions** - Traits for adapters: `RemoteStore`, `LocalStore`,
//!   `HistoryStore`, `Cipher`, `SyncObserver`
//! - **Configuration** - YAML-backed [`config::Config`] with validation and a builder
//!
//! # Architecture
//!
//! The domain module is pure: it performs no I/O and has no async code.
//! Ports define the trait interfaces that adapter crates implement, and the
//! planning/execution engine in `tidesync-sync` drives them.

pub mod config;
pub mod domain;
pub mod ports;
