//! Port definitions (hexagonal architecture interfaces)
//!
//! The planning and execution engine depends only on these traits; the
//! concrete adapters live in `tidesync-sync` (filesystem, directory remote)
//! and `tidesync-cache` (SQLite history).
//!
//! ## Ports Overview
//!
//! - [`RemoteStore`] - Object-store primitives (list, head, put, get, delete)
//! - [`LocalStore`] - Local tree operations (list, read, write, stat, ...)
//! - [`HistoryStore`] - Sync mappings, delete/rename events and saved plans
//! - [`Cipher`] - Key and content encryption indirection
//! - [`SyncObserver`] - Progress and conflict notifications

pub mod cipher;
pub mod history_store;
pub mod local_store;
pub mod observer;
pub mod remote_store;

pub use cipher::{remote_object_key, Cipher, PassthroughCipher};
pub use history_store::HistoryStore;
pub use local_store::{LocalEntry, LocalStat, LocalStore};
pub use observer::{NoopObserver, SyncObserver};
pub use remote_store::{RemoteObject, RemoteStore, TransientError};
