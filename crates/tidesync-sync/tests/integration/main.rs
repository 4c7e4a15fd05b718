//! Integration tests for tidesync-sync
//!
//! Drives the executor and the full engine against in-memory stores so
//! every run is deterministic.

mod common;

mod test_engine;
mod test_executor;
