//! TideSync Conflict - Backup copies for racing transfers
//!
//! Provides:
//! - Conflict copy naming (`name (conflicted copy YYYY-MM-DD xxxxxxxx).ext`)
//! - A guard that runs before each transfer and preserves the version about
//!   to be overwritten when the other side changed after planning

pub mod error;
pub mod guard;
pub mod namer;

pub use error::ConflictError;
pub use guard::{ConflictGuard, GuardOutcome};
pub use namer::ConflictNamer;
