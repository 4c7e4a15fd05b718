//! Domain error types
//!
//! Errors raised while validating keys and while checking the internal
//! consistency of merged per-key state.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed reconciliation key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A merged record violates an existence/timestamp invariant
    #[error("Inconsistent state for {key}: {reason}")]
    Inconsistent {
        /// The offending key
        key: String,
        /// What was violated
        reason: String,
    },

    /// The decision pass finished a key without assigning a decision
    #[error("No decision reached for {0}")]
    NoDecision(String),
}
