//! Store error types.

use thiserror::Error;

use crate::graph::NodeError;

/// Errors surfaced by the store and its backend contract.
///
/// Optimistic conflicts are deliberately absent: a concurrent write to
/// a watched board reports as [`Commit::Conflict`](super::Commit) and
/// is retried inside the transaction loop, never surfaced to callers.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed stored data: {0}")]
    MalformedData(String),

    #[error("Failed to lock node '{node_id}': {reason}")]
    LockAcquire { node_id: String, reason: String },

    #[error("Failed to unlock node '{node_id}': {reason}")]
    LockRelease { node_id: String, reason: String },

    #[error("Backend failure: {0}")]
    Backend(String),
}
