//! The backend contract the store runs against.
//!
//! The production backend is an external collaborator (a Redis-class
//! server): it supplies per-key associative field storage, set
//! collections, key expiry, pattern pub/sub, and an optimistic
//! snapshot that stages a write batch and detects invalidation of a
//! watched key at commit time. [`MemoryBackend`](super::MemoryBackend)
//! is the in-crate reference implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::StoreError;

/// Outcome of committing a snapshot.
///
/// A conflict means a concurrent committer wrote the watched key after
/// the snapshot opened; the whole attempt can be retried. Every other
/// failure is a hard [`StoreError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    Applied,
    Conflict,
}

/// A message delivered to a pattern subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// Storage, expiry, and pub/sub primitives the store composes over.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open a snapshot. With `watch`, committing fails with
    /// [`Commit::Conflict`] if the watched key is written concurrently;
    /// with `None` the batch is unconditional and always applies.
    async fn begin(&self, watch: Option<&str>) -> Result<Arc<dyn Snapshot>, StoreError>;

    /// Read all fields stored under a key. Absent keys read as empty.
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Read the members of a set collection.
    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    /// Read an expiring entry; `None` when absent or past its TTL.
    async fn read_expiring(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally overwrite an expiring entry.
    async fn write_expiring(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Unconditionally delete an expiring entry.
    async fn clear_expiring(&self, key: &str) -> Result<(), StoreError>;

    /// Publish a message on a channel, outside any snapshot.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribe to every channel matching a glob pattern.
    async fn subscribe_pattern(&self, pattern: &str) -> Result<Box<dyn Subscription>, StoreError>;
}

/// An optimistic snapshot: live reads plus a staged all-or-nothing
/// write batch.
///
/// Staged effects apply atomically in staging order, or not at all.
/// Staged publishes fire only when the batch applies, after which
/// external readers observe the whole batch, never part of it.
#[async_trait]
pub trait Snapshot: Send + Sync {
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Stage a field write. Fields merge into the existing record.
    fn stage_write_fields(&self, key: &str, fields: HashMap<String, String>);

    /// Stage removal of a whole record.
    fn stage_delete(&self, key: &str);

    fn stage_set_add(&self, key: &str, member: &str);

    fn stage_set_remove(&self, key: &str, member: &str);

    fn stage_write_expiring(&self, key: &str, value: &str, ttl: Duration);

    fn stage_clear_expiring(&self, key: &str);

    fn stage_publish(&self, channel: &str, payload: &str);

    async fn commit(&self) -> Result<Commit, StoreError>;
}

/// A live pattern subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message; `None` once the subscription closes.
    async fn next(&mut self) -> Option<Message>;

    async fn unsubscribe(&mut self) -> Result<(), StoreError>;
}
