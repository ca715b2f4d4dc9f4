//! Advisory per-node locks.
//!
//! Locks are cooperative claims bounded by a fixed TTL; they signal an
//! in-progress edit to other clients and never gate the commit path.
//! Acquisition overwrites unconditionally (last writer wins) and
//! release performs no token verification, so any actor may release
//! any node. Whether release was meant to verify ownership is an open
//! question tracked in DESIGN.md; the check is deliberately not added
//! here.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{Backend, StoreError};

/// Fixed lifetime of a lock entry.
pub const LOCK_TTL: Duration = Duration::from_secs(60 * 60);

const LOCK_KEY_PREFIX: &str = "NODELOCK.";

/// Storage key holding a node's lock token.
pub fn lock_key(node_id: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{node_id}")
}

/// Advisory lock operations over the backend's expiring entries.
///
/// Locks staged in a transaction's ChangeSet go through the same key
/// scheme and TTL, atomically with the rest of the commit.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn Backend>,
}

impl LockManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Claim `node_id` with `token`, refreshing the TTL. Last writer
    /// wins; there is no ownership check.
    pub async fn acquire(&self, node_id: &str, token: &str) -> Result<(), StoreError> {
        self.backend
            .write_expiring(&lock_key(node_id), token, LOCK_TTL)
            .await
            .map_err(|err| StoreError::LockAcquire {
                node_id: node_id.to_string(),
                reason: err.to_string(),
            })
    }

    /// Release `node_id` unconditionally.
    pub async fn release(&self, node_id: &str) -> Result<(), StoreError> {
        self.backend
            .clear_expiring(&lock_key(node_id))
            .await
            .map_err(|err| StoreError::LockRelease {
                node_id: node_id.to_string(),
                reason: err.to_string(),
            })
    }

    /// Current token for `node_id`, or `None` when unlocked or the
    /// claim has expired.
    pub async fn read(&self, node_id: &str) -> Result<Option<String>, StoreError> {
        self.backend.read_expiring(&lock_key(node_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    #[test]
    fn test_lock_key_scheme() {
        assert_eq!(lock_key("node-1"), "NODELOCK.node-1");
    }

    #[tokio::test]
    async fn test_acquire_read_release() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let locks = LockManager::new(backend);

        locks.acquire("node-1", "tok1").await.unwrap();
        assert_eq!(
            locks.read("node-1").await.unwrap().as_deref(),
            Some("tok1")
        );

        // last writer wins, no ownership check
        locks.acquire("node-1", "tok2").await.unwrap();
        assert_eq!(
            locks.read("node-1").await.unwrap().as_deref(),
            Some("tok2")
        );

        locks.release("node-1").await.unwrap();
        assert_eq!(locks.read("node-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unlocked_node_reads_absent() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let locks = LockManager::new(backend);
        assert_eq!(locks.read("nobody").await.unwrap(), None);
    }
}
