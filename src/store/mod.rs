//! Board store: the transaction coordinator over a shared backend.
//!
//! `BoardStore` runs caller-supplied callbacks under optimistic
//! concurrency: it watches the board's record, reads the current
//! version, lets the callback stage a [`ChangeSet`], then commits the
//! whole batch atomically, or discards it and re-runs the callback
//! when a concurrent committer wins the race. Every node written by
//! one commit carries the same new version, and committed changes are
//! published per mutation category on the board's channel.

pub mod backend;
mod changeset;
mod error;
pub mod memory;

pub use backend::{Backend, Commit, Message, Snapshot, Subscription};
pub use changeset::{ChangeSet, StagedUpdate};
pub use error::StoreError;
pub use memory::MemoryBackend;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::events::Event;
use crate::graph::{AttrMap, BoardNode, Node, NodeId};
use crate::lock::{lock_key, LOCK_TTL};

/// Key of the set collection holding every board id. Doubles as the
/// registry pub/sub channel for board lifecycle events.
pub const BOARD_SET_KEY: &str = "boards";

/// Stored field values are wrapped as `{"value": <attribute>}` so
/// their types stay unambiguous on the wire; readers unwrap on load.
#[derive(Serialize, Deserialize)]
struct Wrapped {
    value: Value,
}

fn wrap_attrs(attrs: AttrMap) -> Result<HashMap<String, String>, StoreError> {
    attrs
        .into_iter()
        .map(|(key, value)| {
            let raw = serde_json::to_string(&Wrapped { value })?;
            Ok((key, raw))
        })
        .collect()
}

fn unwrap_attrs(fields: HashMap<String, String>) -> Result<AttrMap, StoreError> {
    fields
        .into_iter()
        .map(|(key, raw)| {
            let wrapped: Wrapped = serde_json::from_str(&raw)?;
            Ok((key, wrapped.value))
        })
        .collect()
}

fn version_attr(version: u64) -> AttrMap {
    let mut attrs = AttrMap::new();
    attrs.insert("version".to_string(), Value::from(version));
    attrs
}

/// Read view a transaction callback works through.
///
/// Handles are cheap to clone and valid for one attempt: reads are
/// live against the backend while the attempt's watch stands, and a
/// conflicting commit invalidates everything read through them.
#[derive(Clone)]
pub struct TxnHandle {
    snapshot: Arc<dyn Snapshot>,
}

impl TxnHandle {
    fn new(snapshot: Arc<dyn Snapshot>) -> Self {
        Self { snapshot }
    }

    /// Read a node by id.
    pub async fn get_node(&self, node_id: &str) -> Result<Node, StoreError> {
        let fields = self.snapshot.read_fields(node_id).await?;
        if fields.is_empty() {
            return Err(StoreError::NodeNotFound(node_id.to_string()));
        }
        Ok(Node::from_attrs(unwrap_attrs(fields)?)?)
    }

    /// Generate a fresh node id.
    pub fn next_node_id(&self) -> NodeId {
        Uuid::new_v4().to_string()
    }

    async fn board_version(&self, board_id: &str) -> Result<u64, StoreError> {
        let fields = self.snapshot.read_fields(board_id).await?;
        let raw = fields
            .get("version")
            .ok_or_else(|| StoreError::NodeNotFound(board_id.to_string()))?;
        let wrapped: Wrapped = serde_json::from_str(raw)?;
        wrapped.value.as_u64().ok_or_else(|| {
            StoreError::MalformedData(format!("board '{board_id}' version is not an integer"))
        })
    }
}

/// The transaction coordinator.
#[derive(Clone)]
pub struct BoardStore {
    backend: Arc<dyn Backend>,
}

impl BoardStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Generate a fresh node id.
    pub fn next_node_id(&self) -> NodeId {
        Uuid::new_v4().to_string()
    }

    /// Run `build` against `board_id` under optimistic concurrency.
    ///
    /// The callback reads nodes through the handle and returns the
    /// ChangeSet to commit. It must tolerate re-invocation and keep
    /// its side effects inside the handle: when a concurrent committer
    /// invalidates the watched board, all staged changes are discarded
    /// and the callback runs again against the new version. An empty
    /// ChangeSet commits nothing and publishes nothing.
    ///
    /// Retrying is unbounded; a caller needing bounded latency must
    /// impose its own attempt limit around this call. Conflicts are
    /// the only recoverable failure; any other backend error
    /// propagates immediately.
    ///
    /// On success the returned ChangeSet carries final versions: every
    /// written node holds the new board version, and `orig_version`
    /// tells what each write was built on.
    pub async fn transaction<F, Fut>(
        &self,
        board_id: &str,
        mut build: F,
    ) -> Result<ChangeSet, StoreError>
    where
        F: FnMut(TxnHandle) -> Fut + Send,
        Fut: Future<Output = Result<ChangeSet, StoreError>> + Send,
    {
        loop {
            let snapshot = self.backend.begin(Some(board_id)).await?;
            let handle = TxnHandle::new(snapshot.clone());
            let board_version = handle.board_version(board_id).await?;

            let mut changes = build(handle).await?;
            if changes.is_empty() {
                return Ok(changes);
            }

            stage_changes(snapshot.as_ref(), board_id, board_version + 1, &mut changes)?;

            match snapshot.commit().await? {
                Commit::Applied => return Ok(changes),
                Commit::Conflict => {
                    log::info!("transaction on board '{board_id}' lost the version race; retrying");
                }
            }
        }
    }

    /// Read a node outside any transaction.
    pub async fn get_node(&self, node_id: &str) -> Result<Node, StoreError> {
        let fields = self.backend.read_fields(node_id).await?;
        if fields.is_empty() {
            return Err(StoreError::NodeNotFound(node_id.to_string()));
        }
        Ok(Node::from_attrs(unwrap_attrs(fields)?)?)
    }

    /// Create a board: register its id, write the root node, and
    /// announce both on the registry and board channels, atomically.
    pub async fn create_board(&self, board: &BoardNode) -> Result<(), StoreError> {
        let node = Node::Board(board.clone());
        let batch = self.backend.begin(None).await?;
        batch.stage_set_add(BOARD_SET_KEY, &board.id);
        batch.stage_publish(BOARD_SET_KEY, &Event::board_create(&board.id).to_payload()?);
        batch.stage_write_fields(&board.id, wrap_attrs(node.to_attrs()?)?);
        batch.stage_publish(&board.id, &Event::node_update([&node])?.to_payload()?);
        apply_batch(batch.as_ref()).await
    }

    /// Drop a board from the registry and announce the removal. Node
    /// records under the board are left in place.
    pub async fn remove_board(&self, board_id: &str) -> Result<(), StoreError> {
        let batch = self.backend.begin(None).await?;
        batch.stage_set_remove(BOARD_SET_KEY, board_id);
        batch.stage_publish(BOARD_SET_KEY, &Event::board_del(board_id).to_payload()?);
        apply_batch(batch.as_ref()).await
    }

    /// Ids of every registered board.
    pub async fn board_ids(&self) -> Result<HashSet<String>, StoreError> {
        self.backend.set_members(BOARD_SET_KEY).await
    }

    /// Ask every listener on a board to stop by publishing the
    /// `lonely_board` sentinel on its channel.
    pub async fn stop_listener(&self, board_id: &str) -> Result<(), StoreError> {
        self.backend
            .publish(board_id, &Event::lonely_board(board_id).to_payload()?)
            .await
    }
}

/// Stage one attempt's batch in commit order: bump and write updates,
/// remove deletes, claim and release locks, publish one event per
/// mutation category, and finally advance the board version.
fn stage_changes(
    snapshot: &dyn Snapshot,
    board_id: &str,
    next_version: u64,
    changes: &mut ChangeSet,
) -> Result<(), StoreError> {
    for staged in changes.updates_mut() {
        staged.node.set_version(next_version);
        if staged.orig_version.is_none() {
            staged.orig_version = Some(next_version);
        }
        let fields = wrap_attrs(staged.node.to_attrs()?)?;
        snapshot.stage_write_fields(staged.node.id(), fields);
    }
    if !changes.updates().is_empty() {
        let event = Event::node_update(changes.updates().iter().map(|staged| &staged.node))?;
        snapshot.stage_publish(board_id, &event.to_payload()?);
    }

    for node in changes.deletes() {
        snapshot.stage_delete(node.id());
    }
    if !changes.deletes().is_empty() {
        let event = Event::node_del(changes.deletes())?;
        snapshot.stage_publish(board_id, &event.to_payload()?);
    }

    for (node_id, token) in changes.locks() {
        snapshot.stage_write_expiring(&lock_key(node_id), token, LOCK_TTL);
    }
    if !changes.locks().is_empty() {
        let event = Event::node_lock(changes.locks().iter().map(|(id, _)| id.as_str()));
        snapshot.stage_publish(board_id, &event.to_payload()?);
    }

    for node_id in changes.unlocks() {
        snapshot.stage_clear_expiring(&lock_key(node_id));
    }
    if !changes.unlocks().is_empty() {
        let event = Event::node_unlock(changes.unlocks().iter().map(|id| id.as_str()));
        snapshot.stage_publish(board_id, &event.to_payload()?);
    }

    snapshot.stage_write_fields(board_id, wrap_attrs(version_attr(next_version))?);
    Ok(())
}

async fn apply_batch(batch: &dyn Snapshot) -> Result<(), StoreError> {
    match batch.commit().await? {
        Commit::Applied => Ok(()),
        Commit::Conflict => Err(StoreError::Backend(
            "unwatched batch reported a conflict".to_string(),
        )),
    }
}
