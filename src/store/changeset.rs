//! Staged mutations for one transaction attempt.

use crate::graph::{Node, NodeId};

/// A node staged for writing, together with the version it had before
/// this attempt's first mutation.
///
/// `orig_version` is recorded once and never overwritten while the
/// attempt lasts; for freshly created nodes it stays unset until the
/// commit stamps it with the new board version.
#[derive(Clone, Debug)]
pub struct StagedUpdate {
    pub node: Node,
    pub orig_version: Option<u64>,
}

/// Mutations accumulated by one transaction attempt.
///
/// An empty ChangeSet makes the attempt a no-op: nothing is written,
/// nothing is published, and the board version does not move.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    updates: Vec<StagedUpdate>,
    deletes: Vec<Node>,
    locks: Vec<(NodeId, String)>,
    unlocks: Vec<NodeId>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a freshly created node. Its `orig_version` stays unset so
    /// the commit assigns it the new board version.
    pub fn create(&mut self, node: Node) {
        self.stage(node, None);
    }

    /// Stage an update to an existing node. The version the node
    /// currently carries is recorded as its `orig_version` on the
    /// first staging of that id.
    pub fn update(&mut self, node: Node) {
        let orig = node.version();
        self.stage(node, Some(orig));
    }

    fn stage(&mut self, node: Node, orig_version: Option<u64>) {
        match self.updates.iter_mut().find(|s| s.node.id() == node.id()) {
            // re-staged: replace the state, keep the recorded origin
            Some(staged) => staged.node = node,
            None => self.updates.push(StagedUpdate { node, orig_version }),
        }
    }

    /// Stage a node removal.
    pub fn delete(&mut self, node: Node) {
        self.deletes.push(node);
    }

    /// Stage an advisory lock claim on a node.
    pub fn lock(&mut self, node_id: impl Into<NodeId>, token: impl Into<String>) {
        self.locks.push((node_id.into(), token.into()));
    }

    /// Stage the release of a node's advisory lock.
    pub fn unlock(&mut self, node_id: impl Into<NodeId>) {
        self.unlocks.push(node_id.into());
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
            && self.deletes.is_empty()
            && self.locks.is_empty()
            && self.unlocks.is_empty()
    }

    pub fn updates(&self) -> &[StagedUpdate] {
        &self.updates
    }

    pub(crate) fn updates_mut(&mut self) -> &mut [StagedUpdate] {
        &mut self.updates
    }

    pub fn deletes(&self) -> &[Node] {
        &self.deletes
    }

    pub fn locks(&self) -> &[(NodeId, String)] {
        &self.locks
    }

    pub fn unlocks(&self) -> &[NodeId] {
        &self.unlocks
    }

    /// The earliest version this attempt observed for a staged node,
    /// i.e. what its committed write was built on.
    pub fn orig_version(&self, node_id: &str) -> Option<u64> {
        self.updates
            .iter()
            .find(|s| s.node.id() == node_id)
            .and_then(|s| s.orig_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BoardNode, ContentNode};
    use serde_json::json;

    #[test]
    fn test_empty_until_something_is_staged() {
        let mut changes = ChangeSet::new();
        assert!(changes.is_empty());

        changes.unlock("n");
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_update_records_origin_once() {
        let mut card = ContentNode::new("card", json!("x"));
        card.version = 5;

        let mut changes = ChangeSet::new();
        changes.update(Node::Content(card.clone()));

        // mutate and re-stage; the recorded origin must not move
        card.content = json!("y");
        card.version = 9;
        changes.update(Node::Content(card));

        assert_eq!(changes.updates().len(), 1);
        assert_eq!(changes.orig_version("card"), Some(5));
        assert_eq!(changes.updates()[0].node.content(), &json!("y"));
    }

    #[test]
    fn test_created_nodes_have_no_origin() {
        let mut changes = ChangeSet::new();
        changes.create(Node::Board(BoardNode::new("b", json!(null))));

        assert_eq!(changes.orig_version("b"), None);
        assert!(changes.updates()[0].orig_version.is_none());
    }

    #[test]
    fn test_staging_order_is_preserved() {
        let mut changes = ChangeSet::new();
        changes.update(Node::Content(ContentNode::new("one", json!(1))));
        changes.update(Node::Content(ContentNode::new("two", json!(2))));
        changes.update(Node::Content(ContentNode::new("one", json!(10))));

        let ids: Vec<&str> = changes.updates().iter().map(|s| s.node.id()).collect();
        assert_eq!(ids, ["one", "two"]);
    }
}
