//! Board graph nodes.
//!
//! A board is a graph of versioned nodes: the board root owns an
//! unordered set of children, content cards form singly-linked chains
//! beneath their parents, and column headers are content cards with a
//! rank among sibling columns. Nodes serialize to flat attribute maps
//! tagged with a `type` discriminant; reconstruction dispatches on the
//! tag and rejects anything it does not recognize.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Unique identifier for a node. Ids are immutable and never reused.
pub type NodeId = String;

/// Flat attribute map, the serialized form of a node.
pub type AttrMap = serde_json::Map<String, Value>;

/// Errors from node (de)serialization.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Missing node attribute: {0}")]
    MissingAttr(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The closed set of node variants making up a board graph.
///
/// The discriminant travels on the wire as the `type` attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    Board(BoardNode),
    Content(ContentNode),
    ColumnHeader(ColumnHeaderNode),
}

/// Root node of a board. Owns its children as an unordered id set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardNode {
    pub id: NodeId,
    #[serde(default)]
    pub content: Value,
    pub version: u64,
    #[serde(default)]
    pub children: HashSet<NodeId>,
}

impl BoardNode {
    /// Fresh board root at version 1 with its own empty child set.
    pub fn new(id: impl Into<NodeId>, content: Value) -> Self {
        Self {
            id: id.into(),
            content,
            version: 1,
            children: HashSet::new(),
        }
    }
}

/// A content card. Points back at its parent and forward at the single
/// card chained beneath it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: NodeId,
    #[serde(default)]
    pub content: Value,
    pub version: u64,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub child: Option<NodeId>,
}

impl ContentNode {
    /// Fresh unattached content card at version 1.
    pub fn new(id: impl Into<NodeId>, content: Value) -> Self {
        Self {
            id: id.into(),
            content,
            version: 1,
            parent: None,
            child: None,
        }
    }
}

/// A column header: a content card ranked among its sibling columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnHeaderNode {
    pub id: NodeId,
    #[serde(default)]
    pub content: Value,
    pub version: u64,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub child: Option<NodeId>,
    pub order: i64,
}

impl ColumnHeaderNode {
    /// Fresh unattached column header at version 1.
    pub fn new(id: impl Into<NodeId>, content: Value, order: i64) -> Self {
        Self {
            id: id.into(),
            content,
            version: 1,
            parent: None,
            child: None,
            order,
        }
    }
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Board(node) => &node.id,
            Node::Content(node) => &node.id,
            Node::ColumnHeader(node) => &node.id,
        }
    }

    pub fn content(&self) -> &Value {
        match self {
            Node::Board(node) => &node.content,
            Node::Content(node) => &node.content,
            Node::ColumnHeader(node) => &node.content,
        }
    }

    pub fn set_content(&mut self, content: Value) {
        match self {
            Node::Board(node) => node.content = content,
            Node::Content(node) => node.content = content,
            Node::ColumnHeader(node) => node.content = content,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Node::Board(node) => node.version,
            Node::Content(node) => node.version,
            Node::ColumnHeader(node) => node.version,
        }
    }

    pub fn set_version(&mut self, version: u64) {
        match self {
            Node::Board(node) => node.version = version,
            Node::Content(node) => node.version = version,
            Node::ColumnHeader(node) => node.version = version,
        }
    }

    /// The wire discriminant for this variant.
    pub fn node_type(&self) -> &'static str {
        match self {
            Node::Board(_) => "Board",
            Node::Content(_) => "Content",
            Node::ColumnHeader(_) => "ColumnHeader",
        }
    }

    /// Adjacent node ids: all children for a board (arbitrary order),
    /// parent then child for a content card, skipping absent links.
    /// The iterator is finite and restarts from scratch on every call.
    pub fn neighbors(&self) -> Box<dyn Iterator<Item = &NodeId> + '_> {
        match self {
            Node::Board(node) => Box::new(node.children.iter()),
            Node::Content(node) => Box::new(node.parent.iter().chain(node.child.iter())),
            Node::ColumnHeader(node) => Box::new(node.parent.iter().chain(node.child.iter())),
        }
    }

    /// Attach a child: set membership for boards, single-slot
    /// assignment for content cards.
    pub fn set_child(&mut self, node_id: impl Into<NodeId>) {
        match self {
            Node::Board(node) => {
                node.children.insert(node_id.into());
            }
            Node::Content(node) => node.child = Some(node_id.into()),
            Node::ColumnHeader(node) => node.child = Some(node_id.into()),
        }
    }

    /// Detach a child. Removing an id a board does not hold is a
    /// no-op; a content card only clears its slot when the id matches.
    pub fn remove_child(&mut self, node_id: &str) {
        match self {
            Node::Board(node) => {
                node.children.remove(node_id);
            }
            Node::Content(node) => {
                if node.child.as_deref() == Some(node_id) {
                    node.child = None;
                }
            }
            Node::ColumnHeader(node) => {
                if node.child.as_deref() == Some(node_id) {
                    node.child = None;
                }
            }
        }
    }

    /// Serialize to the flat attribute map tagged with `type`.
    pub fn to_attrs(&self) -> Result<AttrMap, NodeError> {
        match serde_json::to_value(self)? {
            Value::Object(attrs) => Ok(attrs),
            _ => unreachable!("a tagged node serializes to a map"),
        }
    }

    /// Reconstruct a node from its attribute map, dispatching on the
    /// `type` discriminant.
    pub fn from_attrs(attrs: AttrMap) -> Result<Self, NodeError> {
        let node_type = attrs
            .get("type")
            .and_then(Value::as_str)
            .ok_or(NodeError::MissingAttr("type"))?;
        if !matches!(node_type, "Board" | "Content" | "ColumnHeader") {
            return Err(NodeError::UnknownNodeType(node_type.to_string()));
        }
        Ok(serde_json::from_value(Value::Object(attrs))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_board_children_are_set_members() {
        let mut board = Node::Board(BoardNode::new("b", json!(null)));
        board.set_child("a");
        board.set_child("a");
        board.set_child("c");

        let ids: HashSet<&NodeId> = board.neighbors().collect();
        assert_eq!(ids.len(), 2);

        board.remove_child("a");
        board.remove_child("not-there");
        let ids: Vec<&NodeId> = board.neighbors().collect();
        assert_eq!(ids, ["c"]);
    }

    #[test]
    fn test_content_neighbors_parent_then_child() {
        let mut card = ContentNode::new("card", json!("hello"));
        card.parent = Some("p".to_string());
        card.child = Some("k".to_string());
        let node = Node::Content(card);

        let ids: Vec<NodeId> = node.neighbors().cloned().collect();
        assert_eq!(ids, ["p", "k"]);
    }

    #[test]
    fn test_content_neighbors_skip_absent_links() {
        let node = Node::Content(ContentNode::new("card", json!(null)));
        assert_eq!(node.neighbors().count(), 0);
    }

    #[test]
    fn test_content_remove_child_only_on_match() {
        let mut card = ContentNode::new("card", json!(null));
        card.child = Some("k".to_string());
        let mut node = Node::Content(card);

        node.remove_child("other");
        assert_eq!(node.neighbors().count(), 1);

        node.remove_child("k");
        assert_eq!(node.neighbors().count(), 0);
    }

    #[test]
    fn test_attrs_round_trip_every_variant() {
        let mut board = BoardNode::new("b", json!("board"));
        board.children.insert("a".to_string());
        board.children.insert("c".to_string());

        let mut card = ContentNode::new("card", json!({"text": "note"}));
        card.parent = Some("col".to_string());

        let mut column = ColumnHeaderNode::new("col", json!("To do"), 2);
        column.parent = Some("b".to_string());
        column.child = Some("card".to_string());

        for node in [
            Node::Board(board),
            Node::Content(card),
            Node::ColumnHeader(column),
        ] {
            let attrs = node.to_attrs().unwrap();
            assert_eq!(attrs["type"], json!(node.node_type()));
            assert_eq!(Node::from_attrs(attrs).unwrap(), node);
        }
    }

    #[test]
    fn test_equality_includes_version() {
        let one = Node::Board(BoardNode::new("b", json!(null)));
        let mut two = one.clone();
        assert_eq!(one, two);

        two.set_version(7);
        assert_ne!(one, two);
    }

    #[test]
    fn test_unknown_node_type_is_rejected() {
        let mut attrs = AttrMap::new();
        attrs.insert("type".to_string(), json!("Widget"));
        attrs.insert("id".to_string(), json!("x"));

        match Node::from_attrs(attrs) {
            Err(NodeError::UnknownNodeType(tag)) => assert_eq!(tag, "Widget"),
            other => panic!("expected UnknownNodeType, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_discriminant_is_rejected() {
        let mut attrs = AttrMap::new();
        attrs.insert("id".to_string(), json!("x"));

        assert!(matches!(
            Node::from_attrs(attrs),
            Err(NodeError::MissingAttr("type"))
        ));
    }
}
