//! The board node graph model.

mod node;

pub use node::{AttrMap, BoardNode, ColumnHeaderNode, ContentNode, Node, NodeError, NodeId};
