//! Event publication contract.
//!
//! Committed changes surface as messages on two channel scopes: the
//! global board-registry channel carries board lifecycle, and each
//! board's own channel carries node mutations, lock traffic, and the
//! `lonely_board` stop sentinel. Delivery is at-most-once and
//! unbuffered; a subscriber connecting after publication never sees
//! it. Per-board messages arrive in commit order, and nothing is
//! promised across boards or between the two scopes.

mod listener;

pub use listener::board_update_listener;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::{Node, NodeError};

/// Message discriminant, snake_case on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BoardCreate,
    BoardDel,
    NodeUpdate,
    NodeDel,
    NodeLock,
    NodeUnlock,
    LonelyBoard,
}

/// The envelope published on every channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub event_data: Value,
}

impl Event {
    /// Updated nodes, serialized in staging order.
    pub fn node_update<'a, I>(nodes: I) -> Result<Self, NodeError>
    where
        I: IntoIterator<Item = &'a Node>,
    {
        Ok(Self {
            event_type: EventType::NodeUpdate,
            event_data: node_payload(nodes)?,
        })
    }

    /// Deleted nodes, serialized in staging order.
    pub fn node_del<'a, I>(nodes: I) -> Result<Self, NodeError>
    where
        I: IntoIterator<Item = &'a Node>,
    {
        Ok(Self {
            event_type: EventType::NodeDel,
            event_data: node_payload(nodes)?,
        })
    }

    /// Ids of nodes whose locks were claimed.
    pub fn node_lock<'a, I>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            event_type: EventType::NodeLock,
            event_data: id_payload(node_ids),
        }
    }

    /// Ids of nodes whose locks were released.
    pub fn node_unlock<'a, I>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            event_type: EventType::NodeUnlock,
            event_data: id_payload(node_ids),
        }
    }

    pub fn board_create(board_id: &str) -> Self {
        Self {
            event_type: EventType::BoardCreate,
            event_data: Value::String(board_id.to_string()),
        }
    }

    pub fn board_del(board_id: &str) -> Self {
        Self {
            event_type: EventType::BoardDel,
            event_data: Value::String(board_id.to_string()),
        }
    }

    /// The "stop listening" sentinel for a board.
    pub fn lonely_board(board_id: &str) -> Self {
        Self {
            event_type: EventType::LonelyBoard,
            event_data: Value::String(board_id.to_string()),
        }
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Whether this is the stop sentinel for `board_id`.
    pub fn is_sentinel_for(&self, board_id: &str) -> bool {
        self.event_type == EventType::LonelyBoard && self.event_data.as_str() == Some(board_id)
    }
}

fn node_payload<'a, I>(nodes: I) -> Result<Value, NodeError>
where
    I: IntoIterator<Item = &'a Node>,
{
    let serialized = nodes
        .into_iter()
        .map(|node| node.to_attrs().map(Value::Object))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(serialized))
}

fn id_payload<'a, I>(node_ids: I) -> Value
where
    I: IntoIterator<Item = &'a str>,
{
    Value::Array(
        node_ids
            .into_iter()
            .map(|id| Value::String(id.to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BoardNode, Node};
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let event = Event::node_lock(["a", "b"]);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event_type": "node_lock", "event_data": ["a", "b"]})
        );
    }

    #[test]
    fn test_envelope_round_trip() {
        let node = Node::Board(BoardNode::new("b", json!("hello")));
        let event = Event::node_update([&node]).unwrap();

        let back = Event::from_payload(&event.to_payload().unwrap()).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.event_data[0]["type"], json!("Board"));
    }

    #[test]
    fn test_sentinel_is_board_scoped() {
        let event = Event::lonely_board("board-1");
        assert!(event.is_sentinel_for("board-1"));
        assert!(!event.is_sentinel_for("board-2"));
        assert!(!Event::board_del("board-1").is_sentinel_for("board-1"));
    }
}
