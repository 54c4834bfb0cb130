//! Serializable DOM update types, the wire contract with the client stub.
//!
//! Field names and action codes are fixed: the client-side applier matches
//! on `Updates`, `Action` (1 = insert, 2 = remove, 3 = modify; 0 reserved
//! invalid) and the `Node` fields below. Empty strings denote an absent
//! parent ("root") or previous sibling ("first child").

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// What an update does to the client document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert = 1,
    Remove = 2,
    Modify = 3,
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(Action::Insert),
            2 => Ok(Action::Remove),
            3 => Ok(Action::Modify),
            other => Err(de::Error::custom(format!("invalid action code {other}"))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Insert => "insert",
            Action::Remove => "remove",
            Action::Modify => "modify",
        };
        f.write_str(name)
    }
}

/// The node payload of an update. IDs are stable node IDs rendered as
/// decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateNode {
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "ParentNodeID")]
    pub parent_node_id: String,
    #[serde(rename = "PreviousNodeID")]
    pub previous_node_id: String,
    #[serde(rename = "ElementType")]
    pub element_type: String,
    #[serde(rename = "Attributes")]
    pub attributes: BTreeMap<String, String>,
    #[serde(rename = "Text")]
    pub text: String,
}

/// One DOM mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomUpdate {
    #[serde(rename = "Action")]
    pub action: Action,
    #[serde(rename = "Node")]
    pub node: UpdateNode,
}

/// A batch of updates; one batch per wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    #[serde(rename = "Updates")]
    pub updates: Vec<DomUpdate>,
}
