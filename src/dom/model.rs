//! Stateful translator from protocol node events to the update stream.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use super::update::{Action, DomUpdate, UpdateNode};
use crate::sanitize::is_event_handler;

const SCRIPT_ELEMENT: &str = "script";

/// Translation failures. The stream handler logs these and skips the
/// offending event; the stream itself continues.
#[derive(Debug, Error)]
pub enum DomError {
    #[error("node missing field {0:?}")]
    MissingField(&'static str),

    #[error("field {0:?} is not a number")]
    NotANumber(&'static str),

    #[error("node {0} is not known to this document")]
    UnknownNode(String),

    #[error("previous sibling {0} is not known to this document")]
    UnknownPrevious(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentState {
    Fresh,
    Loaded,
    Terminal,
}

/// Per-document translation state.
///
/// Tracks three mappings — protocol ID to stable ID, the set of stable IDs
/// already emitted, and stable ID to element name — plus the set of nodes
/// suppressed because a `script` element sits on their ancestor chain.
/// Suppressed nodes still get their mappings recorded so later protocol
/// references to them resolve; they just never produce updates.
pub struct DomModel {
    node_ids: HashMap<String, String>,
    known: HashSet<String>,
    kinds: HashMap<String, String>,
    suppressed: HashSet<String>,
    state: DocumentState,
}

impl DomModel {
    pub fn new() -> Self {
        Self {
            node_ids: HashMap::new(),
            known: HashSet::new(),
            kinds: HashMap::new(),
            suppressed: HashSet::new(),
            state: DocumentState::Fresh,
        }
    }

    /// Clears all per-document state. Called on `DOM.documentUpdated`, which
    /// re-enters the fresh state even mid-document.
    pub fn begin_document(&mut self) {
        self.node_ids.clear();
        self.known.clear();
        self.kinds.clear();
        self.suppressed.clear();
        self.state = DocumentState::Fresh;
    }

    /// Marks the document stabilized; no further updates are expected.
    pub fn finish(&mut self) {
        self.state = DocumentState::Terminal;
    }

    pub fn is_terminal(&self) -> bool {
        self.state == DocumentState::Terminal
    }

    /// Depth-first walk of a full protocol tree, emitting one insert per
    /// node not yet known, threading the previous-sibling chain through
    /// each level.
    pub fn emit_initial(&mut self, root: &Value) -> Result<Vec<DomUpdate>, DomError> {
        let mut updates = Vec::new();
        self.walk(root, "", "", &mut updates)?;
        self.state = DocumentState::Loaded;
        Ok(updates)
    }

    /// Handles `DOM.setChildNodes`: the payload names a parent (protocol ID)
    /// and a list of subtrees to splice under it.
    pub fn on_set_child_nodes(&mut self, params: &Value) -> Result<Vec<DomUpdate>, DomError> {
        let parent_protocol = node_id_str(params, "parentId")?;
        let parent_stable = self.stable_for(&parent_protocol)?;
        let nodes = params
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or(DomError::MissingField("nodes"))?;

        let mut updates = Vec::new();
        let mut previous = String::new();
        for node in nodes {
            previous = self.walk(node, &parent_stable, &previous, &mut updates)?;
        }
        Ok(updates)
    }

    /// Handles `DOM.childNodeInserted`. Returns `None` when the insert is
    /// suppressed (duplicate stable ID, or a script ancestor).
    pub fn on_child_inserted(&mut self, params: &Value) -> Result<Option<DomUpdate>, DomError> {
        let node = params.get("node").ok_or(DomError::MissingField("node"))?;

        let parent_protocol = node_id_str(params, "parentNodeId")?;
        let parent_stable = if parent_protocol.is_empty() {
            String::new()
        } else {
            self.stable_for(&parent_protocol)?
        };

        let prev_protocol = node_id_str(params, "previousNodeId")?;
        let prev_stable = if prev_protocol.is_empty() {
            String::new()
        } else {
            self.node_ids
                .get(&prev_protocol)
                .cloned()
                .ok_or(DomError::UnknownPrevious(prev_protocol))?
        };

        let stable = node_id_str(node, "backendNodeId")?;
        let protocol = node_id_str(node, "nodeId")?;
        self.node_ids.insert(protocol, stable.clone());

        if self.known.contains(&stable) {
            return Ok(None);
        }
        self.known.insert(stable.clone());

        if self.under_script(&parent_stable) {
            self.suppressed.insert(stable.clone());
            self.record_kind(&stable, node);
            return Ok(None);
        }
        Ok(Some(self.insert_update(&stable, &parent_stable, &prev_stable, node)))
    }

    /// Handles `DOM.childNodeRemoved`: emits one remove and purges all state
    /// held for the node. Removals inside script subtrees purge silently.
    pub fn on_child_removed(&mut self, params: &Value) -> Result<Option<DomUpdate>, DomError> {
        let parent_protocol = node_id_str(params, "parentNodeId")?;
        let parent_stable = self.stable_for(&parent_protocol)?;
        let protocol = node_id_str(params, "nodeId")?;
        let stable = self.stable_for(&protocol)?;

        self.node_ids.remove(&protocol);
        self.known.remove(&stable);
        self.kinds.remove(&stable);
        let was_suppressed = self.suppressed.remove(&stable);

        if was_suppressed {
            return Ok(None);
        }
        Ok(Some(DomUpdate {
            action: Action::Remove,
            node: UpdateNode {
                node_id: stable,
                parent_node_id: parent_stable,
                ..UpdateNode::default()
            },
        }))
    }

    /// Handles `DOM.attributeModified`: a modify update carrying the single
    /// changed attribute. Event-handler attributes and nodes under script
    /// subtrees produce nothing.
    pub fn on_attribute_modified(&mut self, params: &Value) -> Result<Option<DomUpdate>, DomError> {
        let protocol = node_id_str(params, "nodeId")?;
        let stable = self.stable_for(&protocol)?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or(DomError::MissingField("name"))?;
        let value = params
            .get("value")
            .and_then(Value::as_str)
            .ok_or(DomError::MissingField("value"))?;

        if self.suppressed.contains(&stable) || is_event_handler(name) {
            return Ok(None);
        }

        let mut attributes = BTreeMap::new();
        attributes.insert(name.to_string(), value.to_string());
        Ok(Some(DomUpdate {
            action: Action::Modify,
            node: UpdateNode {
                node_id: stable,
                attributes,
                ..UpdateNode::default()
            },
        }))
    }

    /// Recursive walk shared by `emit_initial` and `on_set_child_nodes`.
    /// Returns the stable ID of the walked node so siblings can chain.
    fn walk(
        &mut self,
        node: &Value,
        parent_stable: &str,
        prev_stable: &str,
        out: &mut Vec<DomUpdate>,
    ) -> Result<String, DomError> {
        let stable = node_id_str(node, "backendNodeId")?;
        let protocol = node_id_str(node, "nodeId")?;

        if !self.known.contains(&stable) {
            self.known.insert(stable.clone());
            if self.under_script(parent_stable) {
                self.suppressed.insert(stable.clone());
                self.record_kind(&stable, node);
            } else {
                let update = self.insert_update(&stable, parent_stable, prev_stable, node);
                out.push(update);
            }
        }

        if let Some(children) = node.get("children").and_then(Value::as_array) {
            let mut previous = String::new();
            for child in children {
                previous = self.walk(child, &stable, &previous, out)?;
            }
        }

        self.node_ids.insert(protocol, stable.clone());
        Ok(stable)
    }

    fn insert_update(
        &mut self,
        stable: &str,
        parent_stable: &str,
        prev_stable: &str,
        node: &Value,
    ) -> DomUpdate {
        let element_type = node
            .get("nodeName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        // Scripts are kept as structural placeholders but stripped bare.
        let attributes = if element_type.eq_ignore_ascii_case(SCRIPT_ELEMENT) {
            BTreeMap::new()
        } else {
            extract_attributes(node)
        };
        let text = node
            .get("nodeValue")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.kinds.insert(stable.to_string(), element_type.clone());
        DomUpdate {
            action: Action::Insert,
            node: UpdateNode {
                node_id: stable.to_string(),
                parent_node_id: parent_stable.to_string(),
                previous_node_id: prev_stable.to_string(),
                element_type,
                attributes,
                text,
            },
        }
    }

    fn record_kind(&mut self, stable: &str, node: &Value) {
        if let Some(name) = node.get("nodeName").and_then(Value::as_str) {
            self.kinds.insert(stable.to_string(), name.to_string());
        }
    }

    /// True when the parent is a script element or itself sits under one.
    fn under_script(&self, parent_stable: &str) -> bool {
        self.suppressed.contains(parent_stable)
            || self
                .kinds
                .get(parent_stable)
                .is_some_and(|kind| kind.eq_ignore_ascii_case(SCRIPT_ELEMENT))
    }

    fn stable_for(&self, protocol: &str) -> Result<String, DomError> {
        self.node_ids
            .get(protocol)
            .cloned()
            .ok_or_else(|| DomError::UnknownNode(protocol.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn known_len(&self) -> usize {
        self.known.len()
    }
}

impl Default for DomModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a numeric node ID field as its decimal string. Protocol numbers
/// arrive as floats; `0` means "no such node" (a root's parent, or an
/// insertion at the front of its level) and maps to the empty string.
fn node_id_str(node: &Value, field: &'static str) -> Result<String, DomError> {
    let value = node.get(field).ok_or(DomError::MissingField(field))?;
    let number = value.as_f64().ok_or(DomError::NotANumber(field))?;
    let id = number.trunc() as i64;
    if id == 0 {
        Ok(String::new())
    } else {
        Ok(id.to_string())
    }
}

/// Pairs the protocol's flat `[k0, v0, k1, v1, …]` attribute list into a
/// map, dropping event-handler keys.
fn extract_attributes(node: &Value) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    if let Some(pairs) = node.get("attributes").and_then(Value::as_array) {
        for pair in pairs.chunks_exact(2) {
            if let (Some(key), Some(value)) = (pair[0].as_str(), pair[1].as_str()) {
                if is_event_handler(key) {
                    continue;
                }
                attributes.insert(key.to_string(), value.to_string());
            }
        }
    }
    attributes
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
