use serde_json::{json, Value};

use super::*;
use crate::dom::update::{Action, DomUpdate, UpdateNode};

/// Flat `[k0, v0, k1, v1]` attribute list the way DevTools delivers it.
fn input_attributes(size: usize, suffix: &str) -> Value {
    let mut attrs = Vec::new();
    for i in 0..size {
        attrs.push(json!(format!("foo{suffix}{i}")));
        attrs.push(json!(format!("bar{suffix}{i}")));
    }
    Value::Array(attrs)
}

fn expected_attributes(size: usize, suffix: &str) -> std::collections::BTreeMap<String, String> {
    (0..size)
        .map(|i| (format!("foo{suffix}{i}"), format!("bar{suffix}{i}")))
        .collect()
}

fn leaf(node_id: f64, name: &str, attr_suffix: &str) -> Value {
    json!({
        "nodeId": node_id,
        "backendNodeId": node_id,
        "nodeValue": name,
        "localName": name,
        "nodeName": name,
        "attributes": input_attributes(1, attr_suffix),
        "children": [],
    })
}

#[test]
fn initial_walk_orders_inserts_and_chains_siblings() {
    let root = json!({
        "nodeId": 1.0,
        "backendNodeId": 1.0,
        "nodeValue": "a",
        "localName": "a",
        "nodeName": "a",
        "attributes": input_attributes(1, "0"),
        "children": [leaf(2.0, "b", "1"), leaf(3.0, "c", "2")],
    });

    let mut model = DomModel::new();
    let updates = model.emit_initial(&root).unwrap();

    let expected = vec![
        DomUpdate {
            action: Action::Insert,
            node: UpdateNode {
                node_id: "1".into(),
                parent_node_id: "".into(),
                previous_node_id: "".into(),
                element_type: "a".into(),
                attributes: expected_attributes(1, "0"),
                text: "a".into(),
            },
        },
        DomUpdate {
            action: Action::Insert,
            node: UpdateNode {
                node_id: "2".into(),
                parent_node_id: "1".into(),
                previous_node_id: "".into(),
                element_type: "b".into(),
                attributes: expected_attributes(1, "1"),
                text: "b".into(),
            },
        },
        DomUpdate {
            action: Action::Insert,
            node: UpdateNode {
                node_id: "3".into(),
                parent_node_id: "1".into(),
                previous_node_id: "2".into(),
                element_type: "c".into(),
                attributes: expected_attributes(1, "2"),
                text: "c".into(),
            },
        },
    ];
    assert_eq!(updates, expected);
}

#[test]
fn each_stable_id_inserts_at_most_once() {
    let root = json!({
        "nodeId": 1.0,
        "backendNodeId": 1.0,
        "nodeValue": "",
        "nodeName": "HTML",
        "children": [leaf(2.0, "b", "0")],
    });

    let mut model = DomModel::new();
    let first = model.emit_initial(&root).unwrap();
    assert_eq!(first.len(), 2);

    // Walking the same tree again emits nothing new.
    let second = model.emit_initial(&root).unwrap();
    assert!(second.is_empty());
}

#[test]
fn insert_then_remove_leaves_no_state_behind() {
    let mut model = DomModel::new();

    let insert = model
        .on_child_inserted(&json!({
            "parentNodeId": 0.0,
            "previousNodeId": 0.0,
            "node": {
                "nodeId": 4.0,
                "backendNodeId": 4.0,
                "nodeValue": "first",
                "nodeName": "first",
            },
        }))
        .unwrap()
        .expect("emitted");
    assert_eq!(insert.action, Action::Insert);
    assert_eq!(insert.node.node_id, "4");
    assert_eq!(insert.node.parent_node_id, "");
    assert_eq!(insert.node.previous_node_id, "");

    let remove = model
        .on_child_removed(&json!({"nodeId": 4.0, "parentNodeId": 0.0}))
        .unwrap_err();
    // The parent of the root is unknown; removal against the root's parent
    // is a consistency error, mirroring the protocol's own behavior.
    assert!(matches!(remove, DomError::UnknownNode(_)));

    // Hang the node under a real parent and remove it.
    let mut model = DomModel::new();
    model
        .on_child_inserted(&json!({
            "parentNodeId": 0.0,
            "previousNodeId": 0.0,
            "node": {"nodeId": 4.0, "backendNodeId": 4.0, "nodeValue": "first", "nodeName": "first"},
        }))
        .unwrap();
    model
        .on_child_inserted(&json!({
            "parentNodeId": 4.0,
            "previousNodeId": 0.0,
            "node": {"nodeId": 1.0, "backendNodeId": 1.0, "nodeValue": "a", "nodeName": "a"},
        }))
        .unwrap();

    let remove = model
        .on_child_removed(&json!({"nodeId": 1.0, "parentNodeId": 4.0}))
        .unwrap()
        .expect("emitted");
    assert_eq!(
        remove,
        DomUpdate {
            action: Action::Remove,
            node: UpdateNode {
                node_id: "1".into(),
                parent_node_id: "4".into(),
                ..UpdateNode::default()
            },
        }
    );
    assert_eq!(model.known_len(), 1);
}

#[test]
fn second_insert_chains_previous_sibling() {
    let mut model = DomModel::new();
    model
        .on_child_inserted(&json!({
            "parentNodeId": 0.0,
            "previousNodeId": 0.0,
            "node": {"nodeId": 4.0, "backendNodeId": 4.0, "nodeValue": "r", "nodeName": "r"},
        }))
        .unwrap();
    model
        .on_child_inserted(&json!({
            "parentNodeId": 4.0,
            "previousNodeId": 0.0,
            "node": {"nodeId": 1.0, "backendNodeId": 1.0, "nodeValue": "a", "nodeName": "a"},
        }))
        .unwrap();

    let update = model
        .on_child_inserted(&json!({
            "parentNodeId": 4.0,
            "previousNodeId": 1.0,
            "node": {"nodeId": 2.0, "backendNodeId": 2.0, "nodeValue": "b", "nodeName": "b"},
        }))
        .unwrap()
        .expect("emitted");
    assert_eq!(update.node.previous_node_id, "1");
}

#[test]
fn unknown_parent_and_previous_are_errors() {
    let mut model = DomModel::new();
    let err = model
        .on_child_inserted(&json!({
            "parentNodeId": 9.0,
            "previousNodeId": 0.0,
            "node": {"nodeId": 1.0, "backendNodeId": 1.0, "nodeValue": "", "nodeName": "a"},
        }))
        .unwrap_err();
    assert!(matches!(err, DomError::UnknownNode(_)));

    let err = model
        .on_child_inserted(&json!({
            "parentNodeId": 0.0,
            "previousNodeId": 9.0,
            "node": {"nodeId": 1.0, "backendNodeId": 1.0, "nodeValue": "", "nodeName": "a"},
        }))
        .unwrap_err();
    assert!(matches!(err, DomError::UnknownPrevious(_)));
}

#[test]
fn attribute_modification_emits_singleton_map() {
    let mut model = DomModel::new();
    model
        .on_child_inserted(&json!({
            "parentNodeId": 0.0,
            "previousNodeId": 0.0,
            "node": {"nodeId": 1.0, "backendNodeId": 1.0, "nodeValue": "a", "nodeName": "a"},
        }))
        .unwrap();

    let update = model
        .on_attribute_modified(&json!({"nodeId": 1.0, "name": "foo", "value": "bar"}))
        .unwrap()
        .expect("emitted");
    assert_eq!(update.action, Action::Modify);
    assert_eq!(update.node.node_id, "1");
    assert_eq!(update.node.attributes.get("foo").map(String::as_str), Some("bar"));
    assert_eq!(update.node.attributes.len(), 1);
}

#[test]
fn event_handler_attribute_modifications_are_swallowed() {
    let mut model = DomModel::new();
    model
        .on_child_inserted(&json!({
            "parentNodeId": 0.0,
            "previousNodeId": 0.0,
            "node": {"nodeId": 1.0, "backendNodeId": 1.0, "nodeValue": "a", "nodeName": "a"},
        }))
        .unwrap();

    let update = model
        .on_attribute_modified(&json!({"nodeId": 1.0, "name": "onclick", "value": "f()"}))
        .unwrap();
    assert!(update.is_none());
}

#[test]
fn script_subtrees_are_suppressed_transitively() {
    let root = json!({
        "nodeId": 1.0,
        "backendNodeId": 1.0,
        "nodeValue": "",
        "nodeName": "HTML",
        "children": [{
            "nodeId": 2.0,
            "backendNodeId": 2.0,
            "nodeValue": "",
            "nodeName": "SCRIPT",
            "attributes": ["src", "x.js"],
            "children": [{
                "nodeId": 3.0,
                "backendNodeId": 3.0,
                "nodeValue": "alert('x')",
                "nodeName": "#text",
                "children": [{
                    "nodeId": 4.0,
                    "backendNodeId": 4.0,
                    "nodeValue": "deep",
                    "nodeName": "span",
                    "children": [],
                }],
            }],
        }],
    });

    let mut model = DomModel::new();
    let updates = model.emit_initial(&root).unwrap();

    // The script element itself is kept as a bare structural node; nothing
    // beneath it is emitted, not even grandchildren.
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].node.element_type, "SCRIPT");
    assert!(updates[1].node.attributes.is_empty());
    assert!(updates.iter().all(|u| u.node.node_id != "3"));
    assert!(updates.iter().all(|u| u.node.node_id != "4"));

    // Later inserts under the script's text child stay suppressed too.
    let update = model
        .on_child_inserted(&json!({
            "parentNodeId": 3.0,
            "previousNodeId": 0.0,
            "node": {"nodeId": 5.0, "backendNodeId": 5.0, "nodeValue": "x", "nodeName": "b"},
        }))
        .unwrap();
    assert!(update.is_none());
}

#[test]
fn inserts_never_carry_event_handler_attributes() {
    let root = json!({
        "nodeId": 1.0,
        "backendNodeId": 1.0,
        "nodeValue": "",
        "nodeName": "BODY",
        "attributes": ["onload", "f()", "class", "page"],
        "children": [],
    });

    let mut model = DomModel::new();
    let updates = model.emit_initial(&root).unwrap();
    assert_eq!(updates.len(), 1);
    assert!(!updates[0].node.attributes.contains_key("onload"));
    assert_eq!(
        updates[0].node.attributes.get("class").map(String::as_str),
        Some("page")
    );
}

#[test]
fn set_child_nodes_chains_across_top_level_nodes() {
    let mut model = DomModel::new();
    model
        .emit_initial(&json!({
            "nodeId": 1.0,
            "backendNodeId": 1.0,
            "nodeValue": "",
            "nodeName": "HTML",
            "children": [],
        }))
        .unwrap();

    let updates = model
        .on_set_child_nodes(&json!({
            "parentId": 1.0,
            "nodes": [leaf(2.0, "b", "0"), leaf(3.0, "c", "1")],
        }))
        .unwrap();

    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].node.parent_node_id, "1");
    assert_eq!(updates[0].node.previous_node_id, "");
    assert_eq!(updates[1].node.previous_node_id, "2");
}

#[test]
fn document_updated_clears_all_state() {
    let mut model = DomModel::new();
    model
        .emit_initial(&json!({
            "nodeId": 1.0,
            "backendNodeId": 1.0,
            "nodeValue": "",
            "nodeName": "HTML",
            "children": [leaf(2.0, "b", "0")],
        }))
        .unwrap();
    assert_eq!(model.known_len(), 2);

    model.begin_document();
    assert_eq!(model.known_len(), 0);

    // The same tree replays in full after the reset.
    let updates = model
        .emit_initial(&json!({
            "nodeId": 1.0,
            "backendNodeId": 1.0,
            "nodeValue": "",
            "nodeName": "HTML",
            "children": [leaf(2.0, "b", "0")],
        }))
        .unwrap();
    assert_eq!(updates.len(), 2);
}

#[test]
fn terminal_state_is_tracked() {
    let mut model = DomModel::new();
    assert!(!model.is_terminal());
    model.finish();
    assert!(model.is_terminal());
}
