//! Accessibility tree flattening and ref assignment.
//!
//! The raw tree from `Accessibility.getFullAXTree` is decoded permissively:
//! the returned shapes drift across browser versions, so every field is
//! optional and `{type, value}` pairs accept any JSON value. Flattening is
//! pure: the same input with the same filter and depth always produces the
//! same node list and ref map.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use tabbridge_core::{Error, Result};

/// Roles addressable under `filter=interactive`.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "searchbox",
    "combobox",
    "listbox",
    "option",
    "checkbox",
    "radio",
    "switch",
    "slider",
    "spinbutton",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "tab",
    "treeitem",
];

/// One flattened accessibility node. `ref` addresses the node within the
/// snapshot that produced it; `nodeId` is the backend DOM id when the
/// browser reported one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxNode {
    #[serde(rename = "ref")]
    pub ref_id: String,
    pub role: String,
    pub name: String,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub focused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<i64>,
}

/// Raw AX node as reported over the wire. Every field defaults so schema
/// drift degrades to empty values instead of parse failures.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAxNode {
    pub node_id: String,
    pub ignored: bool,
    pub role: Option<RawAxValue>,
    pub name: Option<RawAxValue>,
    pub value: Option<RawAxValue>,
    pub properties: Vec<RawAxProperty>,
    pub child_ids: Vec<String>,
    #[serde(rename = "backendDOMNodeId")]
    pub backend_dom_node_id: Option<i64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RawAxValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RawAxProperty {
    pub name: String,
    pub value: Option<RawAxValue>,
}

impl RawAxValue {
    fn as_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

fn text_of(v: &Option<RawAxValue>) -> String {
    v.as_ref().map(|v| v.as_text()).unwrap_or_default()
}

/// Decode the `Accessibility.getFullAXTree` result into raw nodes.
pub fn parse_ax_nodes(result: &Value) -> Result<Vec<RawAxNode>> {
    let nodes = result
        .get("nodes")
        .cloned()
        .ok_or_else(|| Error::cdp("parse a11y tree: no nodes field"))?;
    serde_json::from_value(nodes).map_err(|e| Error::cdp(format!("parse a11y tree: {}", e)))
}

/// Flatten raw nodes into the addressable list, assigning refs in emit order.
/// Returns the node list and the `ref → backendDOMNodeId` mapping.
pub fn build_snapshot(
    nodes: &[RawAxNode],
    interactive_only: bool,
    max_depth: Option<usize>,
) -> (Vec<AxNode>, HashMap<String, i64>) {
    // Parent links come from childIds; roots have depth 0.
    let mut parent: HashMap<&str, &str> = HashMap::new();
    for n in nodes {
        for child in &n.child_ids {
            parent.insert(child.as_str(), n.node_id.as_str());
        }
    }
    let depth_of = |id: &str| -> usize {
        let mut d = 0;
        let mut cur = id;
        while let Some(p) = parent.get(cur) {
            d += 1;
            cur = p;
            if d > nodes.len() {
                break;
            }
        }
        d
    };

    let mut flat = Vec::new();
    let mut refs = HashMap::new();

    for n in nodes {
        if n.ignored {
            continue;
        }
        let role = text_of(&n.role);
        let name = text_of(&n.name);

        if role == "none" || role == "generic" || role == "InlineTextBox" {
            continue;
        }
        if role == "StaticText" && name.is_empty() {
            continue;
        }

        let depth = depth_of(&n.node_id);
        if let Some(max) = max_depth {
            if depth > max {
                continue;
            }
        }
        if interactive_only && !INTERACTIVE_ROLES.contains(&role.as_str()) {
            continue;
        }

        let ref_id = format!("e{}", flat.len());

        let mut disabled = false;
        let mut focused = false;
        for prop in &n.properties {
            let truthy = prop.value.as_ref().map(|v| v.as_text() == "true").unwrap_or(false);
            match prop.name.as_str() {
                "disabled" => disabled = truthy,
                "focused" => focused = truthy,
                _ => {}
            }
        }

        let node_id = n.backend_dom_node_id.filter(|id| *id != 0);
        if let Some(id) = node_id {
            refs.insert(ref_id.clone(), id);
        }

        flat.push(AxNode {
            ref_id,
            role,
            name,
            depth,
            value: text_of(&n.value),
            disabled,
            focused,
            node_id,
        });
    }

    (flat, refs)
}

/// Render the node list as an indented text tree.
pub fn format_snapshot_text(nodes: &[AxNode]) -> String {
    let mut out = String::new();
    for n in nodes {
        out.push_str(&"  ".repeat(n.depth));
        out.push_str(&format!("- {}", n.role));
        if !n.name.is_empty() {
            out.push_str(&format!(" \"{}\"", n.name));
        }
        out.push_str(&format!(" [ref={}]", n.ref_id));
        if !n.value.is_empty() {
            out.push_str(&format!(" value=\"{}\"", n.value));
        }
        if n.disabled {
            out.push_str(" [disabled]");
        }
        if n.focused {
            out.push_str(" [focused]");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(tree: Value) -> Vec<RawAxNode> {
        parse_ax_nodes(&tree).unwrap()
    }

    fn sample_tree() -> Value {
        json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "role": {"type": "role", "value": "RootWebArea"},
                    "name": {"type": "computedString", "value": "Page"},
                    "childIds": ["2", "3", "4", "5"],
                    "backendDOMNodeId": 1
                },
                {
                    "nodeId": "2",
                    "role": {"type": "role", "value": "button"},
                    "name": {"type": "computedString", "value": "OK"},
                    "backendDOMNodeId": 10
                },
                {
                    "nodeId": "3",
                    "role": {"type": "role", "value": "StaticText"},
                    "name": {"type": "computedString", "value": ""}
                },
                {
                    "nodeId": "4",
                    "role": {"type": "role", "value": "generic"}
                },
                {
                    "nodeId": "5",
                    "role": {"type": "role", "value": "link"},
                    "name": {"type": "computedString", "value": "Home"},
                    "backendDOMNodeId": 20
                }
            ]
        })
    }

    #[test]
    fn filters_and_assigns_refs_in_emit_order() {
        let nodes = raw(sample_tree());
        let (flat, refs) = build_snapshot(&nodes, false, None);

        // Root survives; empty StaticText and generic are dropped.
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].role, "RootWebArea");
        assert_eq!(flat[1].ref_id, "e1");
        assert_eq!(flat[1].role, "button");
        assert_eq!(flat[1].name, "OK");
        assert_eq!(flat[2].ref_id, "e2");
        assert_eq!(flat[2].role, "link");
        assert_eq!(refs["e1"], 10);
        assert_eq!(refs["e2"], 20);
    }

    #[test]
    fn unfiltered_page_keeps_button_and_link_only() {
        let tree = json!({
            "nodes": [
                {"nodeId": "1", "role": {"value": "button"}, "name": {"value": "OK"}, "backendDOMNodeId": 10},
                {"nodeId": "2", "role": {"value": "StaticText"}, "name": {"value": ""}},
                {"nodeId": "3", "role": {"value": "generic"}},
                {"nodeId": "4", "role": {"value": "link"}, "name": {"value": "Home"}, "backendDOMNodeId": 20}
            ]
        });
        let (flat, refs) = build_snapshot(&raw(tree), false, None);
        assert_eq!(flat.len(), 2);
        assert_eq!((flat[0].ref_id.as_str(), flat[0].role.as_str(), flat[0].name.as_str()), ("e0", "button", "OK"));
        assert_eq!((flat[1].ref_id.as_str(), flat[1].role.as_str(), flat[1].name.as_str()), ("e1", "link", "Home"));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs["e0"], 10);
        assert_eq!(refs["e1"], 20);
    }

    #[test]
    fn interactive_filter_keeps_only_interactive_roles() {
        let nodes = raw(sample_tree());
        let (flat, refs) = build_snapshot(&nodes, true, None);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].ref_id, "e0");
        assert_eq!(flat[0].role, "button");
        assert_eq!(flat[1].ref_id, "e1");
        assert_eq!(flat[1].role, "link");
        assert_eq!(refs["e0"], 10);
        assert_eq!(refs["e1"], 20);
    }

    #[test]
    fn depth_limit_cuts_children() {
        let nodes = raw(sample_tree());
        let (flat, _) = build_snapshot(&nodes, false, Some(0));
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].role, "RootWebArea");
        assert_eq!(flat[0].depth, 0);
    }

    #[test]
    fn depth_is_parent_distance() {
        let tree = json!({
            "nodes": [
                {"nodeId": "1", "role": {"value": "RootWebArea"}, "name": {"value": "r"}, "childIds": ["2"]},
                {"nodeId": "2", "role": {"value": "navigation"}, "name": {"value": "n"}, "childIds": ["3"]},
                {"nodeId": "3", "role": {"value": "link"}, "name": {"value": "l"}, "backendDOMNodeId": 7}
            ]
        });
        let (flat, _) = build_snapshot(&raw(tree), false, None);
        assert_eq!(flat[0].depth, 0);
        assert_eq!(flat[1].depth, 1);
        assert_eq!(flat[2].depth, 2);
    }

    #[test]
    fn ignored_nodes_are_skipped() {
        let tree = json!({
            "nodes": [
                {"nodeId": "1", "ignored": true, "role": {"value": "button"}, "name": {"value": "hidden"}},
                {"nodeId": "2", "role": {"value": "button"}, "name": {"value": "shown"}, "backendDOMNodeId": 3}
            ]
        });
        let (flat, _) = build_snapshot(&raw(tree), false, None);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name, "shown");
    }

    #[test]
    fn properties_set_disabled_and_focused() {
        let tree = json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "role": {"value": "button"},
                    "name": {"value": "Go"},
                    "backendDOMNodeId": 4,
                    "properties": [
                        {"name": "disabled", "value": {"type": "boolean", "value": true}},
                        {"name": "focused", "value": {"type": "booleanOrUndefined", "value": true}}
                    ]
                }
            ]
        });
        let (flat, _) = build_snapshot(&raw(tree), false, None);
        assert!(flat[0].disabled);
        assert!(flat[0].focused);
    }

    #[test]
    fn nodes_without_backend_id_get_no_ref_mapping() {
        let tree = json!({
            "nodes": [
                {"nodeId": "1", "role": {"value": "heading"}, "name": {"value": "Title"}}
            ]
        });
        let (flat, refs) = build_snapshot(&raw(tree), false, None);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].node_id, None);
        assert!(refs.is_empty());
    }

    #[test]
    fn tolerates_schema_drift() {
        // Unknown fields, missing role/name, non-string values.
        let tree = json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "frameId": "F1",
                    "role": {"type": "internalRole", "value": 42},
                    "name": {"value": "n"},
                    "backendDOMNodeId": 9,
                    "futureField": {"nested": true}
                }
            ]
        });
        let (flat, _) = build_snapshot(&raw(tree), false, None);
        assert_eq!(flat[0].role, "42");
    }

    #[test]
    fn snapshot_is_deterministic() {
        let nodes = raw(sample_tree());
        let (a, ra) = build_snapshot(&nodes, false, None);
        let (b, rb) = build_snapshot(&nodes, false, None);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(ra, rb);
    }

    #[test]
    fn serialized_node_uses_wire_names_and_omits_empties() {
        let n = AxNode {
            ref_id: "e0".into(),
            role: "button".into(),
            name: "OK".into(),
            depth: 1,
            value: String::new(),
            disabled: false,
            focused: false,
            node_id: Some(10),
        };
        let s = serde_json::to_string(&n).unwrap();
        assert!(s.contains("\"ref\":\"e0\""));
        assert!(s.contains("\"nodeId\":10"));
        assert!(!s.contains("value"));
        assert!(!s.contains("disabled"));
    }

    #[test]
    fn text_format_indents_by_depth() {
        let nodes = raw(sample_tree());
        let (flat, _) = build_snapshot(&nodes, false, None);
        let text = format_snapshot_text(&flat);
        assert!(text.contains("- RootWebArea \"Page\" [ref=e0]"));
        assert!(text.contains("  - button \"OK\" [ref=e1]"));
    }
}
