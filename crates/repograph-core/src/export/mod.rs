//! Graph projection for visualization front ends.
//!
//! The output follows the Sigma.js/Graphology import format: every node is a
//! `key` plus render attributes, every edge a `source`/`target` pair.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::graph::{attr, GraphStore, Node, NodeId, NodeKind, Relationship};

/// Complete graph payload for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualGraph {
    pub nodes: Vec<VisualNode>,
    pub edges: Vec<VisualEdge>,
}

/// A node in the graph visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualNode {
    /// Node id.
    pub key: String,
    pub attributes: VisualNodeAttributes,
}

/// Node attributes for rendering and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualNodeAttributes {
    pub label: String,
    /// Node kind. Named `category` so it does not collide with Sigma's
    /// render `type`.
    pub category: String,
    /// Hex color for rendering.
    pub color: String,
    /// Node size in pixels.
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

/// An edge in the graph visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualEdge {
    pub source: String,
    pub target: String,
    pub attributes: VisualEdgeAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualEdgeAttributes {
    /// Named `relationship` instead of `type` to avoid Sigma's edge type.
    pub relationship: String,
}

fn kind_color(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Function => "#0969da",   // Blue
        NodeKind::Class => "#1a7f37",      // Green
        NodeKind::File => "#9a6700",       // Yellow/Orange
        NodeKind::Dependency => "#cf222e", // Red
        NodeKind::Directory => "#8250df",  // Purple
    }
}

fn kind_size(kind: NodeKind) -> u32 {
    match kind {
        NodeKind::Directory | NodeKind::Class => 12,
        NodeKind::File => 10,
        NodeKind::Function => 8,
        NodeKind::Dependency => 6,
    }
}

fn visual_node(node: &Node) -> VisualNode {
    VisualNode {
        key: node.id.to_string(),
        attributes: VisualNodeAttributes {
            label: node.name().to_string(),
            category: node.kind.as_str().to_string(),
            color: kind_color(node.kind).to_string(),
            size: kind_size(node.kind),
            file: node.file_path().map(str::to_string),
            line: node.attr_u64(attr::LINE_NUMBER),
        },
    }
}

/// Project the graph for rendering.
///
/// `kinds` and `relationships` restrict the output when given; `None` keeps
/// everything. An edge is emitted only when both of its endpoints pass the
/// kind filter. Nodes come out in ascending id order and edges in insertion
/// order.
pub fn export_visual(
    graph: &GraphStore,
    kinds: Option<&[NodeKind]>,
    relationships: Option<&[Relationship]>,
) -> VisualGraph {
    let nodes: Vec<&Node> = graph
        .nodes()
        .filter(|n| kinds.map_or(true, |k| k.contains(&n.kind)))
        .collect();
    let kept: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();

    let edges = graph
        .edges()
        .iter()
        .filter(|e| relationships.map_or(true, |r| r.contains(&e.relationship)))
        .filter(|e| kept.contains(&e.source) && kept.contains(&e.target))
        .map(|e| VisualEdge {
            source: e.source.to_string(),
            target: e.target.to_string(),
            attributes: VisualEdgeAttributes {
                relationship: e.relationship.as_str().to_string(),
            },
        })
        .collect();

    VisualGraph {
        nodes: nodes.into_iter().map(visual_node).collect(),
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Attributes;
    use serde_json::json;

    fn sample() -> GraphStore {
        let mut graph = GraphStore::new();
        let mut file = Attributes::new();
        file.insert(attr::NAME.into(), json!("auth.py"));
        file.insert(attr::PATH.into(), json!("src/auth.py"));
        graph.add_node(NodeId::file("src/auth.py"), NodeKind::File, file).unwrap();

        let mut login = Attributes::new();
        login.insert(attr::NAME.into(), json!("login"));
        login.insert(attr::DEFINING_FILE.into(), json!("src/auth.py"));
        login.insert(attr::LINE_NUMBER.into(), json!(12));
        graph
            .add_node(NodeId::function("src/auth.py", "login"), NodeKind::Function, login)
            .unwrap();
        graph
            .add_node(NodeId::function("src/auth.py", "check"), NodeKind::Function, Attributes::new())
            .unwrap();

        for target in ["login", "check"] {
            graph
                .add_edge(
                    NodeId::file("src/auth.py"),
                    NodeId::function("src/auth.py", target),
                    Relationship::Defines,
                    Attributes::new(),
                )
                .unwrap();
        }
        graph
            .add_edge(
                NodeId::function("src/auth.py", "login"),
                NodeId::function("src/auth.py", "check"),
                Relationship::Calls,
                Attributes::new(),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_export_everything() {
        let visual = export_visual(&sample(), None, None);
        assert_eq!(visual.nodes.len(), 3);
        assert_eq!(visual.edges.len(), 3);

        let login = visual
            .nodes
            .iter()
            .find(|n| n.key == "function:src/auth.py:login")
            .unwrap();
        assert_eq!(login.attributes.label, "login");
        assert_eq!(login.attributes.category, "function");
        assert_eq!(login.attributes.color, "#0969da");
        assert_eq!(login.attributes.size, 8);
        assert_eq!(login.attributes.file.as_deref(), Some("src/auth.py"));
        assert_eq!(login.attributes.line, Some(12));

        // unnamed nodes fall back to their id
        let check = visual
            .nodes
            .iter()
            .find(|n| n.key == "function:src/auth.py:check")
            .unwrap();
        assert_eq!(check.attributes.label, "function:src/auth.py:check");
    }

    #[test]
    fn test_kind_filter_drops_dangling_edges() {
        let visual = export_visual(&sample(), Some(&[NodeKind::Function]), None);
        assert_eq!(visual.nodes.len(), 2);
        assert_eq!(visual.edges.len(), 1);
        assert_eq!(visual.edges[0].attributes.relationship, "calls");
    }

    #[test]
    fn test_relationship_filter() {
        let visual = export_visual(&sample(), None, Some(&[Relationship::Defines]));
        assert_eq!(visual.nodes.len(), 3);
        assert_eq!(visual.edges.len(), 2);
        assert!(visual.edges.iter().all(|e| e.attributes.relationship == "defines"));
    }

    #[test]
    fn test_serialized_shape() {
        let visual = export_visual(&sample(), Some(&[NodeKind::File]), None);
        let value = serde_json::to_value(&visual).unwrap();
        let node = &value["nodes"][0];
        assert_eq!(node["key"], "file:src/auth.py");
        assert_eq!(node["attributes"]["category"], "file");
        assert!(node["attributes"].get("line").is_none());
        assert_eq!(value["edges"], json!([]));
    }
}
