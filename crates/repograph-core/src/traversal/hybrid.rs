//! Breadth-first context plus depth-first call/import chains.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::{breadth_first, depth_first, CancelFlag, TraversalConfig, Truncation};
use crate::config::{DEFAULT_BFS_DEPTH, DEFAULT_DFS_DEPTH, DEFAULT_MAX_NODES};
use crate::graph::{Direction, GraphStore, NodeId, Relationship};

/// Parameters of a hybrid walk.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub bfs_depth: usize,
    /// Relationships for the breadth-first phase; empty = all.
    pub bfs_relationships: Vec<Relationship>,
    pub bfs_direction: Direction,
    pub dfs_depth: usize,
    pub dfs_relationships: Vec<Relationship>,
    pub dfs_direction: Direction,
    /// Budget for the merged node set.
    pub max_nodes: usize,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelFlag>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            bfs_depth: DEFAULT_BFS_DEPTH,
            bfs_relationships: Vec::new(),
            bfs_direction: Direction::Either,
            dfs_depth: DEFAULT_DFS_DEPTH,
            dfs_relationships: vec![Relationship::Calls, Relationship::Imports],
            dfs_direction: Direction::Outgoing,
            max_nodes: DEFAULT_MAX_NODES,
            deadline: None,
            cancel: None,
        }
    }
}

impl HybridConfig {
    fn phase(&self, relationships: &[Relationship], direction: Direction, depth: usize) -> TraversalConfig {
        TraversalConfig {
            relationships: relationships.to_vec(),
            direction,
            max_depth: depth,
            max_nodes: self.max_nodes,
            deadline: self.deadline,
            cancel: self.cancel.clone(),
        }
    }
}

/// A node found by the hybrid walk, tagged with how it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedNode {
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bfs_distance: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dfs_depth: Option<usize>,
}

impl TaggedNode {
    pub fn found_by_both(&self) -> bool {
        self.bfs_distance.is_some() && self.dfs_depth.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridResult {
    /// Ordered by BFS distance, then DFS depth, then id; nodes missing a tag
    /// sort after those that have it.
    pub nodes: Vec<TaggedNode>,
    pub truncated: Option<Truncation>,
}

impl HybridResult {
    pub fn get(&self, id: &NodeId) -> Option<&TaggedNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}

/// Run a shallow breadth-first walk and a deeper depth-first walk from the
/// same seeds and union the results.
pub fn hybrid(graph: &GraphStore, seeds: &[NodeId], config: &HybridConfig) -> HybridResult {
    let bfs = breadth_first(
        graph,
        seeds,
        &config.phase(&config.bfs_relationships, config.bfs_direction, config.bfs_depth),
    );
    let dfs = depth_first(
        graph,
        seeds,
        &config.phase(&config.dfs_relationships, config.dfs_direction, config.dfs_depth),
    );

    let mut merged: BTreeMap<NodeId, TaggedNode> = BTreeMap::new();
    for visit in &bfs.visits {
        merged
            .entry(visit.node.clone())
            .or_insert_with(|| untagged(&visit.node))
            .bfs_distance = Some(visit.distance);
    }
    for visit in &dfs.visits {
        merged
            .entry(visit.node.clone())
            .or_insert_with(|| untagged(&visit.node))
            .dfs_depth = Some(visit.distance);
    }

    let mut nodes: Vec<TaggedNode> = merged.into_values().collect();
    nodes.sort_by(|a, b| {
        let key = |n: &TaggedNode| {
            (
                n.bfs_distance.unwrap_or(usize::MAX),
                n.dfs_depth.unwrap_or(usize::MAX),
            )
        };
        key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
    });

    let mut truncated = bfs.truncated.or(dfs.truncated);
    if nodes.len() > config.max_nodes {
        nodes.truncate(config.max_nodes);
        truncated = truncated.or(Some(Truncation::NodeBudget));
    }

    HybridResult { nodes, truncated }
}

fn untagged(id: &NodeId) -> TaggedNode {
    TaggedNode {
        id: id.clone(),
        bfs_distance: None,
        dfs_depth: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attributes, NodeKind};

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    /// f0 -> f1 -> ... -> f6 by calls; file:a defines f0.
    fn chain() -> GraphStore {
        let mut graph = GraphStore::new();
        graph.add_node(id("file:a"), NodeKind::File, Attributes::new()).unwrap();
        for i in 0..7 {
            graph
                .add_node(id(&format!("f{}", i)), NodeKind::Function, Attributes::new())
                .unwrap();
        }
        graph
            .add_edge(id("file:a"), id("f0"), Relationship::Defines, Attributes::new())
            .unwrap();
        for i in 0..6 {
            graph
                .add_edge(
                    id(&format!("f{}", i)),
                    id(&format!("f{}", i + 1)),
                    Relationship::Calls,
                    Attributes::new(),
                )
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_union_and_tags() {
        let graph = chain();
        let result = hybrid(&graph, &[id("f0")], &HybridConfig::default());

        let f0 = result.get(&id("f0")).unwrap();
        assert!(f0.found_by_both());
        // defining file only reachable through the undirected BFS
        let file = result.get(&id("file:a")).unwrap();
        assert_eq!(file.bfs_distance, Some(1));
        assert_eq!(file.dfs_depth, None);
        // f5 is beyond BFS depth 2 but within DFS depth 5
        let f5 = result.get(&id("f5")).unwrap();
        assert_eq!(f5.bfs_distance, None);
        assert_eq!(f5.dfs_depth, Some(5));
        assert!(result.get(&id("f6")).is_none());
        assert!(result.truncated.is_none());
    }

    #[test]
    fn test_ordering() {
        let graph = chain();
        let result = hybrid(&graph, &[id("f0")], &HybridConfig::default());
        let ids: Vec<&str> = result.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["f0", "f1", "file:a", "f2", "f3", "f4", "f5"]);
    }

    #[test]
    fn test_budget_applies_to_union() {
        let graph = chain();
        let config = HybridConfig {
            max_nodes: 3,
            ..Default::default()
        };
        let result = hybrid(&graph, &[id("f0")], &config);
        assert_eq!(result.nodes.len(), 3);
        assert_eq!(result.truncated, Some(Truncation::NodeBudget));
    }
}
