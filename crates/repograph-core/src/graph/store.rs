//! In-memory directed multigraph with kind, relationship, and adjacency indexes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

use super::error::GraphError;
use super::model::{attr, Attributes, Direction, Edge, Node, NodeId, NodeKind, Relationship};

/// One edge incident to a node, seen from that node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjacent<'a> {
    /// The node on the other end of the edge.
    pub neighbor: &'a NodeId,
    /// Index of the edge in insertion order.
    pub edge_index: usize,
    pub relationship: Relationship,
}

/// Mutable graph store used during the build phase.
///
/// Nodes and edges are never removed. Lookups by id are hash-based; per-kind
/// iteration and neighbor lists are returned in ascending id order so every
/// consumer sees the same ordering for the same graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStore {
    nodes: HashMap<NodeId, Node>,
    by_kind: HashMap<NodeKind, BTreeSet<NodeId>>,
    by_name: HashMap<String, BTreeSet<NodeId>>,
    edges: Vec<Edge>,
    by_relationship: HashMap<Relationship, Vec<usize>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    incoming: HashMap<NodeId, Vec<usize>>,
    embedding_dimension: Option<usize>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Mutation (build phase only)
    // =========================================================================

    /// Insert a node. Fails if the id is already present.
    pub fn add_node(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        attributes: Attributes,
    ) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }

        if let Some(name) = attributes.get(attr::NAME).and_then(|v| v.as_str()) {
            self.by_name
                .entry(name.to_string())
                .or_default()
                .insert(id.clone());
        }
        self.by_kind.entry(kind).or_default().insert(id.clone());
        self.nodes.insert(id.clone(), Node::new(id, kind, attributes));
        Ok(())
    }

    /// Insert a directed edge. Fails if either endpoint is absent.
    ///
    /// Returns the edge index.
    pub fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        relationship: Relationship,
        attributes: Attributes,
    ) -> Result<usize, GraphError> {
        for endpoint in [&source, &target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::DanglingEndpoint {
                    missing: endpoint.clone(),
                    source_id: source.clone(),
                    target_id: target.clone(),
                    relationship,
                });
            }
        }

        let index = self.edges.len();
        self.outgoing.entry(source.clone()).or_default().push(index);
        self.incoming.entry(target.clone()).or_default().push(index);
        self.by_relationship.entry(relationship).or_default().push(index);
        self.edges.push(Edge {
            source,
            target,
            relationship,
            attributes,
        });
        Ok(index)
    }

    /// Add an attribute to an existing node.
    ///
    /// Setting the same value again is a no-op; a different value for an
    /// existing key is rejected, so enrichment never contradicts.
    pub fn enrich_attribute(
        &mut self,
        id: &NodeId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;

        match node.attributes.get(key) {
            Some(existing) if *existing == value => Ok(()),
            Some(_) => Err(GraphError::AttributeConflict {
                id: id.clone(),
                key: key.to_string(),
            }),
            None => {
                if key == attr::NAME {
                    if let Some(name) = value.as_str() {
                        self.by_name
                            .entry(name.to_string())
                            .or_default()
                            .insert(id.clone());
                    }
                }
                node.attributes.insert(key.to_string(), value);
                Ok(())
            }
        }
    }

    /// Attach or replace a node's embedding vector.
    ///
    /// The first vector attached fixes the graph's dimension.
    pub fn attach_embedding(&mut self, id: &NodeId, embedding: Vec<f32>) -> Result<(), GraphError> {
        if let Some(expected) = self.embedding_dimension {
            if embedding.len() != expected {
                return Err(GraphError::EmbeddingDimension {
                    id: id.clone(),
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        self.embedding_dimension = Some(embedding.len());
        node.embedding = Some(embedding);
        Ok(())
    }

    /// Finish the build phase.
    pub fn freeze(self) -> FrozenGraph {
        self.freeze_with_id(Uuid::new_v4())
    }

    /// Finish the build phase under a known graph id.
    pub fn freeze_with_id(self, graph_id: Uuid) -> FrozenGraph {
        FrozenGraph {
            inner: Arc::new(self),
            graph_id,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        let ids: BTreeSet<&NodeId> = self.nodes.keys().collect();
        ids.into_iter().filter_map(move |id| self.nodes.get(id))
    }

    /// Nodes of one kind in ascending id order.
    pub fn nodes_by_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> + '_ {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(move |id| self.nodes.get(id))
    }

    /// Nodes whose `name` attribute equals `name`, ascending id.
    pub fn find_by_name(&self, name: &str) -> Vec<&Node> {
        self.by_name
            .get(name)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    /// Every edge from `source` to `target`, insertion order.
    pub fn edges_between(&self, source: &NodeId, target: &NodeId) -> Vec<&Edge> {
        self.outgoing
            .get(source)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
            .filter(|e| &e.target == target)
            .collect()
    }

    /// Edges of one relationship in insertion order.
    pub fn edges_by_relationship(&self, relationship: Relationship) -> impl Iterator<Item = &Edge> + '_ {
        self.by_relationship
            .get(&relationship)
            .into_iter()
            .flat_map(|indexes| indexes.iter())
            .map(move |&i| &self.edges[i])
    }

    /// Edges incident to `id` whose relationship is in `relationships`
    /// (empty = any), sorted by neighbor id then edge index.
    pub fn adjacent(
        &self,
        id: &NodeId,
        relationships: &[Relationship],
        direction: Direction,
    ) -> Vec<Adjacent<'_>> {
        let allowed = |r: Relationship| relationships.is_empty() || relationships.contains(&r);
        let mut result = Vec::new();

        if matches!(direction, Direction::Outgoing | Direction::Either) {
            for &i in self.outgoing.get(id).into_iter().flatten() {
                let edge = &self.edges[i];
                if allowed(edge.relationship) {
                    result.push(Adjacent {
                        neighbor: &edge.target,
                        edge_index: i,
                        relationship: edge.relationship,
                    });
                }
            }
        }

        if matches!(direction, Direction::Incoming | Direction::Either) {
            for &i in self.incoming.get(id).into_iter().flatten() {
                let edge = &self.edges[i];
                if allowed(edge.relationship) {
                    result.push(Adjacent {
                        neighbor: &edge.source,
                        edge_index: i,
                        relationship: edge.relationship,
                    });
                }
            }
        }

        result.sort_by(|a, b| a.neighbor.cmp(b.neighbor).then(a.edge_index.cmp(&b.edge_index)));
        result
    }

    /// Distinct neighbor ids over one relationship, ascending.
    pub fn neighbors(&self, id: &NodeId, relationship: Relationship, direction: Direction) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .adjacent(id, &[relationship], direction)
            .into_iter()
            .map(|a| a.neighbor.clone())
            .collect();
        ids.dedup();
        ids
    }

    /// Every edge whose endpoints are both in `selected`, insertion order.
    pub fn induced_edges(&self, selected: &HashSet<NodeId>) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| selected.contains(&e.source) && selected.contains(&e.target))
            .collect()
    }

    /// Dimension of attached embeddings, if any node has one.
    pub fn embedding_dimension(&self) -> Option<usize> {
        self.embedding_dimension
    }

    /// File node a node belongs to (itself for files).
    pub fn defining_file(&self, id: &NodeId) -> Option<&Node> {
        let node = self.nodes.get(id)?;
        match node.kind {
            NodeKind::File => Some(node),
            NodeKind::Function | NodeKind::Class => node
                .attr_str(attr::DEFINING_FILE)
                .and_then(|path| self.nodes.get(&NodeId::file(path))),
            NodeKind::Directory | NodeKind::Dependency => None,
        }
    }

    /// Counts by kind and relationship.
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            ..Default::default()
        };

        for kind in NodeKind::ALL {
            let count = self.by_kind.get(&kind).map(|s| s.len()).unwrap_or(0);
            stats.nodes_by_kind.insert(kind.to_string(), count);
        }
        for relationship in Relationship::ALL {
            let count = self.by_relationship.get(&relationship).map(|v| v.len()).unwrap_or(0);
            stats.edges_by_relationship.insert(relationship.to_string(), count);
        }
        for node in self.nodes.values() {
            if node.embedding.is_some() {
                stats.embedded_nodes += 1;
            }
            if node.attr_flag(attr::IS_ENTRY_POINT) {
                stats.entry_points += 1;
            }
            if node.attr_flag(attr::PARSE_FAILED) {
                stats.failed_files += 1;
            }
        }
        stats
    }
}

/// Statistics about a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub edges_by_relationship: BTreeMap<String, usize>,
    pub embedded_nodes: usize,
    pub entry_points: usize,
    pub failed_files: usize,
}

/// A graph that has completed construction.
///
/// Cloning is cheap and shares the same store; only read operations are
/// reachable, so any number of traversals may run on it concurrently.
#[derive(Debug, Clone)]
pub struct FrozenGraph {
    inner: Arc<GraphStore>,
    graph_id: Uuid,
}

impl FrozenGraph {
    pub fn graph_id(&self) -> Uuid {
        self.graph_id
    }

    /// Borrow the underlying read-only store.
    pub fn store(&self) -> &GraphStore {
        &self.inner
    }
}

impl Deref for FrozenGraph {
    type Target = GraphStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(name: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(attr::NAME.to_string(), json!(name));
        attrs
    }

    fn sample() -> GraphStore {
        let mut g = GraphStore::new();
        g.add_node(NodeId::file("a.py"), NodeKind::File, named("a.py")).unwrap();
        g.add_node(NodeId::function("a.py", "f"), NodeKind::Function, named("f")).unwrap();
        g.add_node(NodeId::function("a.py", "g"), NodeKind::Function, named("g")).unwrap();
        g
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut g = sample();
        let err = g
            .add_node(NodeId::file("a.py"), NodeKind::File, Attributes::new())
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode(NodeId::file("a.py")));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut g = sample();
        let err = g
            .add_edge(
                NodeId::function("a.py", "f"),
                NodeId::function("b.py", "h"),
                Relationship::Calls,
                Attributes::new(),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingEndpoint { missing, .. } if missing == NodeId::function("b.py", "h")));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_multigraph_keeps_parallel_edges() {
        let mut g = sample();
        let f = NodeId::function("a.py", "f");
        let gid = NodeId::function("a.py", "g");
        for line in [3, 7] {
            let mut attrs = Attributes::new();
            attrs.insert(attr::LINE.to_string(), json!(line));
            g.add_edge(f.clone(), gid.clone(), Relationship::Calls, attrs).unwrap();
        }
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.adjacent(&f, &[Relationship::Calls], Direction::Outgoing).len(), 2);
        assert_eq!(g.neighbors(&f, Relationship::Calls, Direction::Outgoing), vec![gid.clone()]);
        assert_eq!(g.neighbors(&gid, Relationship::Calls, Direction::Incoming), vec![f.clone()]);

        let lines: Vec<_> = g.edges_between(&f, &gid).iter().map(|e| e.attributes[attr::LINE].clone()).collect();
        assert_eq!(lines, vec![json!(3), json!(7)]);
        assert!(g.edges_between(&gid, &f).is_empty());
    }

    #[test]
    fn test_neighbors_either_direction_sorted() {
        let mut g = sample();
        let file = NodeId::file("a.py");
        let f = NodeId::function("a.py", "f");
        let gid = NodeId::function("a.py", "g");
        g.add_edge(file.clone(), gid.clone(), Relationship::Defines, Attributes::new()).unwrap();
        g.add_edge(file.clone(), f.clone(), Relationship::Defines, Attributes::new()).unwrap();
        g.add_edge(gid.clone(), f.clone(), Relationship::Calls, Attributes::new()).unwrap();

        let adj: Vec<_> = g
            .adjacent(&f, &[], Direction::Either)
            .into_iter()
            .map(|a| a.neighbor.clone())
            .collect();
        assert_eq!(adj, vec![file, gid]);
    }

    #[test]
    fn test_nodes_by_kind_ascending() {
        let g = sample();
        let ids: Vec<_> = g.nodes_by_kind(NodeKind::Function).map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["function:a.py:f", "function:a.py:g"]);
        assert_eq!(g.nodes_by_kind(NodeKind::Dependency).count(), 0);
    }

    #[test]
    fn test_enrichment_never_contradicts() {
        let mut g = sample();
        let file = NodeId::file("a.py");
        g.enrich_attribute(&file, attr::PARSE_FAILED, json!(true)).unwrap();
        g.enrich_attribute(&file, attr::PARSE_FAILED, json!(true)).unwrap();
        let err = g.enrich_attribute(&file, attr::PARSE_FAILED, json!(false)).unwrap_err();
        assert!(matches!(err, GraphError::AttributeConflict { .. }));
    }

    #[test]
    fn test_embedding_dimension_fixed_by_first_vector() {
        let mut g = sample();
        g.attach_embedding(&NodeId::function("a.py", "f"), vec![1.0, 0.0]).unwrap();
        let err = g
            .attach_embedding(&NodeId::function("a.py", "g"), vec![1.0, 0.0, 0.0])
            .unwrap_err();
        assert!(matches!(err, GraphError::EmbeddingDimension { expected: 2, actual: 3, .. }));
        assert_eq!(g.embedding_dimension(), Some(2));
    }

    #[test]
    fn test_find_by_name_and_stats() {
        let g = sample();
        assert_eq!(g.find_by_name("f").len(), 1);
        let stats = g.stats();
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.nodes_by_kind["function"], 2);
        assert_eq!(stats.edges_by_relationship["calls"], 0);
    }

    #[test]
    fn test_frozen_graph_shares_store() {
        let frozen = sample().freeze();
        let copy = frozen.clone();
        assert_eq!(copy.graph_id(), frozen.graph_id());
        assert_eq!(copy.node_count(), 3);
    }
}
