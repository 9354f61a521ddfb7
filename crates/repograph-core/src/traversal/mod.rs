//! Bounded graph walks shared by impact analysis and retrieval.
//!
//! Both primitives take a seed set and a [`TraversalConfig`] and never fail:
//! when the node budget, the deadline, or a cancellation stops a walk early,
//! the nodes visited so far are returned with [`WalkResult::truncated`] set.
//! Neighbours are expanded in ascending id order, so the same graph and
//! config always yield the same visit sequence.

mod hybrid;

pub use hybrid::{hybrid, HybridConfig, HybridResult, TaggedNode};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{DEFAULT_DFS_DEPTH, DEFAULT_MAX_NODES};
use crate::graph::{Direction, GraphStore, NodeId, Relationship};

/// Shared cancellation signal for in-flight walks.
///
/// Clones observe the same flag; walks poll it before every node visit.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits and filters for one walk.
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Relationships to follow; empty follows all of them.
    pub relationships: Vec<Relationship>,
    pub direction: Direction,
    /// Maximum number of edges from the nearest seed.
    pub max_depth: usize,
    /// Maximum number of distinct nodes visited.
    pub max_nodes: usize,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelFlag>,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            relationships: Vec::new(),
            direction: Direction::Outgoing,
            max_depth: DEFAULT_DFS_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
            deadline: None,
            cancel: None,
        }
    }
}

impl TraversalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relationships(mut self, relationships: impl Into<Vec<Relationship>>) -> Self {
        self.relationships = relationships.into();
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the deadline to `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now().checked_add(timeout))
    }

    pub fn cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }
}

/// The edge a node was first reached through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub from: NodeId,
    pub relationship: Relationship,
    pub edge_index: usize,
}

/// One visited node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub node: NodeId,
    /// Edges from the nearest seed.
    pub distance: usize,
    /// `None` for seeds.
    pub via: Option<EdgeRef>,
}

/// Why a walk stopped before exhausting its reachable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    NodeBudget,
    Deadline,
    Cancelled,
}

impl std::fmt::Display for Truncation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeBudget => write!(f, "truncated by node budget"),
            Self::Deadline => write!(f, "truncated by deadline"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a walk. Partial results are kept when `truncated` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkResult {
    /// Visited nodes in visit order, each listed once.
    pub visits: Vec<Visit>,
    pub truncated: Option<Truncation>,
    /// Some edge was left unexplored because it lay beyond `max_depth`.
    pub depth_limit_reached: bool,
}

impl WalkResult {
    pub fn is_truncated(&self) -> bool {
        self.truncated.is_some()
    }

    pub fn len(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.visits.iter().any(|v| &v.node == id)
    }

    pub fn distance_of(&self, id: &NodeId) -> Option<usize> {
        self.visits.iter().find(|v| &v.node == id).map(|v| v.distance)
    }

    /// Visited node ids in visit order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.visits.iter().map(|v| &v.node)
    }

    /// Visits at exactly `distance`.
    pub fn at_distance(&self, distance: usize) -> impl Iterator<Item = &Visit> + '_ {
        self.visits.iter().filter(move |v| v.distance == distance)
    }
}

/// Book-keeping shared by both walks.
struct Walk<'a> {
    config: &'a TraversalConfig,
    result: WalkResult,
    index: HashMap<NodeId, usize>,
}

impl<'a> Walk<'a> {
    fn new(config: &'a TraversalConfig) -> Self {
        Self {
            config,
            result: WalkResult::default(),
            index: HashMap::new(),
        }
    }

    /// Check the deadline and cancellation flag; records the reason on stop.
    fn interrupted(&mut self) -> bool {
        if self.result.truncated.is_some() {
            return true;
        }
        let reason = if self.config.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            Some(Truncation::Cancelled)
        } else if self.config.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Truncation::Deadline)
        } else {
            None
        };
        self.result.truncated = reason;
        reason.is_some()
    }

    fn distance(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).map(|&i| self.result.visits[i].distance)
    }

    /// Record a first visit. Returns false (and marks truncation) when a
    /// limit forbids it.
    fn admit(&mut self, node: NodeId, distance: usize, via: Option<EdgeRef>) -> bool {
        if self.interrupted() {
            return false;
        }
        if self.result.visits.len() >= self.config.max_nodes {
            self.result.truncated = Some(Truncation::NodeBudget);
            return false;
        }
        self.index.insert(node.clone(), self.result.visits.len());
        self.result.visits.push(Visit { node, distance, via });
        true
    }

    /// Existing seeds, deduplicated and ascending.
    fn seeds(graph: &GraphStore, seeds: &[NodeId]) -> Vec<NodeId> {
        let mut known: Vec<NodeId> = seeds
            .iter()
            .filter(|id| {
                let present = graph.contains_node(id);
                if !present {
                    debug!(seed = %id, "Skipping unknown seed");
                }
                present
            })
            .cloned()
            .collect();
        known.sort();
        known.dedup();
        known
    }
}

/// Depth-first walk from `seeds`.
///
/// Pre-order and iterative. Depth is counted from the nearest seed: a node
/// reached again by a strictly shorter path has its depth lowered and is
/// expanded again, so the depth limit applies to the shortest path found.
pub fn depth_first(graph: &GraphStore, seeds: &[NodeId], config: &TraversalConfig) -> WalkResult {
    let mut walk = Walk::new(config);
    let mut stack: Vec<(NodeId, usize, Option<EdgeRef>)> = Walk::seeds(graph, seeds)
        .into_iter()
        .rev()
        .map(|id| (id, 0, None))
        .collect();
    // neighbours cut off at the limit; some may still be reached by a shorter path
    let mut beyond: HashSet<NodeId> = HashSet::new();

    while let Some((node, depth, via)) = stack.pop() {
        match walk.index.get(&node).copied() {
            Some(i) if walk.result.visits[i].distance <= depth => continue,
            Some(i) => {
                if walk.interrupted() {
                    break;
                }
                let visit = &mut walk.result.visits[i];
                visit.distance = depth;
                visit.via = via;
            }
            None => {
                if !walk.admit(node.clone(), depth, via) {
                    break;
                }
            }
        }

        let adjacent = graph.adjacent(&node, &config.relationships, config.direction);
        if depth >= config.max_depth {
            beyond.extend(
                adjacent
                    .iter()
                    .filter(|a| !walk.index.contains_key(a.neighbor))
                    .map(|a| a.neighbor.clone()),
            );
            continue;
        }

        for a in adjacent.iter().rev() {
            if walk.distance(a.neighbor).is_some_and(|d| d <= depth + 1) {
                continue;
            }
            stack.push((
                a.neighbor.clone(),
                depth + 1,
                Some(EdgeRef {
                    from: node.clone(),
                    relationship: a.relationship,
                    edge_index: a.edge_index,
                }),
            ));
        }
    }

    walk.result.depth_limit_reached = beyond.iter().any(|id| !walk.index.contains_key(id));
    walk.result
}

/// Breadth-first walk from `seeds`.
///
/// Visits are yielded in non-decreasing distance order; each visit carries
/// the edge it was discovered through for path reconstruction.
pub fn breadth_first(graph: &GraphStore, seeds: &[NodeId], config: &TraversalConfig) -> WalkResult {
    let mut walk = Walk::new(config);
    let mut queue = VecDeque::new();

    for seed in Walk::seeds(graph, seeds) {
        if !walk.admit(seed.clone(), 0, None) {
            return walk.result;
        }
        queue.push_back((seed, 0));
    }

    'outer: while let Some((node, depth)) = queue.pop_front() {
        if walk.interrupted() {
            break;
        }

        let adjacent = graph.adjacent(&node, &config.relationships, config.direction);
        if depth >= config.max_depth {
            if adjacent.iter().any(|a| !walk.index.contains_key(a.neighbor)) {
                walk.result.depth_limit_reached = true;
            }
            continue;
        }

        for a in adjacent {
            if walk.index.contains_key(a.neighbor) {
                continue;
            }
            let via = EdgeRef {
                from: node.clone(),
                relationship: a.relationship,
                edge_index: a.edge_index,
            };
            if !walk.admit(a.neighbor.clone(), depth + 1, Some(via)) {
                break 'outer;
            }
            queue.push_back((a.neighbor.clone(), depth + 1));
        }
    }

    walk.result
}

/// Reconstruct the path from a seed to `target` using a walk's `via` links.
///
/// Returns node ids from the seed to `target`, or `None` if `target` was not
/// visited.
pub fn path_to(result: &WalkResult, target: &NodeId) -> Option<Vec<NodeId>> {
    let by_node: HashMap<&NodeId, &Visit> = result.visits.iter().map(|v| (&v.node, v)).collect();
    let mut path = vec![target.clone()];
    let mut current = *by_node.get(target)?;
    while let Some(via) = &current.via {
        path.push(via.from.clone());
        current = *by_node.get(&via.from)?;
        if path.len() > result.visits.len() {
            return None;
        }
    }
    path.reverse();
    Some(path)
}
