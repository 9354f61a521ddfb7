//! Change impact estimation.
//!
//! Given a function, class, or file, the analyzer walks the graph backwards
//! to find what could break if the target changes:
//!
//! - callers, via incoming `calls` (and `inherits`, so subclasses count)
//! - importers of the target's defining file, via incoming `imports`
//!
//! The result is always a lower bound. [`Confidence`] says how much of the
//! surrounding graph the walks actually saw.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use crate::config::{
    ImpactSettings, TraversalSettings, DEFAULT_AFFECTED_CAP, DEFAULT_IMPACT_DEPTH,
    DEFAULT_MAX_NODES, DEFAULT_TIMEOUT_MS, DEFAULT_TRANSITIVE_THRESHOLD, ENTRY_POINT_HOPS,
};
use crate::graph::{attr, Direction, GraphError, GraphStore, Node, NodeId, NodeKind, Relationship};
use crate::traversal::{breadth_first, depth_first, CancelFlag, TraversalConfig, Truncation, WalkResult};

/// How far a change is likely to reach. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    /// Affected nodes stay inside the target's own file.
    Low,
    /// Affected nodes span more than one file.
    Medium,
    /// An entry point is affected or close by, or the transitive fan-in is large.
    High,
}

impl std::fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// How complete the walks behind a report were. Ordered `Low < Moderate < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// A walk was cut short, or the target's file failed to parse.
    Low,
    /// Some call site near the target never resolved.
    Moderate,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Analyzer limits.
#[derive(Debug, Clone)]
pub struct ImpactConfig {
    pub max_depth: usize,
    pub max_nodes: usize,
    /// Transitive references above this count make the impact high.
    pub transitive_threshold: usize,
    /// Maximum length of [`ImpactReport::affected`].
    pub affected_cap: usize,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelFlag>,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_IMPACT_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
            transitive_threshold: DEFAULT_TRANSITIVE_THRESHOLD,
            affected_cap: DEFAULT_AFFECTED_CAP,
            timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            cancel: None,
        }
    }
}

impl ImpactConfig {
    pub fn from_settings(impact: &ImpactSettings, traversal: &TraversalSettings) -> Self {
        Self {
            max_depth: impact.max_depth,
            max_nodes: traversal.max_nodes,
            transitive_threshold: impact.transitive_threshold,
            affected_cap: impact.affected_cap,
            timeout: traversal.timeout(),
            cancel: None,
        }
    }

    fn walk(
        &self,
        relationships: &[Relationship],
        direction: Direction,
        max_depth: usize,
        deadline: Option<Instant>,
    ) -> TraversalConfig {
        TraversalConfig {
            relationships: relationships.to_vec(),
            direction,
            max_depth,
            max_nodes: self.max_nodes,
            deadline,
            cancel: self.cancel.clone(),
        }
    }
}

/// Estimated blast radius of changing one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub target: NodeId,
    pub level: ImpactLevel,
    pub confidence: Confidence,
    /// Functions calling the target directly.
    pub direct_callers: Vec<NodeId>,
    /// Files importing the target's defining file directly.
    pub importing_files: Vec<NodeId>,
    /// Affected nodes that are neither direct callers nor importing files.
    pub transitive_references: usize,
    /// Every affected node, nearest first, capped.
    pub affected: Vec<NodeId>,
    pub affected_truncated: bool,
    /// Set when a walk stopped on its node budget, deadline, or cancellation.
    pub truncated: Option<Truncation>,
    /// Set when some chain continued past the depth limit.
    pub depth_limit_reached: bool,
    /// Hops from the nearest entry point, when one was found.
    pub entry_point_distance: Option<usize>,
}

impl ImpactReport {
    pub fn is_empty(&self) -> bool {
        self.affected.is_empty()
    }
}

/// Forward dependencies of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub target: NodeId,
    /// Reached in one hop.
    pub direct: Vec<NodeId>,
    /// Reached in two or more hops, nearest first.
    pub transitive: Vec<NodeId>,
    pub truncated: Option<Truncation>,
    pub depth_limit_reached: bool,
}

/// Analyze impact with default limits.
pub fn analyze_impact(
    graph: &GraphStore,
    target: &NodeId,
    max_depth: Option<usize>,
) -> Result<ImpactReport, GraphError> {
    ImpactAnalyzer::default().analyze(graph, target, max_depth)
}

/// Collect forward dependencies with default limits.
pub fn analyze_dependencies(
    graph: &GraphStore,
    target: &NodeId,
    max_depth: Option<usize>,
) -> Result<DependencyReport, GraphError> {
    ImpactAnalyzer::default().dependencies(graph, target, max_depth)
}

#[derive(Debug, Clone, Default)]
pub struct ImpactAnalyzer {
    config: ImpactConfig,
}

impl ImpactAnalyzer {
    pub fn new(config: ImpactConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    /// Estimate what is affected if `target` changes.
    ///
    /// Fails only when `target` is not in the graph; an empty blast radius is
    /// a normal, low-impact result.
    #[instrument(skip(self, graph))]
    pub fn analyze(
        &self,
        graph: &GraphStore,
        target: &NodeId,
        max_depth: Option<usize>,
    ) -> Result<ImpactReport, GraphError> {
        let node = graph
            .node(target)
            .ok_or_else(|| GraphError::NodeNotFound(target.clone()))?;
        let depth = max_depth.unwrap_or(self.config.max_depth);
        let deadline = self.config.timeout.and_then(|t| Instant::now().checked_add(t));

        let seeds = expand_target(graph, node);
        let files = defining_files(graph, node, &seeds);

        let calls = depth_first(
            graph,
            &seeds,
            &self.config.walk(
                &[Relationship::Calls, Relationship::Inherits],
                Direction::Incoming,
                depth,
                deadline,
            ),
        );
        let imports = depth_first(
            graph,
            &files,
            &self.config.walk(&[Relationship::Imports], Direction::Incoming, depth, deadline),
        );

        let mut direct_callers: Vec<NodeId> = calls
            .at_distance(1)
            .filter(|v| is_kind(graph, &v.node, NodeKind::Function))
            .map(|v| v.node.clone())
            .collect();
        direct_callers.sort();
        let mut importing_files: Vec<NodeId> = imports.at_distance(1).map(|v| v.node.clone()).collect();
        importing_files.sort();

        // Nearest distance per affected node across both walks.
        let origin: BTreeSet<&NodeId> = seeds.iter().chain(files.iter()).collect();
        let mut nearest: BTreeMap<&NodeId, usize> = BTreeMap::new();
        for visit in calls.visits.iter().chain(imports.visits.iter()) {
            if origin.contains(&visit.node) {
                continue;
            }
            let slot = nearest.entry(&visit.node).or_insert(visit.distance);
            *slot = (*slot).min(visit.distance);
        }
        let mut affected: Vec<(&NodeId, usize)> = nearest.into_iter().collect();
        affected.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let direct: BTreeSet<&NodeId> = direct_callers.iter().chain(importing_files.iter()).collect();
        let transitive_references = affected.iter().filter(|(id, _)| !direct.contains(id)).count();

        let entry_point_distance = self.entry_point_distance(graph, &seeds, &affected, deadline);
        let level = if entry_point_distance.is_some_and(|d| d <= ENTRY_POINT_HOPS)
            || affected.iter().any(|(id, _)| is_entry_point(graph, id))
            || transitive_references > self.config.transitive_threshold
        {
            ImpactLevel::High
        } else if spans_files(graph, node, &affected) {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        };

        let confidence = confidence(graph, node, &seeds, &affected, &[&calls, &imports]);

        let affected_truncated = affected.len() > self.config.affected_cap;
        let affected: Vec<NodeId> = affected
            .into_iter()
            .take(self.config.affected_cap)
            .map(|(id, _)| id.clone())
            .collect();

        debug!(%level, %confidence, affected = affected.len(), "Impact analyzed");
        Ok(ImpactReport {
            target: target.clone(),
            level,
            confidence,
            direct_callers,
            importing_files,
            transitive_references,
            affected,
            affected_truncated,
            truncated: calls.truncated.or(imports.truncated),
            depth_limit_reached: calls.depth_limit_reached || imports.depth_limit_reached,
            entry_point_distance,
        })
    }

    /// Hops between the target and the nearest entry point.
    ///
    /// A short reverse walk over `calls`, `imports`, `defines` and `inherits`
    /// finds entry points close to the target; affected entry points found by
    /// the longer walks count too.
    fn entry_point_distance(
        &self,
        graph: &GraphStore,
        seeds: &[NodeId],
        affected: &[(&NodeId, usize)],
        deadline: Option<Instant>,
    ) -> Option<usize> {
        let near = breadth_first(
            graph,
            seeds,
            &self.config.walk(
                &[Relationship::Calls, Relationship::Imports, Relationship::Defines, Relationship::Inherits],
                Direction::Incoming,
                ENTRY_POINT_HOPS,
                deadline,
            ),
        );
        let close = near
            .visits
            .iter()
            .filter(|v| is_entry_point(graph, &v.node))
            .map(|v| v.distance);
        let far = affected
            .iter()
            .filter(|(id, _)| is_entry_point(graph, id))
            .map(|&(_, d)| d);
        close.chain(far).min()
    }

    /// What `target` depends on: forward `calls`, `imports` and `inherits`.
    #[instrument(skip(self, graph))]
    pub fn dependencies(
        &self,
        graph: &GraphStore,
        target: &NodeId,
        max_depth: Option<usize>,
    ) -> Result<DependencyReport, GraphError> {
        let node = graph
            .node(target)
            .ok_or_else(|| GraphError::NodeNotFound(target.clone()))?;
        let depth = max_depth.unwrap_or(self.config.max_depth);
        let deadline = self.config.timeout.and_then(|t| Instant::now().checked_add(t));

        let seeds = expand_target(graph, node);
        let mut origin = seeds.clone();
        origin.extend(defining_files(graph, node, &seeds));

        let walk = depth_first(
            graph,
            &origin,
            &self.config.walk(
                &[Relationship::Calls, Relationship::Imports, Relationship::Inherits],
                Direction::Outgoing,
                depth,
                deadline,
            ),
        );

        let mut reached: Vec<(&NodeId, usize)> = walk
            .visits
            .iter()
            .filter(|v| v.distance > 0)
            .map(|v| (&v.node, v.distance))
            .collect();
        reached.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let (direct, transitive): (Vec<_>, Vec<_>) = reached.into_iter().partition(|(_, d)| *d == 1);
        Ok(DependencyReport {
            target: target.clone(),
            direct: direct.into_iter().map(|(id, _)| id.clone()).collect(),
            transitive: transitive.into_iter().map(|(id, _)| id.clone()).collect(),
            truncated: walk.truncated,
            depth_limit_reached: walk.depth_limit_reached,
        })
    }
}

/// Nodes whose change a target stands for.
///
/// A class includes its methods; a file includes everything it defines.
fn expand_target(graph: &GraphStore, node: &Node) -> Vec<NodeId> {
    let mut seeds = vec![node.id.clone()];
    match node.kind {
        NodeKind::Class => {
            let qualified = node.attr_str(attr::QUALIFIED_NAME).unwrap_or_else(|| node.name());
            if let Some(file) = graph.defining_file(&node.id) {
                seeds.extend(
                    graph
                        .neighbors(&file.id, Relationship::Defines, Direction::Outgoing)
                        .into_iter()
                        .filter(|id| {
                            graph.node(id).is_some_and(|n| {
                                n.kind == NodeKind::Function && n.attr_str(attr::PARENT_CLASS) == Some(qualified)
                            })
                        }),
                );
            }
        }
        NodeKind::File => {
            seeds.extend(graph.neighbors(&node.id, Relationship::Defines, Direction::Outgoing));
        }
        NodeKind::Function | NodeKind::Directory | NodeKind::Dependency => {}
    }
    seeds.sort();
    seeds.dedup();
    seeds
}

/// Start nodes for the import walk.
fn defining_files(graph: &GraphStore, node: &Node, seeds: &[NodeId]) -> Vec<NodeId> {
    match node.kind {
        NodeKind::Directory | NodeKind::Dependency => vec![node.id.clone()],
        _ => {
            let files: BTreeSet<NodeId> = seeds
                .iter()
                .filter_map(|id| graph.defining_file(id))
                .map(|f| f.id.clone())
                .collect();
            files.into_iter().collect()
        }
    }
}

fn is_kind(graph: &GraphStore, id: &NodeId, kind: NodeKind) -> bool {
    graph.node(id).is_some_and(|n| n.kind == kind)
}

/// A file tagged `isEntryPoint`, or a definition inside one.
pub fn is_entry_point(graph: &GraphStore, id: &NodeId) -> bool {
    graph
        .defining_file(id)
        .is_some_and(|file| file.attr_flag(attr::IS_ENTRY_POINT))
}

fn spans_files(graph: &GraphStore, target: &Node, affected: &[(&NodeId, usize)]) -> bool {
    let own = graph.defining_file(&target.id).map(|f| &f.id);
    let mut files: BTreeSet<&NodeId> = own.into_iter().collect();
    for (id, _) in affected {
        match graph.node(id).map(|n| n.kind) {
            Some(NodeKind::Directory) | Some(NodeKind::Dependency) => {
                files.insert(*id);
            }
            _ => {
                if let Some(file) = graph.defining_file(id) {
                    files.insert(&file.id);
                }
            }
        }
        if files.len() > 1 {
            return true;
        }
    }
    false
}

fn confidence(
    graph: &GraphStore,
    target: &Node,
    seeds: &[NodeId],
    affected: &[(&NodeId, usize)],
    walks: &[&WalkResult],
) -> Confidence {
    let incomplete = walks.iter().any(|w| w.is_truncated() || w.depth_limit_reached);
    let parse_failed = graph
        .defining_file(&target.id)
        .is_some_and(|f| f.attr_flag(attr::PARSE_FAILED));
    if incomplete || parse_failed {
        return Confidence::Low;
    }

    let unresolved = seeds
        .iter()
        .chain(affected.iter().map(|(id, _)| *id))
        .filter_map(|id| graph.node(id))
        .any(|n| n.attr_u64(attr::UNRESOLVED_CALLS).unwrap_or(0) > 0);
    if unresolved {
        Confidence::Moderate
    } else {
        Confidence::High
    }
}
