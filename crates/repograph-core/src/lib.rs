//! Code property graph of a repository.
//!
//! Parser facts go into [`builder`], which produces a [`FrozenGraph`].
//! [`traversal`], [`impact`] and [`retrieval`] answer questions about it,
//! [`export`] projects it for rendering, and [`snapshot`] persists it.

pub mod builder;
pub mod config;
pub mod export;
pub mod facts;
pub mod graph;
pub mod impact;
pub mod retrieval;
pub mod session;
pub mod snapshot;
pub mod traversal;

pub use builder::{build_graph, BuildReport, GraphBuilder};
pub use config::Config;
pub use export::{export_visual, VisualGraph};
pub use facts::{Fact, FactBatch};
pub use graph::{Direction, Edge, FrozenGraph, GraphError, GraphStore, Node, NodeId, NodeKind, Relationship};
pub use impact::{Confidence, ImpactAnalyzer, ImpactLevel, ImpactReport};
pub use retrieval::{RankedSubgraph, RetrievalQuery, Retriever};
pub use session::GraphSession;
pub use snapshot::{load_snapshot, save_snapshot, SnapshotError};
