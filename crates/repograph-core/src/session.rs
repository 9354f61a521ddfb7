//! Ownership of the graph for one analysis session.
//!
//! Queries hold an `Arc` to the graph they started on. A rebuild produces a
//! new [`FrozenGraph`] and swaps it in whole; in-flight queries finish on the
//! old instance, which is dropped once the last of them releases it.

use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::graph::FrozenGraph;
use crate::snapshot::{load_snapshot, save_snapshot, SnapshotError, SnapshotInfo};

/// The current graph of one repository.
#[derive(Debug)]
pub struct GraphSession {
    current: RwLock<Arc<FrozenGraph>>,
}

impl GraphSession {
    pub fn new(graph: FrozenGraph) -> Self {
        Self {
            current: RwLock::new(Arc::new(graph)),
        }
    }

    /// Open a session from a saved snapshot.
    pub fn open(path: &Path) -> Result<Self, SnapshotError> {
        Ok(Self::new(load_snapshot(path)?))
    }

    /// The graph queries should run against right now.
    pub fn current(&self) -> Arc<FrozenGraph> {
        self.current.read().clone()
    }

    pub fn graph_id(&self) -> Uuid {
        self.current.read().graph_id()
    }

    /// Install a rebuilt graph and return the one it replaces.
    pub fn replace(&self, graph: FrozenGraph) -> Arc<FrozenGraph> {
        let next = Arc::new(graph);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        info!(
            previous = %previous.graph_id(),
            current = %self.graph_id(),
            "Graph replaced"
        );
        previous
    }

    /// Persist the current graph.
    pub fn save(&self, path: &Path) -> Result<SnapshotInfo, SnapshotError> {
        save_snapshot(&self.current(), path)
    }
}
