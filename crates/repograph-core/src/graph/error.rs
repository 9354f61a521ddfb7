//! Graph store error types.

use thiserror::Error;

use super::model::{NodeId, Relationship};

/// Errors raised by graph store mutations and lookups.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// A node with this id already exists.
    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// An edge references a node that is not in the graph.
    #[error("Dangling endpoint: {source_id} -{relationship}-> {target_id} (missing {missing})")]
    DanglingEndpoint {
        source_id: NodeId,
        target_id: NodeId,
        relationship: Relationship,
        missing: NodeId,
    },

    /// Node not found.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Enrichment would contradict an existing attribute.
    #[error("Attribute conflict on {id}: '{key}' is already set to a different value")]
    AttributeConflict { id: NodeId, key: String },

    /// Embedding length differs from the graph's embedding dimension.
    #[error("Embedding dimension mismatch on {id}: expected {expected}, got {actual}")]
    EmbeddingDimension {
        id: NodeId,
        expected: usize,
        actual: usize,
    },
}
