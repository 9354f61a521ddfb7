//! Build report and construction diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::facts::MalformedFact;
use crate::graph::{GraphError, NodeId, NodeKind, Relationship};

/// What kind of reference failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// The called function was not found.
    Call,
    /// The function enclosing a call site was not found.
    Caller,
    Import,
    Inherit,
}

/// A non-fatal anomaly recorded while building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    DuplicateNode {
        id: NodeId,
    },
    DanglingEndpoint {
        source: NodeId,
        target: NodeId,
        relationship: Relationship,
        missing: NodeId,
    },
    UnresolvedReference {
        reference: ReferenceKind,
        file: String,
        name: String,
    },
    InvalidEdge {
        source: NodeId,
        source_kind: NodeKind,
        target: NodeId,
        target_kind: NodeKind,
        relationship: Relationship,
    },
    MalformedFact {
        source: String,
        line: usize,
        message: String,
    },
    AttributeConflict {
        id: NodeId,
        key: String,
    },
    MissingNode {
        id: NodeId,
    },
    /// An embedding whose length differs from the rest of the graph.
    EmbeddingDimension {
        id: NodeId,
        expected: usize,
        actual: usize,
    },
}

impl Diagnostic {
    /// Convert a store error into the matching diagnostic.
    pub fn from_graph_error(err: GraphError) -> Self {
        match err {
            GraphError::DuplicateNode(id) => Self::DuplicateNode { id },
            GraphError::DanglingEndpoint {
                source_id,
                target_id,
                relationship,
                missing,
            } => Self::DanglingEndpoint {
                source: source_id,
                target: target_id,
                relationship,
                missing,
            },
            GraphError::AttributeConflict { id, key } => Self::AttributeConflict { id, key },
            GraphError::NodeNotFound(id) => Self::MissingNode { id },
            GraphError::EmbeddingDimension {
                id,
                expected,
                actual,
            } => Self::EmbeddingDimension {
                id,
                expected,
                actual,
            },
        }
    }

    pub fn is_unresolved_reference(&self) -> bool {
        matches!(self, Self::UnresolvedReference { .. })
    }
}

impl From<MalformedFact> for Diagnostic {
    fn from(m: MalformedFact) -> Self {
        Self::MalformedFact {
            source: m.source,
            line: m.line,
            message: m.message,
        }
    }
}

/// A file that failed upstream parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

/// Outcome of one graph build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub graph_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub nodes_created: usize,
    pub edges_created: usize,
    pub edges_dropped: usize,
    pub files_skipped: usize,
    pub file_errors: Vec<FileError>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildReport {
    pub(crate) fn start() -> Self {
        let now = Utc::now();
        Self {
            graph_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            nodes_created: 0,
            edges_created: 0,
            edges_dropped: 0,
            files_skipped: 0,
            file_errors: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Number of unresolved call/import/inherit references.
    pub fn unresolved_references(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.is_unresolved_reference())
            .count()
    }

    /// True when the build produced no diagnostics and skipped no files.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty() && self.file_errors.is_empty()
    }
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph {}", self.graph_id)?;
        writeln!(f, "  Nodes:         {}", self.nodes_created)?;
        writeln!(f, "  Edges:         {}", self.edges_created)?;
        writeln!(f, "  Edges dropped: {}", self.edges_dropped)?;
        writeln!(f, "  Files skipped: {}", self.files_skipped)?;
        if !self.diagnostics.is_empty() {
            writeln!(f, "  Diagnostics:   {}", self.diagnostics.len())?;
            writeln!(f, "    Unresolved:  {}", self.unresolved_references())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_dimension_keeps_its_own_kind() {
        let id = NodeId::function("a.py", "run");
        let diag = Diagnostic::from_graph_error(GraphError::EmbeddingDimension {
            id: id.clone(),
            expected: 64,
            actual: 32,
        });
        assert_eq!(
            diag,
            Diagnostic::EmbeddingDimension {
                id,
                expected: 64,
                actual: 32
            }
        );

        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["kind"], "embedding_dimension");
        assert!(!diag.is_unresolved_reference());
    }

    #[test]
    fn test_attribute_conflict_maps_through() {
        let id = NodeId::file("a.py");
        let diag = Diagnostic::from_graph_error(GraphError::AttributeConflict {
            id: id.clone(),
            key: "language".to_string(),
        });
        assert!(matches!(diag, Diagnostic::AttributeConflict { key, .. } if key == "language"));
    }
}
