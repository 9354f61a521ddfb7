//! Snapshot persistence for frozen graphs.
//!
//! A snapshot is a single JSON document:
//!
//! ```text
//! {
//!   "format_version": 1,
//!   "graph_id": "…",
//!   "created_at": "…",
//!   "checksum": "<sha256 hex of the node+edge body>",
//!   "nodes": [...],
//!   "edges": [...]
//! }
//! ```
//!
//! Writes go to `<path>.tmp` and are renamed into place, so a reader never
//! sees a half-written snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::SNAPSHOT_FORMAT_VERSION;
use crate::graph::{Edge, FrozenGraph, GraphError, GraphStore, Node};

/// Errors that can occur while saving or loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot checksum mismatch at {path}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Unsupported snapshot format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Snapshot does not describe a valid graph: {0}")]
    Graph(#[from] GraphError),
}

impl SnapshotError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The checksummed part of a snapshot.
#[derive(Serialize)]
struct SnapshotBody<'a> {
    nodes: &'a [Node],
    edges: &'a [Edge],
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    format_version: u32,
    graph_id: Uuid,
    created_at: DateTime<Utc>,
    checksum: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl SnapshotFile {
    fn body(&self) -> SnapshotBody<'_> {
        SnapshotBody {
            nodes: &self.nodes,
            edges: &self.edges,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotHeader {
    format_version: u32,
}

/// Summary of a snapshot that was written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub graph_id: Uuid,
    pub checksum: String,
    pub nodes: usize,
    pub edges: usize,
}

fn body_checksum(body: &SnapshotBody<'_>) -> Result<String, SnapshotError> {
    let bytes = serde_json::to_vec(body)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Persist a frozen graph, atomically replacing any snapshot at `path`.
#[instrument(skip(graph), fields(graph_id = %graph.graph_id()))]
pub fn save_snapshot(graph: &FrozenGraph, path: &Path) -> Result<SnapshotInfo, SnapshotError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| SnapshotError::io(dir, e))?;
        }
    }

    let mut file = SnapshotFile {
        format_version: SNAPSHOT_FORMAT_VERSION,
        graph_id: graph.graph_id(),
        created_at: Utc::now(),
        checksum: String::new(),
        nodes: graph.nodes().cloned().collect(),
        edges: graph.edges().to_vec(),
    };
    file.checksum = body_checksum(&file.body())?;
    let json = serde_json::to_vec(&file)?;

    let tmp = temp_path(path);
    {
        let mut out = fs::File::create(&tmp).map_err(|e| SnapshotError::io(&tmp, e))?;
        out.write_all(&json).map_err(|e| SnapshotError::io(&tmp, e))?;
        out.sync_all().map_err(|e| SnapshotError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| SnapshotError::io(path, e))?;

    info!(
        path = %path.display(),
        nodes = file.nodes.len(),
        edges = file.edges.len(),
        "Snapshot saved"
    );

    Ok(SnapshotInfo {
        path: path.to_path_buf(),
        graph_id: file.graph_id,
        nodes: file.nodes.len(),
        edges: file.edges.len(),
        checksum: file.checksum,
    })
}

/// Load a snapshot written by [`save_snapshot`].
///
/// The restored graph keeps the saved graph id.
#[instrument]
pub fn load_snapshot(path: &Path) -> Result<FrozenGraph, SnapshotError> {
    let json = fs::read_to_string(path).map_err(|e| SnapshotError::io(path, e))?;

    let header: SnapshotHeader = serde_json::from_str(&json)?;
    if header.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: header.format_version,
            expected: SNAPSHOT_FORMAT_VERSION,
        });
    }

    let file: SnapshotFile = serde_json::from_str(&json)?;
    let actual = body_checksum(&file.body())?;
    if actual != file.checksum {
        return Err(SnapshotError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: file.checksum,
            actual,
        });
    }

    let mut store = GraphStore::new();
    for node in file.nodes {
        store.add_node(node.id.clone(), node.kind, node.attributes)?;
        if let Some(embedding) = node.embedding {
            store.attach_embedding(&node.id, embedding)?;
        }
    }
    for edge in file.edges {
        store.add_edge(edge.source, edge.target, edge.relationship, edge.attributes)?;
    }

    info!(
        path = %path.display(),
        nodes = store.node_count(),
        edges = store.edge_count(),
        "Snapshot loaded"
    );
    Ok(store.freeze_with_id(file.graph_id))
}
