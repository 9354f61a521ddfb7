//! Default values for repograph configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

// ============================================================================
// Builder Defaults
// ============================================================================

/// Conventional file names that mark a program entry point.
pub const DEFAULT_ENTRY_POINT_NAMES: &[&str] = &[
    // Rust
    "main.rs",
    // Python
    "main.py",
    "__main__.py",
    "app.py",
    "manage.py",
    // Go
    "main.go",
    // JavaScript/TypeScript
    "index.js",
    "index.ts",
    "server.js",
    "server.ts",
    // JVM
    "Main.java",
    // .NET
    "Program.cs",
];

/// File stems that stand for their enclosing directory when imported.
pub const PACKAGE_INDEX_STEMS: &[&str] = &["mod", "index", "__init__"];

/// Leading specifier segments that only express relativity.
pub const RELATIVE_MARKERS: &[&str] = &[".", "..", "crate", "self", "super"];

// ============================================================================
// Traversal Defaults
// ============================================================================

/// Maximum number of distinct nodes a single walk may visit.
pub const DEFAULT_MAX_NODES: usize = 10_000;

/// Per-walk time budget in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;

// ============================================================================
// Impact Defaults
// ============================================================================

/// Depth limit of the reverse call/import walks.
pub const DEFAULT_IMPACT_DEPTH: usize = 5;

/// Transitive reference count above which impact is `high`.
pub const DEFAULT_TRANSITIVE_THRESHOLD: usize = 15;

/// Maximum number of affected node ids listed in a report.
pub const DEFAULT_AFFECTED_CAP: usize = 500;

/// Entry points within this many hops of the target force `high` impact.
pub const ENTRY_POINT_HOPS: usize = 2;

// ============================================================================
// Retrieval Defaults
// ============================================================================

/// Number of similarity seeds.
pub const DEFAULT_TOP_K: usize = 10;

/// Breadth-first context radius around each seed.
pub const DEFAULT_BFS_DEPTH: usize = 2;

/// Depth-first chain extension along calls/imports.
pub const DEFAULT_DFS_DEPTH: usize = 5;

/// Node budget of the expansion step.
pub const DEFAULT_RETRIEVAL_MAX_NODES: usize = 200;

/// Dimension of the built-in hashing embedder.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 256;

// ============================================================================
// Storage Defaults
// ============================================================================

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = ".repograph";

/// Default snapshot file name.
pub const DEFAULT_SNAPSHOT_FILE: &str = "graph.json";

/// Snapshot format version written by this build.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
