//! Unified property graph of a repository.
//!
//! One directed multigraph holds every entity the parsers report:
//!
//! - **Nodes**: `file`, `directory`, `function`, `class`, `dependency`
//! - **Edges**: `contains`, `imports`, `calls`, `inherits`, `defines`
//!
//! A [`GraphStore`] is mutated only while it is being built. Calling
//! [`GraphStore::freeze`] turns it into a [`FrozenGraph`], a shared read-only
//! handle that traversal, impact analysis and retrieval borrow.

mod error;
mod model;
mod store;

pub use error::GraphError;
pub use model::{attr, Attributes, Direction, Edge, Node, NodeId, NodeKind, Relationship};
pub use store::{Adjacent, FrozenGraph, GraphStats, GraphStore};
