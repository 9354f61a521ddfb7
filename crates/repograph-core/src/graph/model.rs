//! Node and edge types of the unified code graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map carried by nodes and edges.
///
/// A `BTreeMap` keeps serialization order stable across rebuilds.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Well-known attribute keys.
pub mod attr {
    pub const NAME: &str = "name";
    pub const PATH: &str = "path";
    pub const EXTENSION: &str = "extension";
    pub const LANGUAGE: &str = "language";
    pub const SIZE: &str = "size";
    pub const QUALIFIED_NAME: &str = "qualifiedName";
    pub const DEFINING_FILE: &str = "definingFile";
    pub const LINE_NUMBER: &str = "lineNumber";
    pub const PARAMETERS: &str = "parameters";
    pub const RETURN_TYPE: &str = "returnType";
    pub const PARENT_CLASS: &str = "parentClass";
    pub const SIGNATURE: &str = "signature";
    pub const DOC: &str = "doc";
    pub const VERSION: &str = "version";
    pub const IS_EXTERNAL: &str = "isExternal";
    pub const IS_ENTRY_POINT: &str = "isEntryPoint";
    pub const IMPLICIT: &str = "implicit";
    pub const PARSE_FAILED: &str = "parseFailed";
    pub const UNRESOLVED_CALLS: &str = "unresolvedCalls";
    pub const LINE: &str = "line";
    pub const ALIAS: &str = "alias";
    pub const SPECIFIER: &str = "specifier";
}

/// Stable node identifier, unique within one graph instance.
///
/// Identifiers are derived from content (`function:src/auth.py:login`), so
/// building the same facts twice yields the same ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn file(path: &str) -> Self {
        Self(format!("file:{}", path))
    }

    pub fn directory(path: &str) -> Self {
        Self(format!("dir:{}", path))
    }

    pub fn function(file: &str, qualified_name: &str) -> Self {
        Self(format!("function:{}:{}", file, qualified_name))
    }

    pub fn class(file: &str, qualified_name: &str) -> Self {
        Self(format!("class:{}:{}", file, qualified_name))
    }

    pub fn dependency(package: &str) -> Self {
        Self(format!("dependency:{}", package))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Category of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
    Function,
    Class,
    Dependency,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        NodeKind::File,
        NodeKind::Directory,
        NodeKind::Function,
        NodeKind::Class,
        NodeKind::Dependency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Function => "function",
            Self::Class => "class",
            Self::Dependency => "dependency",
        }
    }

    /// Whether this kind carries a `definingFile` attribute.
    pub fn is_definition(&self) -> bool {
        matches!(self, Self::Function | Self::Class)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "directory" | "dir" => Ok(Self::Directory),
            "function" | "fn" => Ok(Self::Function),
            "class" => Ok(Self::Class),
            "dependency" | "dep" => Ok(Self::Dependency),
            other => Err(format!("unknown node kind '{}'", other)),
        }
    }
}

/// Category of a directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Contains,
    Imports,
    Calls,
    Inherits,
    Defines,
}

impl Relationship {
    pub const ALL: [Relationship; 5] = [
        Relationship::Contains,
        Relationship::Imports,
        Relationship::Calls,
        Relationship::Inherits,
        Relationship::Defines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Imports => "imports",
            Self::Calls => "calls",
            Self::Inherits => "inherits",
            Self::Defines => "defines",
        }
    }

    /// Whether an edge of this relationship may join `source` to `target`.
    ///
    /// `imports` also accepts internal file and package (directory) targets,
    /// which is how resolved internal imports are represented.
    pub fn allows(&self, source: NodeKind, target: NodeKind) -> bool {
        use NodeKind::*;
        match self {
            Self::Defines => source == File && matches!(target, Function | Class),
            Self::Contains => source == Directory && matches!(target, File | Directory),
            Self::Imports => source == File && matches!(target, Dependency | File | Directory),
            Self::Calls => source == Function && target == Function,
            Self::Inherits => source == Class && target == Class,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "imports" => Ok(Self::Imports),
            "calls" => Ok(Self::Calls),
            "inherits" => Ok(Self::Inherits),
            "defines" => Ok(Self::Defines),
            other => Err(format!("unknown relationship '{}'", other)),
        }
    }
}

/// Direction of adjacency relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Either,
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, attributes: Attributes) -> Self {
        Self {
            id,
            kind,
            attributes,
            embedding: None,
        }
    }

    /// String attribute lookup.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Boolean attribute lookup; absent means `false`.
    pub fn attr_flag(&self, key: &str) -> bool {
        self.attributes
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Integer attribute lookup.
    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attributes.get(key).and_then(|v| v.as_u64())
    }

    /// Display name: the `name` attribute, falling back to the id.
    pub fn name(&self) -> &str {
        self.attr_str(attr::NAME).unwrap_or_else(|| self.id.as_str())
    }

    /// Path of the file this node lives in, if any.
    pub fn file_path(&self) -> Option<&str> {
        match self.kind {
            NodeKind::File => self.attr_str(attr::PATH),
            NodeKind::Function | NodeKind::Class => self.attr_str(attr::DEFINING_FILE),
            NodeKind::Directory | NodeKind::Dependency => None,
        }
    }
}

/// A directed, typed edge. Parallel edges are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub relationship: Relationship,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId, relationship: Relationship) -> Self {
        Self {
            source,
            target,
            relationship,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_constructors() {
        assert_eq!(NodeId::file("src/main.rs").as_str(), "file:src/main.rs");
        assert_eq!(
            NodeId::function("src/auth.py", "Auth.login").as_str(),
            "function:src/auth.py:Auth.login"
        );
        assert_eq!(NodeId::dependency("serde").as_str(), "dependency:serde");
    }

    #[test]
    fn test_relationship_endpoint_rules() {
        use NodeKind::*;
        assert!(Relationship::Defines.allows(File, Function));
        assert!(!Relationship::Defines.allows(Directory, Function));
        assert!(Relationship::Contains.allows(Directory, Directory));
        assert!(!Relationship::Contains.allows(File, Function));
        assert!(Relationship::Imports.allows(File, Dependency));
        assert!(!Relationship::Imports.allows(Function, Dependency));
        assert!(Relationship::Calls.allows(Function, Function));
        assert!(!Relationship::Calls.allows(Class, Function));
        assert!(Relationship::Inherits.allows(Class, Class));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("fn".parse::<NodeKind>(), Ok(NodeKind::Function));
        assert_eq!("Calls".parse::<Relationship>(), Ok(Relationship::Calls));
        assert!("module".parse::<NodeKind>().is_err());
    }

    #[test]
    fn test_node_serializes_kind_snake_case() {
        let node = Node::new(NodeId::file("a.py"), NodeKind::File, Attributes::new());
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "file");
        assert!(json.get("embedding").is_none());
    }
}
