//! Facts reported by upstream parsers.
//!
//! A fact is one unit of extracted information: a file, a definition, a call
//! site, an import, an inheritance declaration, or a manifest entry. Files
//! that failed to parse never contribute facts; they show up as
//! [`ParseFailure`] records instead.

mod reader;

pub use reader::{read_fact_stream, FactError};

use serde::{Deserialize, Serialize};

/// A single parser fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fact {
    File(FileFact),
    Definition(DefinitionFact),
    Call(CallFact),
    Import(ImportFact),
    Inherit(InheritFact),
    Manifest(ManifestFact),
}

impl Fact {
    /// Fact type name for display.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Definition(_) => "definition",
            Self::Call(_) => "call",
            Self::Import(_) => "import",
            Self::Inherit(_) => "inherit",
            Self::Manifest(_) => "manifest",
        }
    }
}

/// A source file that was parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFact {
    /// Repository-relative path with `/` separators.
    pub path: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Kind of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Function,
    Class,
}

/// A function, method, or class definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionFact {
    /// File the definition lives in.
    pub file: String,
    pub name: String,
    pub kind: DefinitionKind,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub return_type: Option<String>,
    /// Enclosing class for methods.
    #[serde(default)]
    pub parent_class: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub doc: Option<String>,
}

impl DefinitionFact {
    /// `Class.method` for methods, the plain name otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.parent_class {
            Some(parent) => format!("{}.{}", parent, self.name),
            None => self.name.clone(),
        }
    }
}

/// A call site inside a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFact {
    /// File containing the call site.
    pub file: String,
    /// Enclosing function (simple or qualified name).
    pub caller: String,
    /// Called name as written.
    pub callee: String,
    /// File defining the callee, when the parser could tell.
    #[serde(default)]
    pub callee_file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

/// An import statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportFact {
    /// Importing file.
    pub file: String,
    /// Module specifier as written (`./utils`, `app.models`, `serde::Deserialize`).
    pub module: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

/// A class inheritance declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InheritFact {
    pub file: String,
    pub class: String,
    pub base: String,
    #[serde(default)]
    pub base_file: Option<String>,
}

/// Project manifest information (entry points, declared dependencies).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestFact {
    #[serde(default)]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DeclaredDependency>,
}

/// An external dependency declared in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A file the upstream parser could not process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub path: String,
    pub error: String,
}

/// A fact-stream line that could not be decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedFact {
    /// Source name (file path or label) the line came from.
    pub source: String,
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

/// Facts gathered by one worker.
///
/// Workers fill private batches concurrently; the builder merges them on a
/// single thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactBatch {
    pub facts: Vec<Fact>,
    pub failures: Vec<ParseFailure>,
    pub malformed: Vec<MalformedFact>,
}

impl FactBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fact: Fact) {
        self.facts.push(fact);
    }

    pub fn fail(&mut self, path: impl Into<String>, error: impl Into<String>) {
        self.failures.push(ParseFailure {
            path: path.into(),
            error: error.into(),
        });
    }

    /// Append another batch.
    pub fn merge(&mut self, other: FactBatch) {
        self.facts.extend(other.facts);
        self.failures.extend(other.failures);
        self.malformed.extend(other.malformed);
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.failures.is_empty() && self.malformed.is_empty()
    }
}

impl FromIterator<Fact> for FactBatch {
    fn from_iter<I: IntoIterator<Item = Fact>>(iter: I) -> Self {
        Self {
            facts: iter.into_iter().collect(),
            ..Default::default()
        }
    }
}
