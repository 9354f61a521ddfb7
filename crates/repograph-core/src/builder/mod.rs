//! Graph construction from parser facts.
//!
//! Construction runs in two passes over the merged fact batches:
//!
//! 1. **Nodes**: files, ancestor directories, definitions, and external
//!    dependencies discovered while resolving imports.
//! 2. **Edges**: `contains`, `defines`, `imports`, `calls`, `inherits`, each
//!    endpoint resolved against the node index built in pass 1.
//!
//! Nothing in a fact stream aborts a build. Anomalies become [`Diagnostic`]s
//! in the [`BuildReport`] and the offending edge or node is dropped.

mod report;
mod resolve;

pub use report::{BuildReport, Diagnostic, FileError, ReferenceKind};

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::BufRead;
use tracing::{debug, info};

use crate::config::{BuilderConfig, PACKAGE_INDEX_STEMS};
use crate::facts::{
    read_fact_stream, CallFact, DefinitionFact, DefinitionKind, Fact, FactBatch, FactError,
    FileFact, ImportFact, InheritFact, MalformedFact, ParseFailure,
};
use crate::graph::{attr, Attributes, Edge, FrozenGraph, GraphStore, Node, NodeId, NodeKind, Relationship};

use resolve::{
    ancestor_dirs, common_dir_prefix, extension, external_package_name, file_name, file_stem,
    normalize_path, parent_dir, specifier_segments, split_callee, ModuleIndex,
};

/// Build a frozen graph from fact batches gathered by any number of workers.
pub fn build_graph<I>(batches: I, config: &BuilderConfig) -> (FrozenGraph, BuildReport)
where
    I: IntoIterator<Item = FactBatch>,
{
    let mut builder = GraphBuilder::new(config.clone());
    for batch in batches {
        builder.ingest(batch);
    }
    let (store, report) = builder.build();
    let graph = store.freeze_with_id(report.graph_id);
    (graph, report)
}

/// Read JSON-lines fact sources and build a frozen graph from them.
///
/// Fails only when a source cannot be read at all.
pub fn build_graph_from_readers<I, R>(
    sources: I,
    config: &BuilderConfig,
) -> Result<(FrozenGraph, BuildReport), FactError>
where
    I: IntoIterator<Item = (String, R)>,
    R: BufRead,
{
    let mut batches = Vec::new();
    for (name, reader) in sources {
        batches.push(read_fact_stream(&name, reader)?);
    }
    Ok(build_graph(batches, config))
}

/// Single-writer stage of graph construction.
///
/// Workers produce [`FactBatch`]es independently; the builder merges them and
/// is the only code that ever mutates the [`GraphStore`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    config: BuilderConfig,
    files: Vec<FileFact>,
    definitions: Vec<DefinitionFact>,
    calls: Vec<CallFact>,
    imports: Vec<ImportFact>,
    inherits: Vec<InheritFact>,
    entry_paths: HashSet<String>,
    declared_versions: BTreeMap<String, Option<String>>,
    failures: Vec<ParseFailure>,
    malformed: Vec<MalformedFact>,
}

impl GraphBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Queue one batch of facts. Paths are normalized on the way in.
    pub fn ingest(&mut self, batch: FactBatch) {
        for fact in batch.facts {
            match fact {
                Fact::File(mut f) => {
                    f.path = normalize_path(&f.path);
                    self.files.push(f);
                }
                Fact::Definition(mut d) => {
                    d.file = normalize_path(&d.file);
                    self.definitions.push(d);
                }
                Fact::Call(mut c) => {
                    c.file = normalize_path(&c.file);
                    c.callee_file = c.callee_file.map(|p| normalize_path(&p));
                    self.calls.push(c);
                }
                Fact::Import(mut i) => {
                    i.file = normalize_path(&i.file);
                    self.imports.push(i);
                }
                Fact::Inherit(mut i) => {
                    i.file = normalize_path(&i.file);
                    i.base_file = i.base_file.map(|p| normalize_path(&p));
                    self.inherits.push(i);
                }
                Fact::Manifest(m) => {
                    self.entry_paths
                        .extend(m.entry_points.iter().map(|p| normalize_path(p)));
                    for dep in m.dependencies {
                        let slot = self.declared_versions.entry(dep.name).or_insert(None);
                        if slot.is_none() {
                            *slot = dep.version;
                        }
                    }
                }
            }
        }
        self.failures.extend(batch.failures.into_iter().map(|mut f| {
            f.path = normalize_path(&f.path);
            f
        }));
        self.malformed.extend(batch.malformed);
    }

    /// Run both construction passes.
    pub fn build(mut self) -> (GraphStore, BuildReport) {
        self.sort_inputs();

        let mut run = Construction {
            config: &self.config,
            entry_paths: &self.entry_paths,
            declared_versions: &self.declared_versions,
            store: GraphStore::new(),
            report: BuildReport::start(),
            pending: Vec::new(),
            imported: HashMap::new(),
            unresolved_calls: BTreeMap::new(),
        };

        run.report
            .diagnostics
            .extend(self.malformed.iter().cloned().map(Diagnostic::from));

        // Pass 1: nodes
        for file in &self.files {
            run.add_file(file);
        }
        let mut defines = Vec::new();
        for def in &self.definitions {
            if let Some(edge) = run.add_definition(def) {
                defines.push(edge);
            }
        }
        let contains = run.add_directories();
        run.add_declared_dependencies();
        let imports = run.resolve_imports(&self.imports);
        run.mark_failures(&self.failures);

        // Pass 2: edges
        run.pending.extend(contains);
        run.pending.extend(defines);
        run.pending.extend(imports);
        run.connect_pending();
        for call in &self.calls {
            run.resolve_call(call);
        }
        for inherit in &self.inherits {
            run.resolve_inherit(inherit);
        }
        run.connect_pending();
        run.record_unresolved_calls();

        let Construction { store, mut report, .. } = run;
        report.nodes_created = store.node_count();
        report.edges_created = store.edge_count();
        report.finished_at = Utc::now();

        info!(
            graph_id = %report.graph_id,
            nodes = report.nodes_created,
            edges = report.edges_created,
            dropped = report.edges_dropped,
            skipped = report.files_skipped,
            diagnostics = report.diagnostics.len(),
            "Graph built"
        );
        (store, report)
    }

    /// Sort every fact list so the same input always builds the same graph.
    fn sort_inputs(&mut self) {
        self.files.sort_by(|a, b| a.path.cmp(&b.path));
        self.definitions.sort_by(|a, b| {
            (&a.file, a.qualified_name(), a.kind == DefinitionKind::Class, a.line_number).cmp(&(
                &b.file,
                b.qualified_name(),
                b.kind == DefinitionKind::Class,
                b.line_number,
            ))
        });
        self.calls.sort_by(|a, b| {
            (&a.file, &a.caller, &a.callee, &a.callee_file, a.line)
                .cmp(&(&b.file, &b.caller, &b.callee, &b.callee_file, b.line))
        });
        self.imports.sort_by(|a, b| {
            (&a.file, &a.module, &a.alias, a.line).cmp(&(&b.file, &b.module, &b.alias, b.line))
        });
        self.inherits.sort_by(|a, b| {
            (&a.file, &a.class, &a.base, &a.base_file)
                .cmp(&(&b.file, &b.class, &b.base, &b.base_file))
        });
        self.failures.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

/// State of one build run.
struct Construction<'a> {
    config: &'a BuilderConfig,
    entry_paths: &'a HashSet<String>,
    declared_versions: &'a BTreeMap<String, Option<String>>,
    store: GraphStore,
    report: BuildReport,
    pending: Vec<Edge>,
    /// Internal paths (files or package directories) each file imports.
    imported: HashMap<String, Vec<String>>,
    unresolved_calls: BTreeMap<NodeId, u64>,
}

impl Construction<'_> {
    // =========================================================================
    // Pass 1: nodes
    // =========================================================================

    fn file_attributes(&self, path: &str) -> Attributes {
        let name = file_name(path);
        let ext = extension(path);
        let is_entry = self.config.entry_point_names.iter().any(|n| n == name)
            || self.entry_paths.contains(path);

        let mut attrs = Attributes::new();
        attrs.insert(attr::PATH.into(), json!(path));
        attrs.insert(attr::NAME.into(), json!(name));
        attrs.insert(attr::EXTENSION.into(), json!(ext));
        if let Some(language) = language_for_extension(ext) {
            attrs.insert(attr::LANGUAGE.into(), json!(language));
        }
        attrs.insert(attr::IS_ENTRY_POINT.into(), json!(is_entry));
        attrs
    }

    fn add_file(&mut self, file: &FileFact) {
        if file.path.is_empty() {
            return;
        }
        let mut attrs = self.file_attributes(&file.path);
        if let Some(language) = &file.language {
            attrs.insert(attr::LANGUAGE.into(), json!(language));
        }
        if let Some(size) = file.size {
            attrs.insert(attr::SIZE.into(), json!(size));
        }
        self.insert_node(NodeId::file(&file.path), NodeKind::File, attrs);
    }

    /// Create a definition node; returns its pending `defines` edge.
    fn add_definition(&mut self, def: &DefinitionFact) -> Option<Edge> {
        if def.file.is_empty() || def.name.is_empty() {
            self.report.diagnostics.push(Diagnostic::MalformedFact {
                source: def.file.clone(),
                line: def.line_number.unwrap_or(0) as usize,
                message: "definition without a file or name".to_string(),
            });
            return None;
        }

        let file_id = NodeId::file(&def.file);
        if !self.store.contains_node(&file_id) {
            let mut attrs = self.file_attributes(&def.file);
            attrs.insert(attr::IMPLICIT.into(), json!(true));
            self.insert_node(file_id.clone(), NodeKind::File, attrs);
        }

        let qualified = def.qualified_name();
        let (id, kind) = match def.kind {
            DefinitionKind::Function => (NodeId::function(&def.file, &qualified), NodeKind::Function),
            DefinitionKind::Class => (NodeId::class(&def.file, &qualified), NodeKind::Class),
        };

        let mut attrs = Attributes::new();
        attrs.insert(attr::NAME.into(), json!(def.name));
        attrs.insert(attr::QUALIFIED_NAME.into(), json!(qualified));
        attrs.insert(attr::DEFINING_FILE.into(), json!(def.file));
        attrs.insert(attr::PARAMETERS.into(), json!(def.parameters));
        let optional = [
            (attr::LINE_NUMBER, def.line_number.map(Value::from)),
            (attr::RETURN_TYPE, def.return_type.as_deref().map(Value::from)),
            (attr::PARENT_CLASS, def.parent_class.as_deref().map(Value::from)),
            (attr::SIGNATURE, def.signature.as_deref().map(Value::from)),
            (attr::DOC, def.doc.as_deref().map(Value::from)),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                attrs.insert(key.into(), value);
            }
        }

        if self.insert_node(id.clone(), kind, attrs) {
            Some(Edge::new(file_id, id, Relationship::Defines))
        } else {
            None
        }
    }

    /// Create a directory node for every ancestor of every file.
    ///
    /// Returns the `contains` edges, one per (parent, child) pair.
    fn add_directories(&mut self) -> Vec<Edge> {
        let paths: Vec<String> = self
            .store
            .nodes_by_kind(NodeKind::File)
            .filter_map(|n| n.attr_str(attr::PATH).map(str::to_string))
            .collect();

        let mut pairs = BTreeSet::new();
        for path in &paths {
            let mut child = NodeId::file(path);
            for dir in ancestor_dirs(path).iter().rev() {
                let dir_id = NodeId::directory(dir);
                if !self.store.contains_node(&dir_id) {
                    let mut attrs = Attributes::new();
                    attrs.insert(attr::PATH.into(), json!(dir));
                    attrs.insert(attr::NAME.into(), json!(file_name(dir)));
                    self.insert_node(dir_id.clone(), NodeKind::Directory, attrs);
                }
                pairs.insert((dir_id.clone(), child));
                child = dir_id;
            }
        }

        pairs
            .into_iter()
            .map(|(parent, child)| Edge::new(parent, child, Relationship::Contains))
            .collect()
    }

    fn add_declared_dependencies(&mut self) {
        let declared: Vec<String> = self.declared_versions.keys().cloned().collect();
        for name in declared {
            self.ensure_dependency(&name);
        }
    }

    fn ensure_dependency(&mut self, package: &str) -> NodeId {
        let id = NodeId::dependency(package);
        if !self.store.contains_node(&id) {
            let version = self.declared_versions.get(package).cloned().flatten();
            let mut attrs = Attributes::new();
            attrs.insert(attr::NAME.into(), json!(package));
            attrs.insert(attr::VERSION.into(), json!(version));
            attrs.insert(attr::IS_EXTERNAL.into(), json!(true));
            self.insert_node(id.clone(), NodeKind::Dependency, attrs);
        }
        id
    }

    /// Resolve every import to an internal module or an external package.
    fn resolve_imports(&mut self, imports: &[ImportFact]) -> Vec<Edge> {
        let mut index = ModuleIndex::default();
        for node in self.store.nodes_by_kind(NodeKind::File) {
            if let Some(path) = node.attr_str(attr::PATH) {
                index.add_file(path);
            }
        }
        for node in self.store.nodes_by_kind(NodeKind::Directory) {
            if let Some(path) = node.attr_str(attr::PATH) {
                index.add_directory(path);
            }
        }

        let mut edges = Vec::new();
        for import in imports {
            let importer = NodeId::file(&import.file);
            if !self.store.contains_node(&importer) {
                debug!(file = %import.file, module = %import.module, "Import from unknown file");
                self.report.diagnostics.push(Diagnostic::MissingNode { id: importer });
                self.report.edges_dropped += 1;
                continue;
            }
            let segments = specifier_segments(&import.module, &self.config.aliases);
            let internal = index
                .resolve(&import.file, &segments)
                .map(|entry| (entry.id.clone(), entry.path.clone(), entry.is_file));

            let target = match internal {
                Some((id, path, is_file)) => {
                    let imported = self.imported.entry(import.file.clone()).or_default();
                    if is_file && PACKAGE_INDEX_STEMS.contains(&file_stem(&path)) {
                        imported.push(parent_dir(&path).to_string());
                    }
                    imported.push(path);
                    id
                }
                None => match external_package_name(&import.module) {
                    Some(package) => self.ensure_dependency(&package),
                    None => {
                        debug!(file = %import.file, module = %import.module, "Unresolvable import");
                        self.report.diagnostics.push(Diagnostic::UnresolvedReference {
                            reference: ReferenceKind::Import,
                            file: import.file.clone(),
                            name: import.module.clone(),
                        });
                        self.report.edges_dropped += 1;
                        continue;
                    }
                },
            };

            let mut edge = Edge::new(importer, target, Relationship::Imports)
                .with_attribute(attr::SPECIFIER, import.module.as_str());
            if let Some(alias) = &import.alias {
                edge = edge.with_attribute(attr::ALIAS, alias.as_str());
            }
            if let Some(line) = import.line {
                edge = edge.with_attribute(attr::LINE, line);
            }
            edges.push(edge);
        }
        edges
    }

    fn mark_failures(&mut self, failures: &[ParseFailure]) {
        let mut seen = HashSet::new();
        for failure in failures {
            if !seen.insert(failure.path.clone()) {
                continue;
            }
            self.report.files_skipped += 1;
            self.report.file_errors.push(FileError {
                path: failure.path.clone(),
                error: failure.error.clone(),
            });

            let id = NodeId::file(&failure.path);
            if self.store.contains_node(&id) {
                if let Err(e) = self.store.enrich_attribute(&id, attr::PARSE_FAILED, json!(true)) {
                    self.report.diagnostics.push(Diagnostic::from_graph_error(e));
                }
            }
        }
    }

    /// Insert a node, recording a diagnostic on failure.
    fn insert_node(&mut self, id: NodeId, kind: NodeKind, attrs: Attributes) -> bool {
        match self.store.add_node(id, kind, attrs) {
            Ok(()) => true,
            Err(e) => {
                debug!("Node rejected: {}", e);
                self.report.diagnostics.push(Diagnostic::from_graph_error(e));
                false
            }
        }
    }

    // =========================================================================
    // Pass 2: edges
    // =========================================================================

    fn connect_pending(&mut self) {
        for edge in std::mem::take(&mut self.pending) {
            self.connect(edge);
        }
    }

    /// Validate endpoint kinds and insert one edge.
    fn connect(&mut self, edge: Edge) {
        let kinds = (
            self.store.node(&edge.source).map(|n| n.kind),
            self.store.node(&edge.target).map(|n| n.kind),
        );
        if let (Some(source_kind), Some(target_kind)) = kinds {
            if !edge.relationship.allows(source_kind, target_kind) {
                self.report.diagnostics.push(Diagnostic::InvalidEdge {
                    source: edge.source,
                    source_kind,
                    target: edge.target,
                    target_kind,
                    relationship: edge.relationship,
                });
                self.report.edges_dropped += 1;
                return;
            }
        }

        if let Err(e) = self
            .store
            .add_edge(edge.source, edge.target, edge.relationship, edge.attributes)
        {
            debug!("Edge dropped: {}", e);
            self.report.diagnostics.push(Diagnostic::from_graph_error(e));
            self.report.edges_dropped += 1;
        }
    }

    fn unresolved(&mut self, reference: ReferenceKind, file: &str, name: &str) {
        debug!(file, name, ?reference, "Unresolved reference");
        self.report.diagnostics.push(Diagnostic::UnresolvedReference {
            reference,
            file: file.to_string(),
            name: name.to_string(),
        });
        self.report.edges_dropped += 1;
    }

    /// Find a definition of `kind` named `name` inside `file`.
    fn local_definition(&self, file: &str, name: &str, kind: NodeKind) -> Option<NodeId> {
        let exact = match kind {
            NodeKind::Class => NodeId::class(file, name),
            _ => NodeId::function(file, name),
        };
        if self.store.contains_node(&exact) {
            return Some(exact);
        }
        let (last, _) = split_callee(name);
        self.store
            .find_by_name(&last)
            .into_iter()
            .find(|n| n.kind == kind && n.file_path() == Some(file))
            .map(|n| n.id.clone())
    }

    fn imports_cover(&self, importer: &str, path: &str) -> bool {
        self.imported.get(importer).is_some_and(|paths| {
            paths.iter().any(|p| {
                path == p
                    || path
                        .strip_prefix(p.as_str())
                        .is_some_and(|rest| !p.is_empty() && rest.starts_with('/'))
            })
        })
    }

    /// Pick the best definition for a referenced name.
    ///
    /// Candidates are ranked by tier: the hinted file, the referencing file,
    /// files it imports, then everywhere. Within a tier, a match on the
    /// qualified name wins, then the candidate nearest the referencing file,
    /// then the smallest id.
    fn pick_definition(
        &self,
        reference: &str,
        kind: NodeKind,
        from_file: &str,
        hint: Option<&str>,
        exclude: Option<&NodeId>,
    ) -> Option<NodeId> {
        let (last, dotted) = split_callee(reference);
        let from_dir = parent_dir(from_file);
        let tier = |node: &Node| -> u8 {
            match node.file_path() {
                Some(path) if hint == Some(path) => 0,
                Some(path) if path == from_file => 1,
                Some(path) if self.imports_cover(from_file, path) => 2,
                _ => 3,
            }
        };

        self.store
            .find_by_name(&last)
            .into_iter()
            .filter(|n| n.kind == kind && Some(&n.id) != exclude)
            .min_by(|a, b| {
                tier(*a)
                    .cmp(&tier(*b))
                    .then(qualified_match(b, &dotted).cmp(&qualified_match(a, &dotted)))
                    .then(proximity(b, from_dir).cmp(&proximity(a, from_dir)))
                    .then(a.id.cmp(&b.id))
            })
            .map(|n| n.id.clone())
    }

    fn resolve_call(&mut self, call: &CallFact) {
        let Some(caller) = self.local_definition(&call.file, &call.caller, NodeKind::Function) else {
            self.unresolved(ReferenceKind::Caller, &call.file, &call.caller);
            return;
        };

        let callee = self.pick_definition(
            &call.callee,
            NodeKind::Function,
            &call.file,
            call.callee_file.as_deref(),
            None,
        );
        match callee {
            Some(callee) => {
                let mut edge = Edge::new(caller, callee, Relationship::Calls);
                if let Some(line) = call.line {
                    edge = edge.with_attribute(attr::LINE, line);
                }
                self.pending.push(edge);
            }
            None => {
                self.unresolved(ReferenceKind::Call, &call.file, &call.callee);
                *self.unresolved_calls.entry(caller).or_insert(0) += 1;
            }
        }
    }

    fn resolve_inherit(&mut self, inherit: &InheritFact) {
        let Some(class) = self.local_definition(&inherit.file, &inherit.class, NodeKind::Class) else {
            self.unresolved(ReferenceKind::Inherit, &inherit.file, &inherit.class);
            return;
        };

        match self.pick_definition(
            &inherit.base,
            NodeKind::Class,
            &inherit.file,
            inherit.base_file.as_deref(),
            Some(&class),
        ) {
            Some(base) => self.pending.push(Edge::new(class, base, Relationship::Inherits)),
            None => self.unresolved(ReferenceKind::Inherit, &inherit.file, &inherit.base),
        }
    }

    fn record_unresolved_calls(&mut self) {
        for (id, count) in std::mem::take(&mut self.unresolved_calls) {
            if let Err(e) = self.store.enrich_attribute(&id, attr::UNRESOLVED_CALLS, json!(count)) {
                self.report.diagnostics.push(Diagnostic::from_graph_error(e));
            }
        }
    }
}

fn qualified_match(node: &Node, dotted: &str) -> bool {
    node.attr_str(attr::QUALIFIED_NAME).is_some_and(|q| {
        q == dotted || (dotted.ends_with(q) && dotted[..dotted.len() - q.len()].ends_with('.'))
    })
}

fn proximity(node: &Node, from_dir: &str) -> usize {
    node.file_path()
        .map(|p| common_dir_prefix(parent_dir(p), from_dir))
        .unwrap_or(0)
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    let language = match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "cs" => "csharp",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        _ => return None,
    };
    Some(language)
}
