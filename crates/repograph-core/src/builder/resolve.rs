//! Path and module-specifier heuristics used while resolving references.

use std::collections::{BTreeMap, HashMap};

use crate::config::{PACKAGE_INDEX_STEMS, RELATIVE_MARKERS};
use crate::graph::NodeId;

/// Normalize a repository path: `/` separators, no leading `./`, no trailing `/`.
pub(crate) fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut trimmed = unified.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.trim_matches('/').to_string()
}

/// Final path component.
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extension of the final component, without the dot.
pub(crate) fn extension(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => "",
        Some(i) => &name[i + 1..],
    }
}

/// Final component without its extension.
pub(crate) fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    }
}

/// Directory part of a path (`""` for top-level entries).
pub(crate) fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Every ancestor directory of `path`, outermost first.
///
/// `src/app/models.py` yields `["src", "src/app"]`.
pub(crate) fn ancestor_dirs(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.split('/').collect();
    (1..parts.len()).map(|n| parts[..n].join("/")).collect()
}

/// Number of equal trailing elements.
pub(crate) fn common_suffix_len<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Number of equal leading `/` components of two directories.
pub(crate) fn common_dir_prefix(a: &str, b: &str) -> usize {
    a.split('/')
        .zip(b.split('/'))
        .take_while(|(x, y)| !x.is_empty() && x == y)
        .count()
}

/// Rewrite the longest alias prefix that ends on a segment boundary.
///
/// `@app` rewrites `@app` and `@app/core` but not `@apple/ui`.
fn apply_alias(specifier: &str, aliases: &BTreeMap<String, String>) -> String {
    aliases
        .iter()
        .filter(|(prefix, _)| alias_matches(specifier, prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(prefix, target)| format!("{}{}", target, &specifier[prefix.len()..]))
        .unwrap_or_else(|| specifier.to_string())
}

fn alias_matches(specifier: &str, prefix: &str) -> bool {
    match specifier.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier.contains('/') || specifier.contains('\\')
}

/// Split an import specifier into module segments.
///
/// `./utils/helpers.js` → `[utils, helpers]`, `app.models` → `[app, models]`,
/// `crate::graph::store` → `[graph, store]`. Relative markers are dropped.
pub(crate) fn specifier_segments(specifier: &str, aliases: &BTreeMap<String, String>) -> Vec<String> {
    let specifier = apply_alias(specifier.trim(), aliases);

    let raw: Vec<String> = if is_path_like(&specifier) {
        let normalized = specifier.replace('\\', "/");
        let mut parts: Vec<String> = normalized.split('/').map(|s| s.to_string()).collect();
        if let Some(last) = parts.last_mut() {
            let stem = file_stem(last).to_string();
            *last = stem;
        }
        parts
    } else {
        specifier
            .split(|c| c == '.' || c == ':' || c == '/')
            .map(|s| s.to_string())
            .collect()
    };

    let mut segments: Vec<String> = raw
        .into_iter()
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .collect();
    while segments
        .first()
        .map(|s| RELATIVE_MARKERS.contains(&s.as_str()))
        .unwrap_or(false)
    {
        segments.remove(0);
    }
    segments
}

/// Package name for an import that did not resolve internally.
///
/// Scoped npm packages keep their scope (`@scope/pkg`).
pub(crate) fn external_package_name(specifier: &str) -> Option<String> {
    let trimmed = specifier.trim().trim_start_matches(&['.', '/'][..]);
    if trimmed.starts_with('@') {
        let mut parts = trimmed.splitn(3, '/');
        let scope = parts.next()?;
        return match parts.next() {
            Some(pkg) if !pkg.is_empty() => Some(format!("{}/{}", scope, pkg)),
            _ => Some(scope.to_string()),
        };
    }
    let first = trimmed
        .split(|c| c == '.' || c == ':' || c == '/' || c == '\\')
        .find(|s| !s.is_empty() && !RELATIVE_MARKERS.contains(s))?;
    Some(first.to_string())
}

/// Split a called name into its final identifier and full dotted form.
///
/// `self.repo.save` → (`save`, `repo.save`); `Auth::new` → (`new`, `Auth.new`).
pub(crate) fn split_callee(callee: &str) -> (String, String) {
    let cleaned = callee.trim().trim_end_matches("()");
    let parts: Vec<&str> = cleaned
        .split(|c| c == '.' || c == ':' || c == '>' || c == '-')
        .filter(|s| !s.is_empty() && *s != "self" && *s != "this" && *s != "super")
        .collect();
    let last = parts.last().copied().unwrap_or(cleaned).to_string();
    (last, parts.join("."))
}

/// An internal module a specifier may resolve to.
#[derive(Debug, Clone)]
pub(crate) struct ModuleEntry {
    pub id: NodeId,
    /// Repository path of the file or directory.
    pub path: String,
    pub segments: Vec<String>,
    pub is_file: bool,
}

/// Index of internal modules keyed by final segment.
#[derive(Debug, Default)]
pub(crate) struct ModuleIndex {
    entries: Vec<ModuleEntry>,
    by_last: HashMap<String, Vec<usize>>,
}

impl ModuleIndex {
    pub fn add_file(&mut self, path: &str) {
        let dir = parent_dir(path);
        let stem = file_stem(path);
        let mut segments: Vec<String> = if dir.is_empty() {
            Vec::new()
        } else {
            dir.split('/').map(|s| s.to_string()).collect()
        };

        if PACKAGE_INDEX_STEMS.contains(&stem) && !segments.is_empty() {
            // `pkg/__init__.py` answers for `pkg`
            self.push(ModuleEntry {
                id: NodeId::file(path),
                path: path.to_string(),
                segments: segments.clone(),
                is_file: true,
            });
        }

        segments.push(stem.to_string());
        self.push(ModuleEntry {
            id: NodeId::file(path),
            path: path.to_string(),
            segments,
            is_file: true,
        });
    }

    pub fn add_directory(&mut self, path: &str) {
        self.push(ModuleEntry {
            id: NodeId::directory(path),
            path: path.to_string(),
            segments: path.split('/').map(|s| s.to_string()).collect(),
            is_file: false,
        });
    }

    fn push(&mut self, entry: ModuleEntry) {
        if let Some(last) = entry.segments.last() {
            self.by_last
                .entry(last.clone())
                .or_default()
                .push(self.entries.len());
            self.entries.push(entry);
        }
    }

    /// Resolve `segments` imported from `importer` to an internal module.
    ///
    /// A candidate's segments must end with every segment of the specifier,
    /// so `react-dom/client` never lands on `src/api/client.ts`. Among those,
    /// the one nearest the importer wins, then files over directories, then
    /// ascending id. When nothing matches the trailing segment is retried as
    /// an imported item name (`app.models.User` → `app.models`) under the
    /// same rule.
    pub fn resolve(&self, importer: &str, segments: &[String]) -> Option<&ModuleEntry> {
        let importer_dir = parent_dir(importer);
        let importer_id = NodeId::file(importer);
        let mut current = segments;

        for _ in 0..2 {
            let last = current.last()?;
            let best = self
                .by_last
                .get(last)
                .into_iter()
                .flatten()
                .map(|&i| &self.entries[i])
                .filter(|e| e.id != importer_id)
                .filter(|e| common_suffix_len(&e.segments, current) == current.len())
                .max_by(|a, b| {
                    common_dir_prefix(parent_dir(&a.path), importer_dir)
                        .cmp(&common_dir_prefix(parent_dir(&b.path), importer_dir))
                        .then(a.is_file.cmp(&b.is_file))
                        .then(b.id.cmp(&a.id))
                });
            if best.is_some() {
                return best;
            }
            if current.len() < 2 {
                break;
            }
            current = &current[..current.len() - 1];
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(spec: &str) -> Vec<String> {
        specifier_segments(spec, &BTreeMap::new())
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize_path("./src\\app/"), "src/app");
        assert_eq!(file_name("src/app/main.py"), "main.py");
        assert_eq!(extension("src/app/main.py"), "py");
        assert_eq!(extension(".gitignore"), "");
        assert_eq!(file_stem("src/utils.test.ts"), "utils.test");
        assert_eq!(parent_dir("main.py"), "");
        assert_eq!(ancestor_dirs("src/app/models.py"), vec!["src", "src/app"]);
        assert!(ancestor_dirs("main.py").is_empty());
    }

    #[test]
    fn test_specifier_segments() {
        assert_eq!(segs("./utils/helpers.js"), vec!["utils", "helpers"]);
        assert_eq!(segs("../lib/db"), vec!["lib", "db"]);
        assert_eq!(segs("app.models"), vec!["app", "models"]);
        assert_eq!(segs(".models"), vec!["models"]);
        assert_eq!(segs("crate::graph::store"), vec!["graph", "store"]);
        assert!(segs(".").is_empty());
    }

    #[test]
    fn test_alias_rewrite() {
        let mut aliases = BTreeMap::new();
        aliases.insert("@app".to_string(), "src".to_string());
        aliases.insert("@app/ui".to_string(), "src/components".to_string());
        assert_eq!(
            specifier_segments("@app/ui/button", &aliases),
            vec!["src", "components", "button"]
        );
        assert_eq!(specifier_segments("@app/core", &aliases), vec!["src", "core"]);
        assert_eq!(specifier_segments("@app", &aliases), vec!["src"]);
    }

    #[test]
    fn test_alias_stops_at_segment_boundary() {
        let mut aliases = BTreeMap::new();
        aliases.insert("@app".to_string(), "src".to_string());
        aliases.insert("~/".to_string(), "src/".to_string());
        assert_eq!(specifier_segments("@apple/ui", &aliases), vec!["@apple", "ui"]);
        assert_eq!(specifier_segments("~/lib/db", &aliases), vec!["src", "lib", "db"]);
    }

    #[test]
    fn test_external_package_name() {
        assert_eq!(external_package_name("serde::Deserialize").as_deref(), Some("serde"));
        assert_eq!(external_package_name("lodash/fp").as_deref(), Some("lodash"));
        assert_eq!(external_package_name("@scope/pkg/sub").as_deref(), Some("@scope/pkg"));
        assert_eq!(external_package_name("os.path").as_deref(), Some("os"));
        assert_eq!(external_package_name("."), None);
    }

    #[test]
    fn test_split_callee() {
        assert_eq!(split_callee("self.repo.save"), ("save".to_string(), "repo.save".to_string()));
        assert_eq!(split_callee("Auth::new"), ("new".to_string(), "Auth.new".to_string()));
        assert_eq!(split_callee("run()"), ("run".to_string(), "run".to_string()));
    }

    #[test]
    fn test_partial_suffix_is_not_a_match() {
        let mut index = ModuleIndex::default();
        index.add_file("src/api/client.ts");
        index.add_file("src/index.ts");
        index.add_file("utils/path.py");
        index.add_file("app.py");

        assert!(index.resolve("src/index.ts", &segs("react-dom/client")).is_none());
        assert!(index.resolve("app.py", &segs("os.path")).is_none());
        // the full path still resolves
        let hit = index.resolve("src/index.ts", &segs("./api/client")).unwrap();
        assert_eq!(hit.path, "src/api/client.ts");
        let hit = index.resolve("app.py", &segs("utils.path")).unwrap();
        assert_eq!(hit.path, "utils/path.py");
    }

    #[test]
    fn test_longest_suffix_wins() {
        let mut index = ModuleIndex::default();
        index.add_file("src/app/utils.py");
        index.add_file("tests/utils.py");
        index.add_file("src/main.py");

        let hit = index.resolve("src/main.py", &segs("app.utils")).unwrap();
        assert_eq!(hit.path, "src/app/utils.py");

        // equal suffix: the one closer to the importer wins
        let hit = index.resolve("tests/test_x.py", &segs("utils")).unwrap();
        assert_eq!(hit.path, "tests/utils.py");
    }

    #[test]
    fn test_package_index_and_item_fallback() {
        let mut index = ModuleIndex::default();
        index.add_file("pkg/__init__.py");
        index.add_directory("pkg");
        index.add_file("app/models.py");

        let hit = index.resolve("main.py", &segs("pkg")).unwrap();
        assert_eq!(hit.id, NodeId::file("pkg/__init__.py"));

        let hit = index.resolve("main.py", &segs("app.models.User")).unwrap();
        assert_eq!(hit.path, "app/models.py");

        assert!(index.resolve("main.py", &segs("requests")).is_none());
    }

    #[test]
    fn test_never_resolves_to_importer() {
        let mut index = ModuleIndex::default();
        index.add_file("src/logging.py");
        assert!(index.resolve("src/logging.py", &segs("logging")).is_none());
    }
}
