//! End-to-end checks from a JSON-lines fact stream to query results.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use repograph_core::builder::build_graph_from_readers;
use repograph_core::config::BuilderConfig;
use repograph_core::facts::read_fact_stream;
use repograph_core::graph::attr;
use repograph_core::impact::analyze_impact;
use repograph_core::retrieval::{
    attach_embeddings, HashingEmbedder, RetrievalConfig, RetrievalMode, SeedSource,
};
use repograph_core::{
    export_visual, Confidence, FrozenGraph, GraphBuilder, ImpactLevel, NodeId, NodeKind,
    Relationship, RetrievalQuery, Retriever,
};

const APP: &str = r#"
{"type": "file", "path": "app/main.py", "language": "python"}
{"type": "definition", "file": "app/main.py", "name": "main", "kind": "function", "line_number": 1}
{"type": "import", "file": "app/main.py", "module": "app.auth", "line": 1}
{"type": "call", "file": "app/main.py", "caller": "main", "callee": "login"}
"#;

const AUTH: &str = r#"
{"type": "file", "path": "app/auth.py", "language": "python"}
{"type": "definition", "file": "app/auth.py", "name": "login", "kind": "function", "line_number": 4}
{"type": "definition", "file": "app/auth.py", "name": "check_password", "kind": "function", "line_number": 12}
{"type": "import", "file": "app/auth.py", "module": "app.db"}
{"type": "import", "file": "app/auth.py", "module": "requests"}
{"type": "call", "file": "app/auth.py", "caller": "login", "callee": "check_password"}
{"type": "call", "file": "app/auth.py", "caller": "check_password", "callee": "query"}
"#;

const DB: &str = r#"
{"type": "file", "path": "app/db.py", "language": "python"}
{"type": "definition", "file": "app/db.py", "name": "query", "kind": "function", "line_number": 2}
"#;

const UTIL: &str = r#"
{"type": "file", "path": "app/util.py", "language": "python"}
{"type": "definition", "file": "app/util.py", "name": "slugify", "kind": "function", "line_number": 1}
"#;

const ADMIN: &str = r#"
{"type": "file", "path": "app/admin.py", "language": "python"}
{"type": "definition", "file": "app/admin.py", "name": "purge", "kind": "function", "line_number": 1}
{"type": "import", "file": "app/admin.py", "module": "app.db"}
{"type": "call", "file": "app/admin.py", "caller": "purge", "callee": "query"}
"#;

fn build(sources: &[(&str, &str)]) -> FrozenGraph {
    let readers = sources
        .iter()
        .map(|(name, text)| (name.to_string(), Cursor::new(text.as_bytes())));
    let (graph, _) = build_graph_from_readers(readers, &BuilderConfig::default()).unwrap();
    graph
}

fn repo() -> FrozenGraph {
    build(&[("main.jsonl", APP), ("auth.jsonl", AUTH), ("db.jsonl", DB), ("util.jsonl", UTIL)])
}

fn query_fn() -> NodeId {
    NodeId::function("app/db.py", "query")
}

#[test]
fn test_build_links_calls_and_imports() {
    let graph = repo();

    let callers = graph.neighbors(&query_fn(), Relationship::Calls, repograph_core::Direction::Incoming);
    assert_eq!(callers, vec![NodeId::function("app/auth.py", "check_password")]);

    let imports = graph.neighbors(
        &NodeId::file("app/auth.py"),
        Relationship::Imports,
        repograph_core::Direction::Outgoing,
    );
    assert!(imports.contains(&NodeId::file("app/db.py")));
    assert!(imports.contains(&NodeId::dependency("requests")));

    let requests = graph.node(&NodeId::dependency("requests")).unwrap();
    assert!(requests.attr_flag(attr::IS_EXTERNAL));
    assert!(graph.node(&NodeId::file("app/main.py")).unwrap().attr_flag(attr::IS_ENTRY_POINT));
}

#[test]
fn test_every_edge_has_both_endpoints() {
    let graph = repo();
    for edge in graph.edges() {
        assert!(graph.contains_node(&edge.source), "missing {}", edge.source);
        assert!(graph.contains_node(&edge.target), "missing {}", edge.target);
    }
}

#[test]
fn test_impact_reaching_entry_point_is_high() {
    let graph = repo();
    let report = analyze_impact(&graph, &query_fn(), None).unwrap();

    assert_eq!(report.level, ImpactLevel::High);
    assert_eq!(report.confidence, Confidence::High);
    assert_eq!(
        report.direct_callers,
        vec![NodeId::function("app/auth.py", "check_password")]
    );
    assert_eq!(report.importing_files, vec![NodeId::file("app/auth.py")]);
    assert!(report.affected.contains(&NodeId::function("app/main.py", "main")));
    assert!(report.truncated.is_none());
}

#[test]
fn test_isolated_function_is_low_impact() {
    let graph = repo();
    let report = analyze_impact(&graph, &NodeId::function("app/util.py", "slugify"), None).unwrap();

    assert_eq!(report.level, ImpactLevel::Low);
    assert!(report.is_empty());
    assert!(report.direct_callers.is_empty());
}

#[test]
fn test_adding_a_caller_never_shrinks_impact() {
    let before = repo();
    let after = build(&[
        ("main.jsonl", APP),
        ("auth.jsonl", AUTH),
        ("db.jsonl", DB),
        ("util.jsonl", UTIL),
        ("admin.jsonl", ADMIN),
    ]);

    let small = analyze_impact(&before, &query_fn(), None).unwrap();
    let large = analyze_impact(&after, &query_fn(), None).unwrap();

    let large_set: HashSet<&NodeId> = large.affected.iter().collect();
    assert!(small.affected.iter().all(|id| large_set.contains(id)));
    assert!(large.affected.contains(&NodeId::function("app/admin.py", "purge")));
    assert!(large.level >= small.level);
}

#[test]
fn test_build_is_independent_of_source_order() {
    let forward = repo();
    let backward = build(&[("util.jsonl", UTIL), ("db.jsonl", DB), ("auth.jsonl", AUTH), ("main.jsonl", APP)]);
    assert_eq!(forward.store(), backward.store());

    // one combined stream behaves like separate ones
    let combined = format!("{}{}{}{}", APP, AUTH, DB, UTIL);
    let single = build(&[("all.jsonl", combined.as_str())]);
    assert_eq!(forward.store(), single.store());
}

#[test]
fn test_queries_are_idempotent() {
    let graph = repo();
    let first = analyze_impact(&graph, &query_fn(), None).unwrap();
    let second = analyze_impact(&graph, &query_fn(), None).unwrap();
    assert_eq!(first, second);

    let retriever = Retriever::new(RetrievalConfig::default());
    let query = RetrievalQuery::from_text("login");
    assert_eq!(
        retriever.retrieve(&graph, &query, Some(3)),
        retriever.retrieve(&graph, &query, Some(3))
    );
}

#[test]
fn test_semantic_retrieval_over_embedded_graph() {
    let embedder = Arc::new(HashingEmbedder::new(256));
    let mut builder = GraphBuilder::new(BuilderConfig::default());
    for (name, text) in [("main", APP), ("auth", AUTH), ("db", DB), ("util", UTIL)] {
        builder.ingest(read_fact_stream(name, Cursor::new(text.as_bytes())).unwrap());
    }
    let (mut store, report) = builder.build();
    attach_embeddings(&mut store, embedder.as_ref()).unwrap();
    let graph = store.freeze_with_id(report.graph_id);

    let retriever = Retriever::new(RetrievalConfig::default()).with_embedder(embedder);
    let result = retriever.retrieve(&graph, &RetrievalQuery::from_text("check password"), Some(1));

    assert_eq!(result.mode, RetrievalMode::Semantic);
    let seeds: Vec<&NodeId> = result.seeds().map(|n| &n.id).collect();
    assert_eq!(seeds, vec![&NodeId::function("app/auth.py", "check_password")]);
    // defining file joins through the breadth-first context
    assert!(result.contains(&NodeId::file("app/auth.py")));
    for edge in &result.edges {
        assert!(result.contains(&edge.source) && result.contains(&edge.target));
    }
}

#[test]
fn test_export_respects_filters() {
    let graph = repo();
    let visual = export_visual(&graph, Some(&[NodeKind::Function]), Some(&[Relationship::Calls]));

    assert_eq!(visual.nodes.len(), 5);
    assert_eq!(visual.edges.len(), 3);
    assert!(visual.nodes.iter().all(|n| n.attributes.category == "function"));
}

#[test]
fn test_single_embedded_node_is_topped_up_textually() {
    let mut builder = GraphBuilder::new(BuilderConfig::default());
    for (name, text) in [("main", APP), ("auth", AUTH), ("db", DB), ("util", UTIL)] {
        builder.ingest(read_fact_stream(name, Cursor::new(text.as_bytes())).unwrap());
    }
    let (mut store, report) = builder.build();
    let embedded = NodeId::function("app/auth.py", "check_password");
    store.attach_embedding(&embedded, vec![1.0, 0.0]).unwrap();
    let graph = store.freeze_with_id(report.graph_id);

    let query = RetrievalQuery::from_text("login query").with_vector(vec![1.0, 0.0]);
    let result = Retriever::new(RetrievalConfig::default()).retrieve(&graph, &query, Some(3));

    assert_eq!(result.mode, RetrievalMode::Mixed);
    let seeds: Vec<(&NodeId, SeedSource)> = result.seeds().map(|n| (&n.id, n.seed)).collect();
    assert_eq!(
        seeds,
        vec![
            (&embedded, SeedSource::Similarity),
            (&NodeId::function("app/auth.py", "login"), SeedSource::Textual),
            (&query_fn(), SeedSource::Textual),
        ]
    );
}

#[test]
fn test_unembedded_graph_seeds_every_textual_match() {
    let graph = repo();
    let result = Retriever::new(RetrievalConfig::default()).retrieve(&graph, &RetrievalQuery::from_text("auth"), Some(1));

    assert_eq!(result.mode, RetrievalMode::Structural);
    let seeds: Vec<&NodeId> = result.seeds().map(|n| &n.id).collect();
    assert_eq!(
        seeds,
        vec![
            &NodeId::file("app/auth.py"),
            &NodeId::function("app/auth.py", "check_password"),
            &NodeId::function("app/auth.py", "login"),
        ]
    );
    assert!(result.seeds().all(|n| n.seed == SeedSource::Textual));
}
