//! Query-driven context assembly.
//!
//! A query is matched against node embeddings by cosine similarity. The
//! top matches seed a hybrid walk that pulls in structurally adjacent nodes,
//! and the result is the induced subgraph over everything selected. When the
//! graph has no embeddings, or too few match, textual token overlap fills the
//! remaining seed slots.

mod embedder;

pub use embedder::{
    attach_embeddings, node_text, Embedder, EmbeddingError, HashingEmbedder, Tokenizer,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::config::{
    RetrievalSettings, TraversalSettings, DEFAULT_BFS_DEPTH, DEFAULT_DFS_DEPTH,
    DEFAULT_RETRIEVAL_MAX_NODES, DEFAULT_TIMEOUT_MS, DEFAULT_TOP_K,
};
use crate::graph::{attr, Edge, GraphStore, Node, NodeId, NodeKind};
use crate::traversal::{hybrid, HybridConfig, Truncation};

/// Retrieval limits.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Number of seed nodes.
    pub top_k: usize,
    pub bfs_depth: usize,
    pub dfs_depth: usize,
    /// Budget for the expanded node set.
    pub max_nodes: usize,
    pub timeout: Option<Duration>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            bfs_depth: DEFAULT_BFS_DEPTH,
            dfs_depth: DEFAULT_DFS_DEPTH,
            max_nodes: DEFAULT_RETRIEVAL_MAX_NODES,
            timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
        }
    }
}

impl RetrievalConfig {
    pub fn from_settings(retrieval: &RetrievalSettings, traversal: &TraversalSettings) -> Self {
        Self {
            top_k: retrieval.top_k,
            bfs_depth: retrieval.bfs_depth,
            dfs_depth: retrieval.dfs_depth,
            max_nodes: retrieval.max_nodes,
            timeout: traversal.timeout(),
        }
    }
}

/// A query given as text, as a vector, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
}

impl RetrievalQuery {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            vector: None,
        }
    }

    pub fn from_vector(vector: Vec<f32>) -> Self {
        Self {
            text: None,
            vector: Some(vector),
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }
}

/// How the seeds of a result were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// All seeds came from embedding similarity.
    Semantic,
    /// No similarity seeds; textual matches only.
    Structural,
    /// Similarity seeds topped up with textual matches.
    Mixed,
}

/// Why a node is in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    Similarity,
    Textual,
    /// Reached by expansion only.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Similarity or token-match score for seeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub seed: SeedSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bfs_distance: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dfs_depth: Option<usize>,
}

/// Ranked nodes plus every stored edge between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSubgraph {
    pub mode: RetrievalMode,
    pub nodes: Vec<RankedNode>,
    pub edges: Vec<Edge>,
    pub truncated: Option<Truncation>,
}

impl RankedSubgraph {
    fn empty(mode: RetrievalMode) -> Self {
        Self {
            mode,
            nodes: Vec::new(),
            edges: Vec::new(),
            truncated: None,
        }
    }

    pub fn seeds(&self) -> impl Iterator<Item = &RankedNode> + '_ {
        self.nodes.iter().filter(|n| n.seed != SeedSource::None)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

struct Seed<'g> {
    node: &'g Node,
    score: f32,
    source: SeedSource,
}

/// Selects a relevant, connected subgraph for a query.
#[derive(Clone, Default)]
pub struct Retriever {
    config: RetrievalConfig,
    embedder: Option<Arc<dyn Embedder>>,
    tokenizer: Tokenizer,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("config", &self.config)
            .field("embedder", &self.embedder.as_ref().map(|e| e.model_name().to_string()))
            .finish()
    }
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            embedder: None,
            tokenizer: Tokenizer::new(),
        }
    }

    /// Embed text queries with `embedder`.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Rank and expand nodes for `query`.
    ///
    /// `k` bounds the similarity seeds. When no node is similar, every node
    /// whose text matches becomes a seed, up to `max_nodes`.
    ///
    /// Never fails: an embedding failure or a graph without embeddings falls
    /// back to textual matching, reported through [`RankedSubgraph::mode`].
    #[instrument(skip(self, graph, query))]
    pub fn retrieve(
        &self,
        graph: &GraphStore,
        query: &RetrievalQuery,
        k: Option<usize>,
    ) -> RankedSubgraph {
        let k = k.unwrap_or(self.config.top_k);
        if k == 0 || graph.is_empty() {
            return RankedSubgraph::empty(RetrievalMode::Structural);
        }

        let vector = self.query_vector(query);
        let mut seeds = match &vector {
            Some(v) => similarity_seeds(graph, v, k),
            None => Vec::new(),
        };
        let similar = seeds.len();

        // without similarity seeds every textual match seeds the walk;
        // otherwise textual matches only top up to k
        let limit = if similar == 0 {
            self.config.max_nodes
        } else {
            k.saturating_sub(similar)
        };
        if limit > 0 {
            if let Some(text) = query.text.as_deref() {
                let taken: HashSet<&NodeId> = seeds.iter().map(|s| &s.node.id).collect();
                let textual = self.textual_seeds(graph, text, &taken, limit);
                seeds.extend(textual);
            }
        }

        let mode = match (similar, seeds.len() - similar) {
            (0, _) => RetrievalMode::Structural,
            (_, 0) => RetrievalMode::Semantic,
            _ => RetrievalMode::Mixed,
        };
        debug!(?mode, similar, total = seeds.len(), "Seeds selected");
        if seeds.is_empty() {
            return RankedSubgraph::empty(mode);
        }

        self.assemble(graph, seeds, mode)
    }

    fn query_vector(&self, query: &RetrievalQuery) -> Option<Vec<f32>> {
        if let Some(vector) = &query.vector {
            return Some(vector.clone());
        }
        let text = query.text.as_ref()?;
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(std::slice::from_ref(text)) {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.swap_remove(0)),
            Ok(_) => None,
            Err(e) => {
                warn!("Query embedding failed, using textual matching: {}", e);
                None
            }
        }
    }

    /// Nodes whose id, name or path share tokens with `text`.
    ///
    /// Score is the fraction of query tokens matched.
    fn textual_seeds<'g>(
        &self,
        graph: &'g GraphStore,
        text: &str,
        taken: &HashSet<&NodeId>,
        limit: usize,
    ) -> Vec<Seed<'g>> {
        let query: BTreeSet<String> = self.tokenizer.tokenize(text).into_iter().collect();
        if query.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<Seed<'g>> = graph
            .nodes()
            .filter(|n| !taken.contains(&n.id))
            .filter_map(|node| {
                let mut haystack = node.id.as_str().to_string();
                for key in [attr::NAME, attr::QUALIFIED_NAME, attr::PATH] {
                    if let Some(value) = node.attr_str(key) {
                        haystack.push(' ');
                        haystack.push_str(value);
                    }
                }
                let tokens: HashSet<String> = self.tokenizer.tokenize(&haystack).into_iter().collect();
                let hits = query.iter().filter(|t| tokens.contains(*t)).count();
                (hits > 0).then(|| Seed {
                    node,
                    score: hits as f32 / query.len() as f32,
                    source: SeedSource::Textual,
                })
            })
            .collect();

        sort_seeds(&mut matches);
        matches.truncate(limit);
        matches
    }

    fn assemble(&self, graph: &GraphStore, seeds: Vec<Seed<'_>>, mode: RetrievalMode) -> RankedSubgraph {
        let seed_ids: Vec<NodeId> = seeds.iter().map(|s| s.node.id.clone()).collect();
        let expansion = hybrid(
            graph,
            &seed_ids,
            &HybridConfig {
                bfs_depth: self.config.bfs_depth,
                dfs_depth: self.config.dfs_depth,
                max_nodes: self.config.max_nodes,
                deadline: self.config.timeout.and_then(|t| Instant::now().checked_add(t)),
                ..Default::default()
            },
        );

        let mut nodes: Vec<RankedNode> = seeds
            .iter()
            .map(|s| {
                let tags = expansion.get(&s.node.id);
                RankedNode {
                    id: s.node.id.clone(),
                    kind: s.node.kind,
                    score: Some(s.score),
                    seed: s.source,
                    bfs_distance: tags.and_then(|t| t.bfs_distance),
                    dfs_depth: tags.and_then(|t| t.dfs_depth),
                }
            })
            .collect();

        let mut selected: HashSet<NodeId> = seed_ids.into_iter().collect();
        for tagged in &expansion.nodes {
            if selected.contains(&tagged.id) {
                continue;
            }
            let Some(node) = graph.node(&tagged.id) else {
                continue;
            };
            selected.insert(tagged.id.clone());
            nodes.push(RankedNode {
                id: tagged.id.clone(),
                kind: node.kind,
                score: None,
                seed: SeedSource::None,
                bfs_distance: tagged.bfs_distance,
                dfs_depth: tagged.dfs_depth,
            });
        }

        let edges = graph.induced_edges(&selected).into_iter().cloned().collect();
        RankedSubgraph {
            mode,
            nodes,
            edges,
            truncated: expansion.truncated,
        }
    }
}

/// Top-`k` embedded nodes by cosine similarity to `vector`.
fn similarity_seeds<'g>(graph: &'g GraphStore, vector: &[f32], k: usize) -> Vec<Seed<'g>> {
    if let Some(dimension) = graph.embedding_dimension() {
        if dimension != vector.len() {
            warn!(
                graph = dimension,
                query = vector.len(),
                "Query vector dimension differs from node embeddings"
            );
        }
    }

    let mut scored: Vec<Seed<'g>> = graph
        .nodes()
        .filter_map(|node| {
            let embedding = node.embedding.as_ref()?;
            (embedding.len() == vector.len()).then(|| Seed {
                node,
                score: cosine_similarity(vector, embedding),
                source: SeedSource::Similarity,
            })
        })
        .collect();

    sort_seeds(&mut scored);
    scored.truncate(k);
    scored
}

/// Score descending, then id ascending.
fn sort_seeds(seeds: &mut [Seed<'_>]) {
    seeds.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.node.id.cmp(&b.node.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attributes, Relationship};
    use serde_json::json;

    fn named(name: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(attr::NAME.into(), json!(name));
        attrs
    }

    /// login -> hash_password -> bcrypt, plus an unrelated render function.
    fn sample() -> GraphStore {
        let mut g = GraphStore::new();
        for name in ["login", "hash_password", "bcrypt", "render"] {
            g.add_node(NodeId::new(name), NodeKind::Function, named(name)).unwrap();
        }
        g.add_edge(NodeId::new("login"), NodeId::new("hash_password"), Relationship::Calls, Attributes::new())
            .unwrap();
        g.add_edge(NodeId::new("hash_password"), NodeId::new("bcrypt"), Relationship::Calls, Attributes::new())
            .unwrap();
        g
    }

    fn retriever() -> Retriever {
        Retriever::new(RetrievalConfig {
            timeout: None,
            ..Default::default()
        })
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_similarity_ranking_and_ties() {
        let mut g = sample();
        g.attach_embedding(&NodeId::new("render"), vec![1.0, 0.0]).unwrap();
        g.attach_embedding(&NodeId::new("login"), vec![0.0, 1.0]).unwrap();
        g.attach_embedding(&NodeId::new("bcrypt"), vec![0.0, 1.0]).unwrap();

        let result = retriever().retrieve(&g, &RetrievalQuery::from_vector(vec![0.0, 1.0]), Some(2));
        assert_eq!(result.mode, RetrievalMode::Semantic);
        let seeds: Vec<&str> = result.seeds().map(|n| n.id.as_str()).collect();
        // equal scores: ascending id
        assert_eq!(seeds, vec!["bcrypt", "login"]);
        // hash_password joins through expansion
        assert!(result.contains(&NodeId::new("hash_password")));
        assert!(!result.edges.is_empty());
    }

    #[test]
    fn test_structural_fallback() {
        let g = sample();
        let result = retriever().retrieve(&g, &RetrievalQuery::from_text("hash the password"), None);
        assert_eq!(result.mode, RetrievalMode::Structural);
        let first = &result.nodes[0];
        assert_eq!(first.id, NodeId::new("hash_password"));
        assert_eq!(first.seed, SeedSource::Textual);
        assert!(!result.contains(&NodeId::new("render")));
    }

    #[test]
    fn test_structural_seeds_are_not_capped_by_k() {
        let mut g = GraphStore::new();
        for name in ["user_create", "user_delete", "user_list", "render"] {
            g.add_node(NodeId::new(name), NodeKind::Function, named(name)).unwrap();
        }
        let result = retriever().retrieve(&g, &RetrievalQuery::from_text("user"), Some(1));

        assert_eq!(result.mode, RetrievalMode::Structural);
        let seeds: Vec<&str> = result.seeds().map(|n| n.id.as_str()).collect();
        assert_eq!(seeds, vec!["user_create", "user_delete", "user_list"]);
        assert!(result.seeds().all(|n| n.seed == SeedSource::Textual));
    }

    #[test]
    fn test_structural_seeds_stop_at_max_nodes() {
        let mut g = GraphStore::new();
        for name in ["user_create", "user_delete", "user_list"] {
            g.add_node(NodeId::new(name), NodeKind::Function, named(name)).unwrap();
        }
        let retriever = Retriever::new(RetrievalConfig {
            max_nodes: 2,
            timeout: None,
            ..Default::default()
        });
        let result = retriever.retrieve(&g, &RetrievalQuery::from_text("user"), Some(1));
        assert_eq!(result.seeds().count(), 2);
    }

    #[test]
    fn test_mixed_fill() {
        let mut g = sample();
        g.attach_embedding(&NodeId::new("bcrypt"), vec![1.0, 0.0]).unwrap();
        let query = RetrievalQuery::from_text("login render").with_vector(vec![1.0, 0.0]);
        let result = retriever().retrieve(&g, &query, Some(3));

        assert_eq!(result.mode, RetrievalMode::Mixed);
        let seeds: Vec<(&str, SeedSource)> = result.seeds().map(|n| (n.id.as_str(), n.seed)).collect();
        assert_eq!(
            seeds,
            vec![
                ("bcrypt", SeedSource::Similarity),
                ("login", SeedSource::Textual),
                ("render", SeedSource::Textual),
            ]
        );
    }

    #[test]
    fn test_expanded_nodes_follow_seeds() {
        let mut g = sample();
        g.attach_embedding(&NodeId::new("login"), vec![1.0]).unwrap();
        let result = retriever().retrieve(&g, &RetrievalQuery::from_vector(vec![1.0]), Some(1));

        let ids: Vec<&str> = result.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["login", "hash_password", "bcrypt"]);
        assert_eq!(result.nodes[1].bfs_distance, Some(1));
        assert_eq!(result.nodes[2].bfs_distance, Some(2));
        assert_eq!(result.edges.len(), 2);
    }

    #[test]
    fn test_empty_inputs() {
        let empty = retriever().retrieve(&GraphStore::new(), &RetrievalQuery::from_text("x"), None);
        assert!(empty.nodes.is_empty());

        let g = sample();
        let none = retriever().retrieve(&g, &RetrievalQuery::from_text("zzz"), None);
        assert!(none.nodes.is_empty());
        assert_eq!(none.mode, RetrievalMode::Structural);
    }

    #[test]
    fn test_text_query_with_embedder() {
        let embedder = Arc::new(HashingEmbedder::new(64));
        let mut g = sample();
        attach_embeddings(&mut g, embedder.as_ref()).unwrap();

        let retriever = retriever().with_embedder(embedder);
        let result = retriever.retrieve(&g, &RetrievalQuery::from_text("render"), Some(1));
        assert_eq!(result.mode, RetrievalMode::Semantic);
        assert_eq!(result.nodes[0].id, NodeId::new("render"));
    }
}
