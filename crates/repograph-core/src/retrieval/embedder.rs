//! Text embedding for graph nodes and queries.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::info;

use crate::graph::{attr, GraphError, GraphStore, Node};

/// Errors from embedding generation.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding failed: {0}")]
    Failed(String),

    #[error("Embedder returned {actual} vectors for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Trait for embedding generation.
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of text.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the model name.
    fn model_name(&self) -> &str;
}

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]+[a-z0-9]*|[a-z0-9]+").expect("token pattern is valid"));

/// Splits identifiers and prose into lowercase tokens.
///
/// `authenticateUser`, `authenticate_user` and `authenticate user` all yield
/// `["authenticate", "user"]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer;

impl Tokenizer {
    pub fn new() -> Self {
        Self
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        TOKEN_PATTERN
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each token is hashed into one of `dimension` buckets and the bucket
/// counts are L2-normalized. Needs no model download.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    tokenizer: Tokenizer,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            tokenizer: Tokenizer::new(),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in self.tokenizer.tokenize(text) {
            let bucket = token_hash(&token) as usize % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing-djb2"
    }
}

fn token_hash(token: &str) -> u32 {
    let mut hash = 5381u32;
    for byte in token.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    hash
}

/// Text that represents a node for embedding.
pub fn node_text(node: &Node) -> String {
    let mut parts = vec![node.kind.as_str(), node.name()];
    for key in [
        attr::QUALIFIED_NAME,
        attr::PATH,
        attr::DEFINING_FILE,
        attr::SIGNATURE,
        attr::DOC,
    ] {
        if let Some(value) = node.attr_str(key) {
            parts.push(value);
        }
    }
    parts.join(" ")
}

const EMBED_BATCH_SIZE: usize = 64;

/// Embed every node of a graph under construction.
///
/// Returns the number of nodes embedded.
pub fn attach_embeddings(store: &mut GraphStore, embedder: &dyn Embedder) -> Result<usize, EmbeddingError> {
    let items: Vec<_> = store.nodes().map(|n| (n.id.clone(), node_text(n))).collect();

    for chunk in items.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
        let vectors = embedder.embed(&texts)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        for ((id, _), vector) in chunk.iter().zip(vectors) {
            store.attach_embedding(id, vector)?;
        }
    }

    info!(
        nodes = items.len(),
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        "Embeddings attached"
    );
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attributes, NodeId, NodeKind};
    use serde_json::json;

    #[test]
    fn test_tokenize() {
        let tokenizer = Tokenizer::new();
        assert_eq!(tokenizer.tokenize("authenticateUser"), vec!["authenticate", "user"]);
        assert_eq!(tokenizer.tokenize("load_config()"), vec!["load", "config"]);
        assert_eq!(tokenizer.tokenize("src/auth.py"), vec!["src", "auth", "py"]);
        assert_eq!(tokenizer.tokenize("parse_HTML-file v2"), vec!["parse", "html", "file", "v2"]);
        assert!(Tokenizer::default().tokenize("--- ::").is_empty());
    }

    #[test]
    fn test_hashing_embedder_is_normalized_and_stable() {
        let embedder = HashingEmbedder::new(32);
        let a = embedder.embed(&["user login flow".to_string()]).unwrap();
        let b = embedder.embed(&["user login flow".to_string()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 32);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let empty = embedder.embed(&[String::new()]).unwrap();
        assert!(empty[0].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_attach_embeddings() {
        let mut store = GraphStore::new();
        let mut attrs = Attributes::new();
        attrs.insert(attr::NAME.into(), json!("login"));
        store
            .add_node(NodeId::new("function:a.py:login"), NodeKind::Function, attrs)
            .unwrap();
        store
            .add_node(NodeId::new("file:a.py"), NodeKind::File, Attributes::new())
            .unwrap();

        let count = attach_embeddings(&mut store, &HashingEmbedder::new(16)).unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.embedding_dimension(), Some(16));
        assert!(store.nodes().all(|n| n.embedding.is_some()));
    }

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![1.0]])
        }
        fn dimension(&self) -> usize {
            1
        }
        fn model_name(&self) -> &str {
            "short"
        }
    }

    #[test]
    fn test_count_mismatch() {
        let mut store = GraphStore::new();
        for id in ["a", "b"] {
            store.add_node(NodeId::new(id), NodeKind::File, Attributes::new()).unwrap();
        }
        let err = attach_embeddings(&mut store, &ShortEmbedder).unwrap_err();
        assert!(matches!(err, EmbeddingError::CountMismatch { expected: 2, actual: 1 }));
    }
}
