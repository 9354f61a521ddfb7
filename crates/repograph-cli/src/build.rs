//! The `build` command: read fact streams concurrently, build, embed, persist.

use color_eyre::eyre::{bail, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use repograph_core::builder::{BuildReport, GraphBuilder};
use repograph_core::facts::{read_fact_stream, FactBatch, FactError};
use repograph_core::retrieval::{attach_embeddings, Embedder, HashingEmbedder};
use repograph_core::snapshot::{save_snapshot, SnapshotInfo};
use repograph_core::Config;

/// Extensions recognized as fact streams when walking a directory.
const FACT_EXTENSIONS: &[&str] = &["jsonl", "ndjson"];

#[derive(Serialize)]
struct BuildOutput {
    report: BuildReport,
    snapshot: SnapshotInfo,
    embedding_model: String,
}

/// Fact files named explicitly plus every fact stream under `facts_dir`.
pub fn collect_sources(files: Vec<PathBuf>, facts_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut sources = files;

    if let Some(dir) = facts_dir {
        let walker = WalkBuilder::new(dir).hidden(true).git_ignore(true).build();
        for entry in walker.flatten() {
            let path = entry.path();
            let is_fact_stream = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| FACT_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if path.is_file() && is_fact_stream {
                sources.push(path.to_path_buf());
            }
        }
    }

    sources.sort();
    sources.dedup();
    sources
}

fn read_source(path: &Path) -> Result<FactBatch, FactError> {
    let name = path.display().to_string();
    let file = File::open(path).map_err(|e| FactError::FactStreamUnreadable {
        source_name: name.clone(),
        source: e,
    })?;
    read_fact_stream(&name, BufReader::new(file))
}

fn progress_bar(total: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    pb.set_message("reading facts");
    Ok(pb)
}

/// Build a graph from `sources` and write its snapshot to `output`.
pub async fn run(config: &Config, sources: Vec<PathBuf>, output: &Path) -> Result<()> {
    if sources.is_empty() {
        bail!("No fact files given. Pass files or --facts-dir.");
    }

    // one worker per fact file, each filling a private batch
    let pb = progress_bar(sources.len() as u64)?;
    let mut pending: FuturesUnordered<_> = sources
        .into_iter()
        .map(|path| tokio::task::spawn_blocking(move || read_source(&path)))
        .collect();

    let mut builder = GraphBuilder::new(config.builder.clone());
    while let Some(joined) = pending.next().await {
        let batch = joined??;
        debug!(
            facts = batch.facts.len(),
            failures = batch.failures.len(),
            "Fact batch read"
        );
        builder.ingest(batch);
        pb.inc(1);
    }
    pb.finish_with_message("facts read");

    let (mut store, report) = builder.build();
    let embedder = HashingEmbedder::new(config.retrieval.embedding_dimension);
    attach_embeddings(&mut store, &embedder)?;
    let graph = store.freeze_with_id(report.graph_id);

    let snapshot = save_snapshot(&graph, output)?;
    info!(path = %output.display(), "Graph ready");
    eprint!("{}", report);

    let out = BuildOutput {
        report,
        snapshot,
        embedding_model: format!("{}/{}", embedder.model_name(), embedder.dimension()),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
