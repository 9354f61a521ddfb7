mod build;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use repograph_core::config::DEFAULT_EMBEDDING_DIMENSION;
use repograph_core::impact::{ImpactAnalyzer, ImpactConfig};
use repograph_core::retrieval::{HashingEmbedder, RetrievalConfig};
use repograph_core::{
    export_visual, Config, GraphSession, GraphStore, NodeId, NodeKind, Relationship,
    RetrievalQuery, Retriever,
};

#[derive(Parser)]
#[command(name = "repograph")]
#[command(about = "Code property graph with impact analysis and retrieval", long_about = None)]
struct Cli {
    /// Config file (defaults to ./repograph.toml, then the user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot path (defaults to <data_dir>/<snapshot_file>)
    #[arg(short, long, global = true)]
    snapshot: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the graph from parser fact streams (JSON lines)
    Build {
        /// Fact files
        files: Vec<PathBuf>,

        /// Directory searched for *.jsonl / *.ndjson fact files
        #[arg(long)]
        facts_dir: Option<PathBuf>,
    },
    /// Estimate what is affected by changing a node
    Impact {
        /// Node id or unique name
        target: String,

        /// Depth limit of the reverse walks
        #[arg(long)]
        depth: Option<usize>,
    },
    /// List what a node depends on
    Deps {
        /// Node id or unique name
        target: String,

        #[arg(long)]
        depth: Option<usize>,
    },
    /// Retrieve the subgraph most relevant to a query
    Retrieve {
        #[arg(required = true)]
        query: Vec<String>,

        /// Number of seed nodes
        #[arg(short)]
        k: Option<usize>,
    },
    /// Export the graph for visualization
    Export {
        /// Keep only these node kinds
        #[arg(long = "kind", value_delimiter = ',')]
        kinds: Vec<NodeKind>,

        /// Keep only these relationships
        #[arg(long = "relationship", value_delimiter = ',')]
        relationships: Vec<Relationship>,
    },
    /// Show graph statistics
    Stats,
    /// Write a default repograph.toml
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .wrap_err_with(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };
    let snapshot = cli
        .snapshot
        .clone()
        .unwrap_or_else(|| config.storage.snapshot_path());

    match cli.command {
        Commands::Build { files, facts_dir } => {
            let sources = build::collect_sources(files, facts_dir.as_deref());
            build::run(&config, sources, &snapshot).await?;
        }
        Commands::Impact { target, depth } => {
            let session = open_session(&snapshot)?;
            let graph = session.current();
            let target = resolve_target(&graph, &target)?;
            let analyzer = ImpactAnalyzer::new(ImpactConfig::from_settings(&config.impact, &config.traversal));
            print_json(&analyzer.analyze(&graph, &target, depth)?)?;
        }
        Commands::Deps { target, depth } => {
            let session = open_session(&snapshot)?;
            let graph = session.current();
            let target = resolve_target(&graph, &target)?;
            let analyzer = ImpactAnalyzer::new(ImpactConfig::from_settings(&config.impact, &config.traversal));
            print_json(&analyzer.dependencies(&graph, &target, depth)?)?;
        }
        Commands::Retrieve { query, k } => {
            let session = open_session(&snapshot)?;
            let graph = session.current();
            let dimension = graph
                .embedding_dimension()
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSION);
            let retriever = Retriever::new(RetrievalConfig::from_settings(&config.retrieval, &config.traversal))
                .with_embedder(Arc::new(HashingEmbedder::new(dimension)));
            let result = retriever.retrieve(&graph, &RetrievalQuery::from_text(query.join(" ")), k);
            print_json(&result)?;
        }
        Commands::Export { kinds, relationships } => {
            let session = open_session(&snapshot)?;
            let graph = session.current();
            let kinds = (!kinds.is_empty()).then_some(kinds.as_slice());
            let relationships = (!relationships.is_empty()).then_some(relationships.as_slice());
            print_json(&export_visual(&graph, kinds, relationships))?;
        }
        Commands::Stats => {
            let session = open_session(&snapshot)?;
            print_json(&session.current().stats())?;
        }
        Commands::InitConfig { force } => {
            let path = Path::new("repograph.toml");
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            std::fs::write(path, Config::default_config_string())
                .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_session(path: &Path) -> Result<GraphSession> {
    if !path.exists() {
        bail!(
            "No graph snapshot at {}. Run `repograph build` first.",
            path.display()
        );
    }
    GraphSession::open(path).wrap_err_with(|| format!("Failed to load snapshot {}", path.display()))
}

/// Accept a node id, or a name that identifies exactly one node.
fn resolve_target(graph: &GraphStore, target: &str) -> Result<NodeId> {
    let id = NodeId::new(target);
    if graph.contains_node(&id) {
        return Ok(id);
    }

    let candidates = graph.find_by_name(target);
    match candidates.as_slice() {
        [] => Err(eyre!("No node with id or name '{}'", target)),
        [node] => Ok(node.id.clone()),
        many => {
            let ids: Vec<&str> = many.iter().map(|n| n.id.as_str()).collect();
            Err(eyre!(
                "'{}' is ambiguous; use one of:\n  {}",
                target,
                ids.join("\n  ")
            ))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
