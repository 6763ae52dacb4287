mod cli;
mod server;
mod tools;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cairn::config::CairnConfig;
use cairn::engine::MemoryEngine;
use cairn::memory::prune::PruneStrategy;
use cairn::memory::types::{Scope, ScopeRef, SearchMode};

#[derive(Parser)]
#[command(name = "cairn", version, about = "Multi-scope memory MCP server for AI agents")]
struct Cli {
    /// Config file (default: ~/.cairn/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport) with background monitoring
    Serve,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Store a memory
    Write {
        text: String,
        #[arg(long, default_value = "global")]
        scope: Scope,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        importance: Option<f64>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Search memories
    Search {
        query: String,
        /// Scopes to search, as `scope` or `scope:owner` (repeatable)
        #[arg(long = "scope", default_value = "global")]
        scopes: Vec<String>,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(long, default_value = "merge")]
        mode: SearchMode,
    },
    /// Entry counts and sizes per scope
    Stats {
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(long)]
        owner: Option<String>,
    },
    /// List collections with their utilization
    Collections,
    /// Metrics, health status and alerts
    Report {
        #[arg(long)]
        json: bool,
    },
    /// Prune a scope (dry run unless --commit)
    Optimize {
        scope: Scope,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value = "hybrid")]
        strategy: PruneStrategy,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        commit: bool,
    },
    /// Run database diagnostics
    Doctor,
    /// Compact the database file
    Vacuum,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the ONNX embedding model to ~/.cairn/models/
    Download,
}

/// `scope` or `scope:owner`.
fn parse_scope_ref(s: &str) -> Result<ScopeRef> {
    let (scope, owner) = match s.split_once(':') {
        Some((scope, owner)) => (scope, Some(owner)),
        None => (s, None),
    };
    let scope: Scope = scope.parse().map_err(anyhow::Error::msg)?;
    Ok(ScopeRef::new(scope, owner))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CairnConfig::load_from(path),
        None => CairnConfig::load(),
    }
    .context("failed to load configuration")?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => server::serve_stdio(config).await?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Write {
            text,
            scope,
            owner,
            importance,
            tags,
        } => {
            let engine = MemoryEngine::open(config)?;
            cli::write::write(&engine, scope, owner.as_deref(), &text, importance, tags).await?
        }
        Command::Search {
            query,
            scopes,
            k,
            min_score,
            mode,
        } => {
            let scopes = scopes.iter().map(|s| parse_scope_ref(s)).collect::<Result<Vec<_>>>()?;
            let engine = MemoryEngine::open(config)?;
            cli::search::search(&engine, &query, scopes, k, min_score, mode).await?
        }
        Command::Stats { scope, owner } => {
            let engine = MemoryEngine::open(config)?;
            cli::stats::stats(&engine, scope, owner.as_deref()).await?
        }
        Command::Collections => cli::stats::collections(&MemoryEngine::open(config)?).await?,
        Command::Report { json } => cli::report::report(&MemoryEngine::open(config)?, json).await?,
        Command::Optimize {
            scope,
            owner,
            strategy,
            limit,
            commit,
        } => {
            let engine = MemoryEngine::open(config)?;
            cli::optimize::optimize(&engine, scope, owner, strategy, limit, !commit).await?
        }
        Command::Vacuum => cli::optimize::vacuum(&MemoryEngine::open(config)?).await?,
    }

    Ok(())
}
