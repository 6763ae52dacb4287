//! MCP server over stdio.
//!
//! Opens the engine, starts the background scheduler, serves the tools until
//! the client disconnects, then stops the scheduler.

use anyhow::Result;
use rmcp::ServiceExt;
use tokio_util::sync::CancellationToken;

use cairn::config::CairnConfig;
use cairn::engine::MemoryEngine;
use cairn::monitor::scheduler::Scheduler;

use crate::tools::CairnTools;

pub async fn serve_stdio(config: CairnConfig) -> Result<()> {
    tracing::info!("starting Cairn MCP server on stdio");

    let db_path = config.resolved_db_path();
    let scheduler_enabled = config.scheduler.enabled;
    let engine = MemoryEngine::open(config)?;
    tracing::info!(
        db = %db_path.display(),
        provider = engine.embedder().name(),
        dimension = engine.embedder().dimensions(),
        "engine ready"
    );

    let cancel = CancellationToken::new();
    let scheduler = scheduler_enabled.then(|| Scheduler::start(engine.clone(), cancel.clone()));

    let tools = CairnTools::new(engine);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    tokio::select! {
        quit = server.waiting() => {
            quit?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    tracing::info!("MCP server shut down");

    Ok(())
}
