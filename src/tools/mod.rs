pub mod optimize_memory;
pub mod search_memory;
pub mod write_memory;

use optimize_memory::OptimizeMemoryParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search_memory::SearchMemoryParams;
use write_memory::WriteMemoryParams;

use cairn::engine::MemoryEngine;
use cairn::error::MemoryError;
use cairn::memory::prune::{PrunePlan, PruneStrategy, PruneTrigger};
use cairn::memory::types::{Scope, ScopeRef, SearchMode, SearchRequest, WriteMetadata};

/// The Cairn MCP tool handler. Every tool is a thin shim over [`MemoryEngine`].
#[derive(Clone)]
pub struct CairnTools {
    tool_router: ToolRouter<Self>,
    engine: MemoryEngine,
}

/// Errors cross the MCP boundary as `{"error": <code>, "message": ...}`.
fn tool_error(e: MemoryError) -> String {
    serde_json::json!({ "error": e.code(), "message": e.to_string() }).to_string()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| tool_error(e.into()))
}

fn parse_scope(s: &str) -> Result<Scope, String> {
    s.parse::<Scope>().map_err(|e| tool_error(MemoryError::InvalidRequest(e)))
}

#[tool_router]
impl CairnTools {
    pub fn new(engine: MemoryEngine) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    /// Store a new memory in one scope.
    #[tool(description = "Store a memory in a scope: global (shared), project, agent, thread, objectives or artifacts. Every scope except global needs an owner_key.")]
    async fn write_memory(
        &self,
        Parameters(params): Parameters<WriteMemoryParams>,
    ) -> Result<String, String> {
        let scope = parse_scope(&params.scope)?;
        tracing::info!(
            text_len = params.text.len(),
            scope = %scope,
            owner = ?params.owner_key,
            "write_memory called"
        );

        let metadata = WriteMetadata {
            importance: params.importance,
            sources: params.sources.unwrap_or_default(),
            tags: params.tags.unwrap_or_default(),
            extra: params.metadata,
        };
        let id = self
            .engine
            .write(scope, params.owner_key.as_deref(), &params.text, metadata)
            .await
            .map_err(tool_error)?;

        Ok(serde_json::json!({ "id": id }).to_string())
    }

    /// Hybrid dense + lexical search.
    #[tool(description = "Search memories by natural language query across one or more scopes. Returns ranked results fused from vector and keyword search.")]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchMemoryParams>,
    ) -> Result<String, String> {
        let retrieval = &self.engine.config().retrieval;
        let mut scopes = Vec::with_capacity(params.scopes.len());
        for s in &params.scopes {
            scopes.push(ScopeRef::new(parse_scope(&s.scope)?, s.owner_key.as_deref()));
        }
        let mode = match params.mode.as_deref() {
            Some(m) => m
                .parse::<SearchMode>()
                .map_err(|e| tool_error(MemoryError::InvalidRequest(e)))?,
            None => SearchMode::default(),
        };

        tracing::info!(query = %params.query, scopes = scopes.len(), "search_memory called");

        let hits = self
            .engine
            .search(SearchRequest {
                query: params.query,
                scopes,
                k: params.k.unwrap_or(retrieval.default_k),
                min_score: params.min_score.unwrap_or(retrieval.default_min_score),
                mode,
            })
            .await
            .map_err(tool_error)?;

        to_json(&serde_json::json!({ "total": hits.len(), "results": hits }))
    }

    /// Metrics, health and embedding status in one document.
    #[tool(description = "Report memory analytics: per-scope counts and sizes, utilization, latencies, cache-hit ratio, fragmentation, health status and alerts.")]
    async fn memory_report(&self) -> Result<String, String> {
        tracing::info!("memory_report called");
        let report = self.engine.report().await.map_err(tool_error)?;
        to_json(&report)
    }

    /// Strategy-driven pruning.
    #[tool(description = "Prune a scope down to its capacity limit (or a given limit). Strategies: lru, importance, frequency, hybrid. dry_run defaults to true.")]
    async fn optimize_memory(
        &self,
        Parameters(params): Parameters<OptimizeMemoryParams>,
    ) -> Result<String, String> {
        let scope = parse_scope(&params.scope)?;
        let strategy = match params.strategy.as_deref() {
            Some(s) => s
                .parse::<PruneStrategy>()
                .map_err(|e| tool_error(MemoryError::InvalidRequest(e)))?,
            None => PruneStrategy::default(),
        };
        let dry_run = params.dry_run.unwrap_or(true);

        tracing::info!(scope = %scope, strategy = %strategy, dry_run, "optimize_memory called");

        let result = match (params.owner_key, params.limit) {
            (None, None) => self.engine.optimize(scope, strategy, dry_run).await,
            (owner_key, limit) => {
                self.engine
                    .prune(PrunePlan {
                        scope,
                        owner_key,
                        strategy,
                        limit,
                        dry_run,
                        trigger: PruneTrigger::Manual,
                    })
                    .await
            }
        }
        .map_err(tool_error)?;

        to_json(&result)
    }
}

#[tool_handler]
impl ServerHandler for CairnTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Cairn is a multi-scope memory server. Use write_memory to save, \
                 search_memory to recall, memory_report for analytics and \
                 optimize_memory to prune."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
