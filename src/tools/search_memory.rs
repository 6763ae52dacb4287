//! MCP `search_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One scope to search, optionally narrowed to a single owner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScopeParam {
    #[schemars(description = "Scope name, e.g. 'project'")]
    pub scope: String,

    #[schemars(description = "Owner key. Omit to search every owner's collection in the scope.")]
    pub owner_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Scopes to search. At least one is required.")]
    pub scopes: Vec<ScopeParam>,

    #[schemars(description = "Maximum number of results. Defaults to 5.")]
    pub k: Option<usize>,

    #[schemars(description = "Drop results whose fused score (0.0-1.0) is below this. Defaults to 0.0.")]
    pub min_score: Option<f64>,

    #[schemars(
        description = "'merge' ranks all scopes together (default); 'tiered' walks thread, project, objectives, agent, global, artifacts and stops once k results are found"
    )]
    pub mode: Option<String>,
}
