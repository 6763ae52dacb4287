//! MCP `write_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WriteMemoryParams {
    #[schemars(description = "The natural language text to remember")]
    pub text: String,

    #[schemars(
        description = "Scope: 'global', 'project', 'agent', 'thread', 'objectives' or 'artifacts'"
    )]
    pub scope: String,

    #[schemars(description = "Owner within the scope (project id, agent id, thread id...). Required for every scope except 'global'.")]
    pub owner_key: Option<String>,

    #[schemars(description = "Importance 0.0-1.0, used by pruning. Defaults to 0.5.")]
    pub importance: Option<f64>,

    #[schemars(description = "Free-form tags")]
    pub tags: Option<Vec<String>>,

    #[schemars(description = "Provenance, e.g. {\"file\": \"src/main.rs\"}")]
    pub sources: Option<BTreeMap<String, String>>,

    #[schemars(description = "Optional JSON metadata blob stored with the entry")]
    pub metadata: Option<serde_json::Value>,
}
