use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct OptimizeMemoryParams {
    #[schemars(description = "Scope to prune")]
    pub scope: String,

    #[schemars(description = "Prune only this owner's collection. Omit to prune the whole scope.")]
    pub owner_key: Option<String>,

    #[schemars(description = "'lru', 'importance', 'frequency' or 'hybrid' (default)")]
    pub strategy: Option<String>,

    #[schemars(description = "Target entry count. Defaults to the capacity limit.")]
    pub limit: Option<usize>,

    #[schemars(description = "Only report what would be removed. Defaults to true.")]
    pub dry_run: Option<bool>,
}
