//! Core memory type definitions.
//!
//! Defines [`Scope`] (the six fixed partitions), [`ScopeRef`] (a scope plus
//! optional owner key), [`MemoryEntry`] (a stored record), its
//! [`EntryMetadata`], and the caller-supplied [`WriteMetadata`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The six memory partitions. Fixed at write time; entries never move between scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Process-wide knowledge. A single collection with no owner.
    Global,
    /// One collection per project id.
    Project,
    /// One collection per agent id.
    Agent,
    /// One collection per conversation thread.
    Thread,
    /// Goals and decisions, keyed by owner (usually a project).
    Objectives,
    /// Produced artifacts (files, diffs, reports), keyed by owner.
    Artifacts,
}

impl Scope {
    pub const ALL: [Scope; 6] = [
        Scope::Global,
        Scope::Project,
        Scope::Agent,
        Scope::Thread,
        Scope::Objectives,
        Scope::Artifacts,
    ];

    /// Fixed priority order used by tiered search. Artifacts is not part of the
    /// tier list and is searched last when requested.
    pub const TIER_ORDER: [Scope; 6] = [
        Scope::Thread,
        Scope::Project,
        Scope::Objectives,
        Scope::Agent,
        Scope::Global,
        Scope::Artifacts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Agent => "agent",
            Self::Thread => "thread",
            Self::Objectives => "objectives",
            Self::Artifacts => "artifacts",
        }
    }

    /// Whether collections in this scope are partitioned by owner key.
    pub fn is_owned(&self) -> bool {
        !matches!(self, Self::Global)
    }

    pub fn tier(&self) -> usize {
        Self::TIER_ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::TIER_ORDER.len())
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            "agent" => Ok(Self::Agent),
            "thread" => Ok(Self::Thread),
            "objectives" => Ok(Self::Objectives),
            "artifacts" => Ok(Self::Artifacts),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

/// A scope plus optional owner key.
///
/// With an owner, a ref names exactly one collection. Without one, it covers
/// every collection of the scope (for `Global` that is always the single
/// `global` collection).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeRef {
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<String>,
}

impl ScopeRef {
    pub fn new(scope: Scope, owner_key: Option<&str>) -> Self {
        let owner_key = if scope.is_owned() {
            owner_key.map(str::to_string)
        } else {
            None
        };
        Self { scope, owner_key }
    }

    pub fn global() -> Self {
        Self::new(Scope::Global, None)
    }

    pub fn owned(scope: Scope, owner_key: &str) -> Self {
        Self::new(scope, Some(owner_key))
    }

    pub fn whole(scope: Scope) -> Self {
        Self::new(scope, None)
    }
}

impl std::fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner_key {
            Some(owner) => write!(f, "{}/{}", self.scope, owner),
            None => write!(f, "{}", self.scope),
        }
    }
}

/// Caller-supplied metadata for a write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteMetadata {
    /// Importance in `[0.0, 1.0]`. Falls back to the configured default.
    #[serde(default)]
    pub importance: Option<f64>,
    /// Source references such as `thread_id` or `commit`.
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form JSON carried through untouched.
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

/// Metadata stored with every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub importance: f64,
    pub sources: BTreeMap<String, String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl EntryMetadata {
    /// Last access, or creation time for entries never read.
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }
}

/// The JSON document persisted in `memory_entries.metadata`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredMetadata {
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// A stored memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// UUID v7, assigned at write time.
    pub id: String,
    pub text: String,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<String>,
    /// Name of the collection holding this entry.
    pub collection: String,
    pub metadata: EntryMetadata,
    /// Dense embedding, present only when it was requested from the vector store.
    #[serde(skip)]
    pub vector: Option<Vec<f32>>,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entry: MemoryEntry,
    /// Fused score normalized to `(0.0, 1.0]`: 1.0 means rank 1 in both lists.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_rank: Option<usize>,
}

/// How results from several scopes are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Fuse every requested scope and keep the global top `k`.
    #[default]
    Merge,
    /// Walk scopes in tier order and stop once `k` results are gathered.
    Tiered,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merge" | "fusion" => Ok(Self::Merge),
            "tiered" => Ok(Self::Tiered),
            _ => Err(format!("unknown search mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub scopes: Vec<ScopeRef>,
    pub k: usize,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub mode: SearchMode,
}

/// Cheap aggregate over the collections a [`ScopeRef`] covers.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStats {
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<String>,
    pub collections: usize,
    pub entry_count: u64,
    pub size_estimate_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_str() {
        for scope in Scope::ALL {
            assert_eq!(scope.as_str().parse::<Scope>().unwrap(), scope);
        }
        assert_eq!("Project".parse::<Scope>().unwrap(), Scope::Project);
        assert!("team".parse::<Scope>().is_err());
    }

    #[test]
    fn tier_order_puts_thread_first_and_artifacts_last() {
        assert_eq!(Scope::Thread.tier(), 0);
        assert_eq!(Scope::Project.tier(), 1);
        assert_eq!(Scope::Objectives.tier(), 2);
        assert_eq!(Scope::Agent.tier(), 3);
        assert_eq!(Scope::Global.tier(), 4);
        assert_eq!(Scope::Artifacts.tier(), 5);
    }

    #[test]
    fn global_ref_drops_owner() {
        let r = ScopeRef::new(Scope::Global, Some("alpha"));
        assert_eq!(r.owner_key, None);
        let r = ScopeRef::owned(Scope::Agent, "planner");
        assert_eq!(r.owner_key.as_deref(), Some("planner"));
        assert_eq!(r.to_string(), "agent/planner");
    }

    #[test]
    fn recency_falls_back_to_created_at() {
        let created = Utc::now();
        let meta = EntryMetadata {
            created_at: created,
            last_accessed_at: None,
            access_count: 0,
            importance: 0.5,
            sources: BTreeMap::new(),
            tags: vec![],
            extra: None,
        };
        assert_eq!(meta.recency(), created);
    }
}
