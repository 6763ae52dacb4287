//! Strategy-selectable eviction.
//!
//! [`prune`] is single-shot: for each collection of a scope (or just one
//! owner's), order its entries "most removable first" with one of four pure
//! ranking functions, and take the first `count - limit`. Dry-run and commit
//! share that selection; only commit deletes. [`PruneLocks`] gives at most one
//! prune per scope at a time.

use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::{CairnConfig, PruningConfig};
use crate::error::{MemoryError, Result};
use crate::memory::types::Scope;
use crate::memory::{registry, store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneStrategy {
    /// Least recently accessed first.
    Lru,
    /// Lowest importance first.
    Importance,
    /// Fewest accesses first.
    Frequency,
    /// Weighted sum of the three ranks above.
    #[default]
    Hybrid,
}

impl PruneStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Importance => "importance",
            Self::Frequency => "frequency",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for PruneStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PruneStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "importance" => Ok(Self::Importance),
            "frequency" | "lfu" => Ok(Self::Frequency),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("unknown prune strategy: {s}")),
        }
    }
}

/// Who asked for the prune. Automatic prunes are audited separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneTrigger {
    Manual,
    Automatic,
}

impl PruneTrigger {
    fn audit_operation(&self) -> &'static str {
        match self {
            Self::Manual => "prune",
            Self::Automatic => "auto_prune",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrunePlan {
    pub scope: Scope,
    /// Restrict to one owner's collection. `None` prunes every collection in the scope.
    pub owner_key: Option<String>,
    pub strategy: PruneStrategy,
    /// Target entry count per collection. Defaults to each collection's capacity limit.
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub trigger: PruneTrigger,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruningResult {
    pub strategy: PruneStrategy,
    pub dry_run: bool,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<String>,
    pub trigger: PruneTrigger,
    /// Target entry count applied to each collection.
    pub limit: usize,
    /// Entries present when the prune started.
    pub entries_examined: u64,
    /// Entries selected for removal. Identical for dry-run and commit.
    pub candidates_considered: u64,
    pub entries_removed: u64,
    pub candidate_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// The fields the ranking functions look at.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneCandidate {
    pub seq: i64,
    pub id: String,
    pub collection: String,
    pub importance: f64,
    pub access_count: u64,
    /// `last_accessed_at`, or `created_at` when never read (fixed-width RFC 3339).
    pub recency: String,
}

/// Order candidates most-removable first. Ties fall back to insertion order.
pub fn rank_candidates(strategy: PruneStrategy, weights: &PruningConfig, candidates: &mut [PruneCandidate]) {
    match strategy {
        PruneStrategy::Lru => candidates.sort_by(|a, b| a.recency.cmp(&b.recency).then(a.seq.cmp(&b.seq))),
        PruneStrategy::Importance => candidates.sort_by(|a, b| {
            a.importance
                .total_cmp(&b.importance)
                .then(a.seq.cmp(&b.seq))
        }),
        PruneStrategy::Frequency => candidates.sort_by(|a, b| {
            a.access_count
                .cmp(&b.access_count)
                .then(a.seq.cmp(&b.seq))
        }),
        PruneStrategy::Hybrid => {
            let recency = tied_ranks(candidates, |a, b| a.recency.cmp(&b.recency));
            let importance = tied_ranks(candidates, |a, b| a.importance.total_cmp(&b.importance));
            let frequency = tied_ranks(candidates, |a, b| a.access_count.cmp(&b.access_count));

            let mut scored: Vec<(f64, PruneCandidate)> = candidates
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let score = weights.recency_weight * recency[i] as f64
                        + weights.importance_weight * importance[i] as f64
                        + weights.frequency_weight * frequency[i] as f64;
                    (score, c.clone())
                })
                .collect();
            scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.seq.cmp(&b.1.seq)));
            for (slot, (_, c)) in candidates.iter_mut().zip(scored) {
                *slot = c;
            }
        }
    }
}

/// Competition ranks (`0` = most removable); equal keys share a rank.
fn tied_ranks<F>(candidates: &[PruneCandidate], cmp: F) -> Vec<usize>
where
    F: Fn(&PruneCandidate, &PruneCandidate) -> std::cmp::Ordering,
{
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| cmp(&candidates[a], &candidates[b]));

    let mut ranks = vec![0; candidates.len()];
    for (pos, &idx) in order.iter().enumerate() {
        ranks[idx] = if pos > 0 && cmp(&candidates[order[pos - 1]], &candidates[idx]).is_eq() {
            ranks[order[pos - 1]]
        } else {
            pos
        };
    }
    ranks
}

/// In every collection the plan covers, select the `count - limit` most
/// removable entries and, unless dry-run, delete them. Each collection is
/// held to its own limit; nothing is pooled across owners.
pub fn prune(conn: &mut Connection, plan: &PrunePlan, config: &CairnConfig) -> Result<PruningResult> {
    let started_at = Utc::now();
    let collections = registry::collections_for(conn, plan.scope, plan.owner_key.as_deref())?;

    let limit = match (plan.limit, plan.owner_key.is_some(), collections.first()) {
        (Some(limit), _, _) => limit,
        (None, true, Some(handle)) => handle.capacity_limit,
        (None, _, _) => config.capacity.limit_for(plan.scope),
    };

    let mut examined = 0u64;
    let mut candidates = Vec::new();
    for handle in &collections {
        let mut pool = load_candidates(conn, &[handle.name.as_str()])?;
        examined += pool.len() as u64;
        let excess = pool.len().saturating_sub(plan.limit.unwrap_or(handle.capacity_limit));
        rank_candidates(plan.strategy, &config.pruning, &mut pool);
        pool.truncate(excess);
        candidates.extend(pool);
    }

    let mut removed = 0u64;
    if !plan.dry_run && !candidates.is_empty() {
        let tx = conn.transaction()?;
        for c in &candidates {
            store::delete_entry(&tx, &c.collection, &c.id, c.seq)?;
            store::write_audit_log(
                &tx,
                plan.trigger.audit_operation(),
                &c.id,
                Some(&serde_json::json!({
                    "collection": c.collection,
                    "strategy": plan.strategy.as_str(),
                })),
            )?;
            removed += 1;
        }
        tx.commit()?;
    }

    let result = PruningResult {
        strategy: plan.strategy,
        dry_run: plan.dry_run,
        scope: plan.scope,
        owner_key: plan.owner_key.clone(),
        trigger: plan.trigger,
        limit,
        entries_examined: examined,
        candidates_considered: candidates.len() as u64,
        entries_removed: removed,
        candidate_ids: candidates.into_iter().map(|c| c.id).collect(),
        started_at,
        completed_at: Utc::now(),
    };

    match plan.trigger {
        PruneTrigger::Automatic => tracing::info!(
            target: "cairn::auto_prune",
            scope = %result.scope,
            owner = ?result.owner_key,
            strategy = %result.strategy,
            limit = result.limit,
            removed = result.entries_removed,
            "automatic prune completed"
        ),
        PruneTrigger::Manual => tracing::info!(
            scope = %result.scope,
            owner = ?result.owner_key,
            strategy = %result.strategy,
            dry_run = result.dry_run,
            limit = result.limit,
            candidates = result.candidates_considered,
            removed = result.entries_removed,
            "prune completed"
        ),
    }

    Ok(result)
}

fn load_candidates(conn: &Connection, collections: &[&str]) -> Result<Vec<PruneCandidate>> {
    if collections.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=collections.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT seq, id, collection, importance, access_count, COALESCE(last_accessed_at, created_at) \
         FROM memory_entries WHERE collection IN ({}) ORDER BY seq",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(collections.iter()), |row| {
            Ok(PruneCandidate {
                seq: row.get(0)?,
                id: row.get(1)?,
                collection: row.get(2)?,
                importance: row.get(3)?,
                access_count: row.get::<_, i64>(4)?.max(0) as u64,
                recency: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Per-scope prune exclusion. A busy scope rejects instead of queueing.
#[derive(Debug, Clone, Default)]
pub struct PruneLocks {
    active: Arc<Mutex<HashSet<Scope>>>,
}

/// Held for the duration of one prune; releases the scope on drop.
#[derive(Debug)]
pub struct PruneLease {
    scope: Scope,
    active: Arc<Mutex<HashSet<Scope>>>,
}

impl PruneLocks {
    pub fn try_acquire(&self, scope: Scope) -> Result<PruneLease> {
        let mut active = self
            .active
            .lock()
            .map_err(|e| MemoryError::Task(format!("prune lock poisoned: {e}")))?;
        if !active.insert(scope) {
            return Err(MemoryError::PruneInProgress(scope));
        }
        Ok(PruneLease {
            scope,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, scope: Scope) -> bool {
        self.active
            .lock()
            .map(|a| a.contains(&scope))
            .unwrap_or(false)
    }
}

impl Drop for PruneLease {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.scope);
    }
}
