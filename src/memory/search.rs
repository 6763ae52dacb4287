//! Hybrid retrieval: dense KNN + sparse BM25 per collection, fused with
//! Reciprocal Rank Fusion, merged across collections.
//!
//! Fused scores are normalized by the best attainable RRF score, `2/(κ+1)`,
//! so a hit ranked first in both lists scores `1.0` and a hit ranked first in
//! only one list scores `0.5`.

use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};
use crate::memory::registry::{self, CollectionHandle};
use crate::memory::types::{MemoryEntry, Scope, ScopeRef, SearchHit, SearchMode};
use crate::memory::vector::{PayloadFilter, SqliteVectorStore, VectorStore};
use crate::memory::{lexical, store};

/// Hard ceiling on per-path candidates. sqlite-vec refuses KNN queries above it.
pub const MAX_CANDIDATES: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct HybridParams {
    pub k: usize,
    pub candidate_multiplier: usize,
    pub rrf_k: usize,
}

impl HybridParams {
    /// Per-path candidate count `m`, with `min(k, MAX_CANDIDATES) <= m <= MAX_CANDIDATES`.
    pub fn candidates(&self) -> usize {
        self.k
            .saturating_mul(self.candidate_multiplier.max(1))
            .clamp(self.k.min(MAX_CANDIDATES), MAX_CANDIDATES)
    }
}

#[derive(Debug)]
pub struct HybridOutcome {
    pub hits: Vec<SearchHit>,
    /// At least one collection was served by a single retrieval path.
    pub degraded: bool,
}

/// One id's fused result within a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    pub id: String,
    pub score: f64,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
}

/// Reciprocal Rank Fusion over two ranked id lists (best first).
///
/// Ranks are 1-based; each appearance contributes `1/(rank + κ)`. The result
/// is normalized and sorted best first, ties broken by best single rank then id.
pub fn rrf_fuse(dense: &[String], sparse: &[String], kappa: usize) -> Vec<Fused> {
    let kappa = kappa as f64;
    let best = 2.0 / (kappa + 1.0);
    let mut fused: HashMap<&str, Fused> = HashMap::new();

    for (i, id) in dense.iter().enumerate() {
        let rank = i + 1;
        let slot = fused.entry(id.as_str()).or_insert_with(|| Fused {
            id: id.clone(),
            score: 0.0,
            dense_rank: None,
            sparse_rank: None,
        });
        if slot.dense_rank.is_none() {
            slot.dense_rank = Some(rank);
            slot.score += 1.0 / (rank as f64 + kappa);
        }
    }
    for (i, id) in sparse.iter().enumerate() {
        let rank = i + 1;
        let slot = fused.entry(id.as_str()).or_insert_with(|| Fused {
            id: id.clone(),
            score: 0.0,
            dense_rank: None,
            sparse_rank: None,
        });
        if slot.sparse_rank.is_none() {
            slot.sparse_rank = Some(rank);
            slot.score += 1.0 / (rank as f64 + kappa);
        }
    }

    let mut out: Vec<Fused> = fused
        .into_values()
        .map(|mut f| {
            f.score /= best;
            f
        })
        .collect();
    out.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| best_rank(a).cmp(&best_rank(b)))
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

fn best_rank(f: &Fused) -> usize {
    f.dense_rank
        .into_iter()
        .chain(f.sparse_rank)
        .min()
        .unwrap_or(usize::MAX)
}

/// Sort hits best first: fused score, then most recent access, then id.
pub fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.entry.metadata.recency().cmp(&a.entry.metadata.recency()))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
}

/// Run a hybrid search over every collection the scope refs cover.
///
/// `query_vector` is `None` when embedding failed; the search then runs
/// sparse-only. Fails only when a collection has no working retrieval path.
pub fn hybrid_search(
    conn: &Connection,
    query: &str,
    query_vector: Option<&[f32]>,
    scopes: &[ScopeRef],
    mode: SearchMode,
    params: &HybridParams,
) -> Result<HybridOutcome> {
    if params.k == 0 {
        return Ok(HybridOutcome {
            hits: Vec::new(),
            degraded: false,
        });
    }

    let targets = resolve_targets(conn, scopes)?;
    let mut degraded = query_vector.is_none();

    match mode {
        SearchMode::Merge => {
            let mut hits = Vec::new();
            for collection in targets.values().flatten() {
                let (mut found, single_path) = search_collection(conn, collection, query, query_vector, params)?;
                degraded |= single_path;
                hits.append(&mut found);
            }
            rank_hits(&mut hits);
            hits.truncate(params.k);
            Ok(HybridOutcome { hits, degraded })
        }
        SearchMode::Tiered => {
            let mut hits: Vec<SearchHit> = Vec::new();
            for (scope, collections) in &targets {
                let mut tier = Vec::new();
                for collection in collections {
                    let (mut found, single_path) =
                        search_collection(conn, collection, query, query_vector, params)?;
                    degraded |= single_path;
                    tier.append(&mut found);
                }
                rank_hits(&mut tier);
                let room = params.k - hits.len();
                hits.extend(tier.into_iter().take(room));
                debug!(scope = %scope, gathered = hits.len(), "tier searched");
                if hits.len() >= params.k {
                    break;
                }
            }
            Ok(HybridOutcome { hits, degraded })
        }
    }
}

/// Collections grouped by scope, keyed in tier order.
fn resolve_targets(conn: &Connection, scopes: &[ScopeRef]) -> Result<BTreeMap<Tier, Vec<CollectionHandle>>> {
    let mut seen = std::collections::HashSet::new();
    let mut targets: BTreeMap<Tier, Vec<CollectionHandle>> = BTreeMap::new();
    for scope_ref in scopes {
        for handle in registry::collections_for(conn, scope_ref.scope, scope_ref.owner_key.as_deref())? {
            if seen.insert(handle.name.clone()) {
                targets.entry(Tier(handle.scope)).or_default().push(handle);
            }
        }
    }
    Ok(targets)
}

/// Orders scopes by tiered-search priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tier(Scope);

impl Ord for Tier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.tier().cmp(&other.0.tier())
    }
}

impl PartialOrd for Tier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Dense + sparse over one collection. Returns the fused hits and whether
/// only one path contributed.
fn search_collection(
    conn: &Connection,
    collection: &CollectionHandle,
    query: &str,
    query_vector: Option<&[f32]>,
    params: &HybridParams,
) -> Result<(Vec<SearchHit>, bool)> {
    let m = params.candidates();

    let dense = match query_vector {
        Some(v) => {
            let filter = PayloadFilter::for_collection(collection);
            match SqliteVectorStore::new(conn).query(collection, v, m, &filter, true) {
                Ok(hits) => Ok(hits),
                Err(e) => {
                    warn!(collection = %collection.name, error = %e, "dense retrieval failed, degrading to sparse-only");
                    Err(e)
                }
            }
        }
        None => Err(MemoryError::EmbeddingUnavailable("no query vector".into())),
    };

    let sparse = match lexical::search(conn, &collection.name, query, m) {
        Ok(hits) => Ok(hits),
        Err(e) => {
            warn!(collection = %collection.name, error = %e, "sparse retrieval failed, degrading to dense-only");
            Err(e)
        }
    };

    let single_path = dense.is_err() || sparse.is_err();
    let (dense, sparse) = match (dense, sparse) {
        (Err(dense_err), Err(_)) => return Err(dense_err),
        (d, s) => (d.unwrap_or_default(), s.unwrap_or_default()),
    };

    let mut entries: HashMap<String, MemoryEntry> = HashMap::with_capacity(dense.len() + sparse.len());
    let dense_ids: Vec<String> = dense.iter().map(|h| h.id.clone()).collect();
    for hit in dense {
        let mut entry = hit.payload;
        entry.vector = hit.vector;
        entries.insert(hit.id, entry);
    }
    let sparse_ids: Vec<String> = sparse.into_iter().map(|(id, _)| id).collect();

    let missing: Vec<&str> = sparse_ids
        .iter()
        .filter(|id| !entries.contains_key(*id))
        .map(String::as_str)
        .collect();
    let mut fetched = store::fetch_entries(conn, &missing)?;

    let fused = rrf_fuse(&dense_ids, &sparse_ids, params.rrf_k);
    debug!(
        collection = %collection.name,
        dense = dense_ids.len(),
        sparse = sparse_ids.len(),
        fused = fused.len(),
        "collection searched"
    );

    let hits = fused
        .into_iter()
        .filter_map(|f| {
            let entry = entries.remove(&f.id).or_else(|| fetched.remove(&f.id))?;
            Some(SearchHit {
                entry,
                score: f.score,
                dense_rank: f.dense_rank,
                sparse_rank: f.sparse_rank,
            })
        })
        .collect();
    Ok((hits, single_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CairnConfig;
    use crate::db;
    use crate::memory::store::{store_entry, CollectionSpec, NewEntry};
    use crate::memory::types::WriteMetadata;

    const DIM: usize = 8;
    const PARAMS: HybridParams = HybridParams {
        k: 5,
        candidate_multiplier: 3,
        rrf_k: 60,
    };

    fn test_db() -> Connection {
        db::open_in_memory(&CairnConfig::default()).unwrap()
    }

    fn spike(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[i] = 1.0;
        v
    }

    fn write(conn: &mut Connection, scope: Scope, owner: Option<&str>, text: &str, v: &[f32]) -> String {
        let meta = WriteMetadata::default();
        store_entry(
            conn,
            &NewEntry {
                scope,
                owner_key: owner,
                text,
                importance: 0.5,
                metadata: &meta,
            },
            v,
            CollectionSpec {
                dimension: DIM,
                capacity_limit: 100,
            },
        )
        .unwrap()
        .id
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rrf_scores_accumulate_across_lists() {
        let fused = rrf_fuse(&ids(&["a", "b"]), &ids(&["b", "c"]), 60);
        let by_id: HashMap<_, _> = fused.iter().map(|f| (f.id.as_str(), f)).collect();

        let best = 2.0 / 61.0;
        assert!((by_id["b"].score - (1.0 / 62.0 + 1.0 / 61.0) / best).abs() < 1e-12);
        assert!((by_id["a"].score - (1.0 / 61.0) / best).abs() < 1e-12);
        assert_eq!(by_id["b"].dense_rank, Some(2));
        assert_eq!(by_id["b"].sparse_rank, Some(1));
        assert_eq!(fused[0].id, "b");
    }

    #[test]
    fn top_of_both_lists_outranks_any_single_list_item() {
        for kappa in [1, 10, 60, 1000] {
            let fused = rrf_fuse(&ids(&["x", "d1", "d2"]), &ids(&["x", "s1", "s2"]), kappa);
            assert_eq!(fused[0].id, "x", "kappa {kappa}");
            assert!((fused[0].score - 1.0).abs() < 1e-12);
            assert!(fused[1..].iter().all(|f| f.score <= fused[0].score));
        }
    }

    #[test]
    fn duplicate_ids_in_one_list_count_once() {
        let fused = rrf_fuse(&ids(&["a", "a"]), &[], 60);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn candidate_count_is_bounded() {
        assert_eq!(PARAMS.candidates(), 15);
        let huge = HybridParams {
            k: 10,
            candidate_multiplier: usize::MAX,
            rrf_k: 60,
        };
        assert_eq!(huge.candidates(), MAX_CANDIDATES);

        let wide = HybridParams {
            k: MAX_CANDIDATES + 1000,
            candidate_multiplier: 3,
            rrf_k: 60,
        };
        assert_eq!(wide.candidates(), MAX_CANDIDATES);
    }

    #[test]
    fn empty_corpus_returns_empty() {
        let conn = test_db();
        let outcome = hybrid_search(
            &conn,
            "anything",
            Some(&spike(0)),
            &[ScopeRef::global()],
            SearchMode::Merge,
            &PARAMS,
        )
        .unwrap();
        assert!(outcome.hits.is_empty());
    }

    #[test]
    fn exact_text_match_ranks_first() {
        let mut conn = test_db();
        write(&mut conn, Scope::Global, None, "tokio runtime configuration", &spike(1));
        let target = write(&mut conn, Scope::Global, None, "sqlite write ahead log", &spike(0));

        let outcome = hybrid_search(
            &conn,
            "sqlite write ahead log",
            Some(&spike(0)),
            &[ScopeRef::global()],
            SearchMode::Merge,
            &PARAMS,
        )
        .unwrap();
        assert_eq!(outcome.hits[0].entry.id, target);
        assert_eq!(outcome.hits[0].dense_rank, Some(1));
        assert_eq!(outcome.hits[0].sparse_rank, Some(1));
        assert!(outcome.hits[0].entry.vector.is_some());
        assert!(!outcome.degraded);
    }

    #[test]
    fn stop_word_query_uses_dense_only() {
        let mut conn = test_db();
        let id = write(&mut conn, Scope::Global, None, "the thing", &spike(2));
        let outcome = hybrid_search(
            &conn,
            "the of and",
            Some(&spike(2)),
            &[ScopeRef::global()],
            SearchMode::Merge,
            &PARAMS,
        )
        .unwrap();
        assert_eq!(outcome.hits[0].entry.id, id);
        assert_eq!(outcome.hits[0].sparse_rank, None);
        assert!(!outcome.degraded);
    }

    #[test]
    fn missing_vector_degrades_to_sparse() {
        let mut conn = test_db();
        let id = write(&mut conn, Scope::Global, None, "fallback lexical path", &spike(0));
        let outcome = hybrid_search(
            &conn,
            "lexical",
            None,
            &[ScopeRef::global()],
            SearchMode::Merge,
            &PARAMS,
        )
        .unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].entry.id, id);
        assert_eq!(outcome.hits[0].dense_rank, None);
    }

    #[test]
    fn owners_are_isolated() {
        let mut conn = test_db();
        for i in 0..3 {
            write(&mut conn, Scope::Project, Some("alpha"), &format!("alpha note {i}"), &spike(0));
        }
        let beta = write(&mut conn, Scope::Project, Some("beta"), "beta note", &spike(0));

        let outcome = hybrid_search(
            &conn,
            "note",
            Some(&spike(0)),
            &[ScopeRef::owned(Scope::Project, "beta")],
            SearchMode::Merge,
            &PARAMS,
        )
        .unwrap();
        let got: Vec<&str> = outcome.hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(got, vec![beta.as_str()]);
    }

    #[test]
    fn ownerless_ref_spans_all_owners() {
        let mut conn = test_db();
        write(&mut conn, Scope::Agent, Some("a1"), "shared topic", &spike(0));
        write(&mut conn, Scope::Agent, Some("a2"), "shared topic", &spike(0));
        let outcome = hybrid_search(
            &conn,
            "shared topic",
            Some(&spike(0)),
            &[ScopeRef::whole(Scope::Agent)],
            SearchMode::Merge,
            &PARAMS,
        )
        .unwrap();
        assert_eq!(outcome.hits.len(), 2);
    }

    #[test]
    fn merge_truncates_to_k_across_scopes() {
        let mut conn = test_db();
        for i in 0..4 {
            write(&mut conn, Scope::Global, None, &format!("topic global {i}"), &spike(i));
            write(&mut conn, Scope::Thread, Some("t"), &format!("topic thread {i}"), &spike(i));
        }
        let outcome = hybrid_search(
            &conn,
            "topic",
            Some(&spike(0)),
            &[ScopeRef::global(), ScopeRef::owned(Scope::Thread, "t")],
            SearchMode::Merge,
            &PARAMS,
        )
        .unwrap();
        assert_eq!(outcome.hits.len(), 5);
        assert!(outcome.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn tiered_stops_once_k_gathered() {
        let mut conn = test_db();
        for i in 0..5 {
            write(&mut conn, Scope::Thread, Some("t"), &format!("topic thread {i}"), &spike(i));
        }
        let global = write(&mut conn, Scope::Global, None, "topic global", &spike(0));

        let scopes = [ScopeRef::global(), ScopeRef::owned(Scope::Thread, "t")];
        let outcome = hybrid_search(&conn, "topic", Some(&spike(0)), &scopes, SearchMode::Tiered, &PARAMS).unwrap();
        assert_eq!(outcome.hits.len(), 5);
        assert!(outcome.hits.iter().all(|h| h.entry.scope == Scope::Thread));

        let wide = HybridParams { k: 6, ..PARAMS };
        let outcome = hybrid_search(&conn, "topic", Some(&spike(0)), &scopes, SearchMode::Tiered, &wide).unwrap();
        assert_eq!(outcome.hits.len(), 6);
        assert_eq!(outcome.hits[5].entry.id, global);
    }

    #[test]
    fn score_ties_prefer_recent_access() {
        let mut conn = test_db();
        let a = write(&mut conn, Scope::Project, Some("p1"), "identical", &spike(0));
        let b = write(&mut conn, Scope::Project, Some("p2"), "identical", &spike(0));
        store::touch(&conn, &[a.as_str()]).unwrap();

        let outcome = hybrid_search(
            &conn,
            "identical",
            Some(&spike(0)),
            &[ScopeRef::whole(Scope::Project)],
            SearchMode::Merge,
            &PARAMS,
        )
        .unwrap();
        assert_eq!(outcome.hits.len(), 2);
        assert_eq!(outcome.hits[0].score, outcome.hits[1].score);
        assert_eq!(outcome.hits[0].entry.id, a);
        assert_eq!(outcome.hits[1].entry.id, b);
    }
}
