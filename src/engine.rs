//! The multi-scope memory service.
//!
//! [`MemoryEngine`] is the async surface everything else calls: `write`,
//! `search`, `stats`, `optimize`/`prune`, `report`, and the two background
//! cycles the scheduler drives. It is cheap to clone; clones share one SQLite
//! connection, one embedder, one result cache and one set of prune leases.
//!
//! SQLite and the embedder are synchronous, so every call into them goes
//! through `spawn_blocking` under a bounded timeout. A timed-out store call
//! surfaces as [`MemoryError::BackingStoreTimeout`]; the blocking work itself
//! still runs to completion, and since each write is one transaction it lands
//! whole or not at all.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::CairnConfig;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{MemoryError, Result};
use crate::memory::cache::{CacheKey, CacheStats, CachedHit, ResultCache};
use crate::memory::prune::{self, PruneLocks, PrunePlan, PruneStrategy, PruneTrigger, PruningResult};
use crate::memory::search::{self, HybridParams};
use crate::memory::stats::{self, CollectionStats};
use crate::memory::store::{self, CollectionSpec, NewEntry};
use crate::memory::types::{Scope, ScopeStats, SearchHit, SearchRequest, WriteMetadata};
use crate::memory::registry;
use crate::monitor::health::{self, HealthSnapshot};
use crate::monitor::metrics::{self, MetricsSample, Telemetry};
use crate::monitor::MonitorState;

#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: Arc<CairnConfig>,
    db_path: Option<PathBuf>,
    cache: ResultCache,
    telemetry: Telemetry,
    prune_locks: PruneLocks,
    monitor: MonitorState,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingReport {
    pub provider: String,
    pub dimension: usize,
    pub healthy: bool,
}

/// Snapshot-level analytics: a fresh metrics sample, its evaluation, and the
/// outcome of the last scheduled health cycle.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub generated_at: DateTime<Utc>,
    pub health: HealthSnapshot,
    pub metrics: MetricsSample,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_cycle: Option<HealthSnapshot>,
    pub embedding: EmbeddingReport,
    pub prunes_in_progress: Vec<Scope>,
}

impl MemoryEngine {
    /// Open the configured on-disk store and embedding provider.
    pub fn open(config: CairnConfig) -> anyhow::Result<Self> {
        let path = config.resolved_db_path();
        let conn = db::open_database(&path, &config)?;
        let embedder = embedding::create_provider(&config.embedding)?;
        Ok(Self::with_parts(conn, embedder, config, Some(path)))
    }

    /// In-memory store with the configured provider.
    pub fn in_memory(config: CairnConfig) -> anyhow::Result<Self> {
        let conn = db::open_in_memory(&config)?;
        let embedder = embedding::create_provider(&config.embedding)?;
        Ok(Self::with_parts(conn, embedder, config, None))
    }

    /// Assemble an engine from an already prepared connection and provider.
    pub fn with_parts(
        conn: Connection,
        embedder: Arc<dyn EmbeddingProvider>,
        config: CairnConfig,
        db_path: Option<PathBuf>,
    ) -> Self {
        let cache = ResultCache::new(config.retrieval.cache_capacity);
        Self {
            inner: Arc::new(EngineInner {
                conn: Arc::new(Mutex::new(conn)),
                embedder,
                config: Arc::new(config),
                db_path,
                cache,
                telemetry: Telemetry::default(),
                prune_locks: PruneLocks::default(),
                monitor: MonitorState::default(),
            }),
        }
    }

    pub fn config(&self) -> &CairnConfig {
        &self.inner.config
    }

    pub fn monitor(&self) -> &MonitorState {
        &self.inner.monitor
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.inner.embedder
    }

    /// Run `f` against the connection on the blocking pool, bounded by
    /// `storage.operation_timeout_ms`.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.inner.conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| MemoryError::Task(format!("connection lock poisoned: {e}")))?;
            f(&mut guard)
        });

        let limit = self.inner.config.operation_timeout();
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(MemoryError::Task(format!("store task failed: {join}"))),
            Err(_) => Err(MemoryError::BackingStoreTimeout(limit)),
        }
    }

    /// Embed on the blocking pool, bounded by `embedding.timeout_ms`.
    ///
    /// Provider errors, timeouts and wrong-length vectors are all
    /// [`MemoryError::EmbeddingUnavailable`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.inner.embedder);
        let text = text.to_string();
        let task = tokio::task::spawn_blocking(move || embedder.embed(&text));

        let limit = self.inner.config.embedding_timeout();
        let vector = match tokio::time::timeout(limit, task).await {
            Ok(Ok(Ok(vector))) => vector,
            Ok(Ok(Err(e))) => return Err(MemoryError::EmbeddingUnavailable(e.to_string())),
            Ok(Err(join)) => {
                return Err(MemoryError::EmbeddingUnavailable(format!("embedding task failed: {join}")))
            }
            Err(_) => {
                return Err(MemoryError::EmbeddingUnavailable(format!(
                    "embedding timed out after {} ms",
                    limit.as_millis()
                )))
            }
        };

        let expected = self.inner.config.embedding.dimension;
        if vector.len() != expected {
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "provider `{}` returned {} dimensions, expected {expected}",
                self.inner.embedder.name(),
                vector.len()
            )));
        }
        Ok(vector)
    }

    /// Store one memory and return its id.
    ///
    /// The write fails as a whole if embedding fails; nothing is indexed.
    pub async fn write(
        &self,
        scope: Scope,
        owner_key: Option<&str>,
        text: &str,
        metadata: WriteMetadata,
    ) -> Result<String> {
        let started = Instant::now();
        if text.trim().is_empty() {
            return Err(MemoryError::InvalidRequest("text must not be empty".into()));
        }
        let owner_key = if scope.is_owned() { owner_key } else { None };
        // Reject a missing owner before paying for an embedding.
        registry::collection_name(scope, owner_key)?;

        let config = &self.inner.config;
        let importance = metadata.importance.unwrap_or(config.retrieval.default_importance);
        let spec = CollectionSpec {
            dimension: config.embedding.dimension,
            capacity_limit: config.capacity.limit_for(scope),
        };

        let vector = self.embed(text).await?;

        let owner = owner_key.map(str::to_string);
        let text = text.to_string();
        let entry = self
            .run_blocking(move |conn| {
                store::store_entry(
                    conn,
                    &NewEntry {
                        scope,
                        owner_key: owner.as_deref(),
                        text: &text,
                        importance,
                        metadata: &metadata,
                    },
                    &vector,
                    spec,
                )
            })
            .await?;

        self.inner.cache.invalidate();
        self.inner.telemetry.record_write(started.elapsed());
        info!(
            id = %entry.id,
            collection = %entry.collection,
            importance = entry.metadata.importance,
            "memory stored"
        );
        Ok(entry.id)
    }

    /// Hybrid search across the requested scopes.
    ///
    /// Returned entries reflect the access this search just recorded.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>> {
        let started = Instant::now();
        if request.query.trim().is_empty() {
            return Err(MemoryError::InvalidRequest("query must not be empty".into()));
        }
        if request.scopes.is_empty() {
            return Err(MemoryError::InvalidRequest("at least one scope is required".into()));
        }
        if request.k > search::MAX_CANDIDATES {
            return Err(MemoryError::InvalidRequest(format!(
                "k must be at most {}, got {}",
                search::MAX_CANDIDATES,
                request.k
            )));
        }
        if !(0.0..=1.0).contains(&request.min_score) {
            return Err(MemoryError::InvalidRequest(format!(
                "min_score must be within [0.0, 1.0], got {}",
                request.min_score
            )));
        }

        let key = CacheKey::for_request(&request);
        if let Some(cached) = self.inner.cache.get(&key) {
            let hits = self.run_blocking(move |conn| rehydrate(conn, cached)).await?;
            debug!(results = hits.len(), "search served from cache");
            self.inner.telemetry.record_search(started.elapsed());
            return Ok(hits);
        }

        let generation = self.inner.cache.generation();
        let (query_vector, embed_error) = match self.embed(&request.query).await {
            Ok(v) => (Some(v), None),
            Err(e) => {
                warn!(error = %e, "query embedding failed, searching sparse-only");
                (None, Some(e))
            }
        };

        let params = HybridParams {
            k: request.k,
            candidate_multiplier: self.inner.config.retrieval.candidate_multiplier,
            rrf_k: self.inner.config.retrieval.rrf_k,
        };
        let query = request.query.clone();
        let scopes = request.scopes.clone();
        let (mode, min_score) = (request.mode, request.min_score);

        let outcome = self
            .run_blocking(move |conn| {
                let outcome = search::hybrid_search(conn, &query, query_vector.as_deref(), &scopes, mode, &params)?;
                let mut hits: Vec<SearchHit> = outcome.hits.into_iter().filter(|h| h.score >= min_score).collect();
                let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
                let accessed_at = store::touch(conn, &ids)?;
                for hit in &mut hits {
                    hit.entry.metadata.access_count += 1;
                    hit.entry.metadata.last_accessed_at = Some(accessed_at);
                }
                Ok((hits, outcome.degraded))
            })
            .await;

        let (hits, degraded) = match (outcome, embed_error) {
            (Ok(found), _) => found,
            (Err(MemoryError::EmbeddingUnavailable(_)), Some(original)) => return Err(original),
            (Err(e), _) => return Err(e),
        };

        if degraded {
            warn!(results = hits.len(), "search degraded to a single retrieval path");
        } else {
            let cached = hits
                .iter()
                .map(|h| CachedHit {
                    id: h.entry.id.clone(),
                    score: h.score,
                    dense_rank: h.dense_rank,
                    sparse_rank: h.sparse_rank,
                })
                .collect();
            self.inner.cache.insert(key, cached, generation);
        }

        self.inner.telemetry.record_search(started.elapsed());
        debug!(results = hits.len(), degraded, "search completed");
        Ok(hits)
    }

    /// Entry count and size estimate for one scope, or one owner's collection.
    pub async fn stats(&self, scope: Scope, owner_key: Option<&str>) -> Result<ScopeStats> {
        let owner = owner_key.map(str::to_string);
        self.run_blocking(move |conn| stats::scope_stats(conn, scope, owner.as_deref()))
            .await
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionStats>> {
        self.run_blocking(|conn| stats::all_collection_stats(conn)).await
    }

    /// Manual prune of every collection in a scope down to its own capacity.
    pub async fn optimize(&self, scope: Scope, strategy: PruneStrategy, dry_run: bool) -> Result<PruningResult> {
        self.prune(PrunePlan {
            scope,
            owner_key: None,
            strategy,
            limit: None,
            dry_run,
            trigger: PruneTrigger::Manual,
        })
        .await
    }

    /// Run one prune. A second prune of the same scope while this one runs
    /// is rejected with [`MemoryError::PruneInProgress`].
    pub async fn prune(&self, plan: PrunePlan) -> Result<PruningResult> {
        let lease = self.inner.prune_locks.try_acquire(plan.scope)?;
        let config = Arc::clone(&self.inner.config);
        let result = self
            .run_blocking(move |conn| {
                let _lease = lease;
                prune::prune(conn, &plan, &config)
            })
            .await?;

        if result.entries_removed > 0 {
            self.inner.cache.invalidate();
        }
        if result.trigger == PruneTrigger::Manual {
            info!(
                scope = %result.scope,
                strategy = %result.strategy,
                dry_run = result.dry_run,
                selected = result.candidates_considered,
                removed = result.entries_removed,
                "prune completed"
            );
        }
        Ok(result)
    }

    pub fn is_pruning(&self, scope: Scope) -> bool {
        self.inner.prune_locks.is_active(scope)
    }

    /// Take and publish a metrics sample.
    ///
    /// A failed sample publishes an `Error` health snapshot.
    pub async fn collect_metrics(&self) -> Result<Arc<MetricsSample>> {
        let inner = Arc::clone(&self.inner);
        let cache = self.inner.cache.stats();
        let sampled = self
            .run_blocking(move |conn| metrics::collect(conn, &inner.telemetry, cache, inner.db_path.as_deref()))
            .await
            .map_err(|e| match e {
                MemoryError::CollectorFailure(_) => e,
                other => MemoryError::CollectorFailure(other.to_string()),
            });

        match sampled {
            Ok(sample) => Ok(self.inner.monitor.publish_sample(sample)),
            Err(e) => {
                error!(error = %e, "metrics sample failed");
                self.inner.monitor.publish_health(HealthSnapshot::collector_failure(&e));
                Err(e)
            }
        }
    }

    /// One health cycle: sample, evaluate, auto-prune collections that just
    /// turned Critical, publish.
    pub async fn run_health_cycle(&self) -> Arc<HealthSnapshot> {
        let sample = match self.collect_metrics().await {
            Ok(sample) => sample,
            Err(e) => {
                return self
                    .inner
                    .monitor
                    .latest_health()
                    .unwrap_or_else(|| Arc::new(HealthSnapshot::collector_failure(&e)))
            }
        };

        let config = Arc::clone(&self.inner.config);
        let mut snapshot = health::evaluate(&sample, &config.health);
        let mut still_critical: HashSet<String> = snapshot.critical_collections.iter().cloned().collect();

        if config.health.auto_prune {
            let mut pruned = HashSet::new();
            for name in self.inner.monitor.newly_critical(&snapshot.critical_collections) {
                let Some(handle) = sample
                    .collections
                    .iter()
                    .find(|c| c.collection.name == name)
                    .map(|c| c.collection.clone())
                else {
                    continue;
                };
                let target = (handle.capacity_limit as f64 * config.health.auto_prune_target_ratio).floor() as usize;
                let plan = PrunePlan {
                    scope: handle.scope,
                    owner_key: handle.owner_key.clone(),
                    strategy: PruneStrategy::Hybrid,
                    limit: Some(target),
                    dry_run: false,
                    trigger: PruneTrigger::Automatic,
                };
                match self.prune(plan).await {
                    Ok(result) => {
                        still_critical.remove(&name);
                        pruned.insert(name);
                        snapshot.auto_prunes.push(result);
                    }
                    Err(e) => {
                        warn!(
                            target: "cairn::auto_prune",
                            collection = %name,
                            error = %e,
                            "automatic prune failed, will retry next cycle"
                        );
                        still_critical.remove(&name);
                    }
                }
            }

            if !snapshot.auto_prunes.is_empty() {
                // A collection the prune could not bring out of Critical stays remembered.
                match self.collect_metrics().await {
                    Ok(after) => {
                        still_critical.extend(
                            health::evaluate(&after, &config.health)
                                .critical_collections
                                .into_iter()
                                .filter(|name| pruned.contains(name)),
                        );
                    }
                    Err(e) => warn!(error = %e, "post-prune metrics sample failed"),
                }
            }
        }

        self.inner.monitor.remember_critical(still_critical);
        self.inner.monitor.publish_health(snapshot)
    }

    /// Fresh sample and evaluation, plus the last scheduled cycle's outcome.
    pub async fn report(&self) -> Result<MemoryReport> {
        let last_health_cycle = self.inner.monitor.latest_health().map(|s| (*s).clone());
        let sample = self.collect_metrics().await?;
        let health = health::evaluate(&sample, &self.inner.config.health);
        let embedding = self.embedding_report().await;

        Ok(MemoryReport {
            generated_at: Utc::now(),
            health,
            metrics: (*sample).clone(),
            last_health_cycle,
            embedding,
            prunes_in_progress: Scope::ALL.into_iter().filter(|s| self.is_pruning(*s)).collect(),
        })
    }

    async fn embedding_report(&self) -> EmbeddingReport {
        let embedder = Arc::clone(&self.inner.embedder);
        let probe = tokio::task::spawn_blocking(move || embedder.health());
        let healthy = matches!(
            tokio::time::timeout(self.inner.config.embedding_timeout(), probe).await,
            Ok(Ok(true))
        );
        EmbeddingReport {
            provider: self.inner.embedder.name().to_string(),
            dimension: self.inner.embedder.dimensions(),
            healthy,
        }
    }

    /// Compact the database file, returning it to zero fragmentation.
    pub async fn vacuum(&self) -> Result<()> {
        self.run_blocking(|conn| {
            conn.execute_batch("VACUUM")?;
            store::write_audit_log(conn, "vacuum", "", None)
        })
        .await?;
        info!("database vacuumed");
        Ok(())
    }
}

/// Rebuild a cached ranking from current rows, touching each entry.
fn rehydrate(conn: &mut Connection, cached: Vec<CachedHit>) -> Result<Vec<SearchHit>> {
    let ids: Vec<&str> = cached.iter().map(|h| h.id.as_str()).collect();
    let mut entries = store::fetch_entries(conn, &ids)?;
    let accessed_at = store::touch(conn, &ids)?;

    Ok(cached
        .into_iter()
        .filter_map(|h| {
            let mut entry = entries.remove(&h.id)?;
            entry.metadata.access_count += 1;
            entry.metadata.last_accessed_at = Some(accessed_at);
            Some(SearchHit {
                entry,
                score: h.score,
                dense_rank: h.dense_rank,
                sparse_rank: h.sparse_rank,
            })
        })
        .collect())
}
