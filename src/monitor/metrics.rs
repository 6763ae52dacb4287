//! Metrics collection: storage counts per scope and collection, rolling
//! latencies, cache-hit ratio, and file fragmentation.
//!
//! [`collect`] only reads. Latencies are recorded by the engine into
//! [`Telemetry`] as requests complete.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::db;
use crate::error::{MemoryError, Result};
use crate::memory::cache::CacheStats;
use crate::memory::stats::{self, CollectionStats};
use crate::memory::types::Scope;

/// Number of recent operations averaged per latency window.
pub const LATENCY_WINDOW: usize = 256;

/// Fixed-size rolling window of operation latencies.
#[derive(Debug)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
    total: u64,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
        self.total += 1;
    }

    /// Mean of the window in milliseconds; `None` before the first sample.
    pub fn average_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Operations observed since start, including those rolled out of the window.
    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Request-path latency recorders shared by all engine clones.
#[derive(Debug)]
pub struct Telemetry {
    search: Mutex<LatencyWindow>,
    write: Mutex<LatencyWindow>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            search: Mutex::new(LatencyWindow::new(LATENCY_WINDOW)),
            write: Mutex::new(LatencyWindow::new(LATENCY_WINDOW)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencySummary {
    pub avg_ms: Option<f64>,
    pub observed: u64,
}

impl Telemetry {
    pub fn record_search(&self, elapsed: Duration) {
        if let Ok(mut w) = self.search.lock() {
            w.record(elapsed);
        }
    }

    pub fn record_write(&self, elapsed: Duration) {
        if let Ok(mut w) = self.write.lock() {
            w.record(elapsed);
        }
    }

    fn summary(window: &Mutex<LatencyWindow>) -> Result<LatencySummary> {
        let w = window
            .lock()
            .map_err(|e| MemoryError::CollectorFailure(format!("latency window poisoned: {e}")))?;
        Ok(LatencySummary {
            avg_ms: w.average_ms(),
            observed: w.total(),
        })
    }

    pub fn search_summary(&self) -> Result<LatencySummary> {
        Self::summary(&self.search)
    }

    pub fn write_summary(&self) -> Result<LatencySummary> {
        Self::summary(&self.write)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeSample {
    pub collections: usize,
    pub entry_count: u64,
    pub size_estimate_bytes: u64,
    /// Highest collection utilization within the scope.
    pub max_utilization: f64,
}

/// One point-in-time metrics sample.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSample {
    pub taken_at: DateTime<Utc>,
    pub scopes: BTreeMap<Scope, ScopeSample>,
    pub collections: Vec<CollectionStats>,
    /// Highest per-collection utilization; 0.0 with no collections.
    pub utilization: f64,
    pub search_latency: LatencySummary,
    pub write_latency: LatencySummary,
    pub cache: CacheStats,
    pub fragmentation: f64,
    pub db_size_bytes: u64,
}

impl MetricsSample {
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        self.cache.hit_ratio()
    }
}

/// Take a sample. Read-only; any failure surfaces as [`MemoryError::CollectorFailure`].
pub fn collect(
    conn: &Connection,
    telemetry: &Telemetry,
    cache: CacheStats,
    db_path: Option<&Path>,
) -> Result<MetricsSample> {
    sample(conn, telemetry, cache, db_path).map_err(|e| match e {
        MemoryError::CollectorFailure(_) => e,
        other => MemoryError::CollectorFailure(other.to_string()),
    })
}

fn sample(
    conn: &Connection,
    telemetry: &Telemetry,
    cache: CacheStats,
    db_path: Option<&Path>,
) -> Result<MetricsSample> {
    let collections = stats::all_collection_stats(conn)?;

    let mut scopes: BTreeMap<Scope, ScopeSample> = Scope::ALL
        .iter()
        .map(|s| (*s, ScopeSample::default()))
        .collect();
    for c in &collections {
        let s = scopes.entry(c.collection.scope).or_default();
        s.collections += 1;
        s.entry_count += c.entry_count;
        s.size_estimate_bytes += c.size_estimate_bytes;
        s.max_utilization = s.max_utilization.max(c.utilization);
    }
    let utilization = collections.iter().map(|c| c.utilization).fold(0.0, f64::max);

    Ok(MetricsSample {
        taken_at: Utc::now(),
        scopes,
        utilization,
        search_latency: telemetry.search_summary()?,
        write_latency: telemetry.write_summary()?,
        cache,
        fragmentation: db::fragmentation_ratio(conn)?,
        db_size_bytes: stats::db_size_bytes(db_path),
        collections,
    })
}
