//! Threshold evaluation over a [`MetricsSample`].
//!
//! Every metric is judged against a warning/critical pair. Utilization,
//! search time and fragmentation fire when they rise *above* a threshold;
//! cache-hit ratio fires when it falls *below* one. The overall status is the
//! worst single status, with `Error` reserved for a sample that could not be
//! taken.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::{HealthConfig, ThresholdPair};
use crate::error::MemoryError;
use crate::memory::prune::PruningResult;
use crate::monitor::metrics::MetricsSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub metric: String,
    pub level: HealthStatus,
    pub message: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub metric_values: BTreeMap<String, f64>,
    pub alerts: Vec<Alert>,
    pub taken_at: DateTime<Utc>,
    /// Collections whose utilization is at or above the critical threshold.
    pub critical_collections: Vec<String>,
    /// Automatic prunes run by the cycle that produced this snapshot.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub auto_prunes: Vec<PruningResult>,
}

impl HealthSnapshot {
    /// Snapshot for a cycle whose metrics sample failed.
    pub fn collector_failure(err: &MemoryError) -> Self {
        Self {
            status: HealthStatus::Error,
            metric_values: BTreeMap::new(),
            alerts: vec![Alert {
                metric: "collector".into(),
                level: HealthStatus::Error,
                message: err.to_string(),
                recommendation: "run `cairn doctor` to check the database".into(),
            }],
            taken_at: Utc::now(),
            critical_collections: Vec::new(),
            auto_prunes: Vec::new(),
        }
    }
}

fn level_above(value: f64, pair: ThresholdPair) -> HealthStatus {
    if value >= pair.critical {
        HealthStatus::Critical
    } else if value >= pair.warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

fn level_below(value: f64, pair: ThresholdPair) -> HealthStatus {
    if value <= pair.critical {
        HealthStatus::Critical
    } else if value <= pair.warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Judge a sample. Pure; auto-pruning is the engine's job.
pub fn evaluate(sample: &MetricsSample, config: &HealthConfig) -> HealthSnapshot {
    let mut status = HealthStatus::Healthy;
    let mut alerts = Vec::new();
    let mut metric_values = BTreeMap::new();
    let mut critical_collections = Vec::new();

    let mut raise = |alerts: &mut Vec<Alert>, metric: &str, level: HealthStatus, message: String, recommendation: &str| {
        if level > HealthStatus::Healthy {
            status = status.max(level);
            alerts.push(Alert {
                metric: metric.to_string(),
                level,
                message,
                recommendation: recommendation.to_string(),
            });
        }
    };

    for c in &sample.collections {
        let level = level_above(c.utilization, config.utilization);
        if level == HealthStatus::Critical {
            critical_collections.push(c.collection.name.clone());
        }
        raise(
            &mut alerts,
            "utilization",
            level,
            format!(
                "collection {} holds {} of {} entries ({:.0}%)",
                c.collection.name,
                c.entry_count,
                c.collection.capacity_limit,
                c.utilization * 100.0
            ),
            "prune the collection or raise its capacity limit",
        );
    }
    metric_values.insert("utilization".to_string(), sample.utilization);

    if let Some(avg) = sample.search_latency.avg_ms {
        metric_values.insert("avg_search_time_ms".to_string(), avg);
        raise(
            &mut alerts,
            "avg_search_time_ms",
            level_above(avg, config.search_time_ms),
            format!("average search time is {avg:.1} ms"),
            "reduce collection sizes or lower retrieval.candidate_multiplier",
        );
    }

    metric_values.insert("fragmentation".to_string(), sample.fragmentation);
    raise(
        &mut alerts,
        "fragmentation",
        level_above(sample.fragmentation, config.fragmentation),
        format!("{:.0}% of database pages are free", sample.fragmentation * 100.0),
        "run `cairn vacuum`",
    );

    if let Some(ratio) = sample.cache_hit_ratio() {
        metric_values.insert("cache_hit_ratio".to_string(), ratio);
        if sample.cache.lookups() >= config.cache_hit_min_samples {
            raise(
                &mut alerts,
                "cache_hit_ratio",
                level_below(ratio, config.cache_hit),
                format!(
                    "{:.0}% of {} searches were served from cache",
                    ratio * 100.0,
                    sample.cache.lookups()
                ),
                "raise retrieval.cache_capacity",
            );
        }
    }

    for (scope, s) in &sample.scopes {
        metric_values.insert(format!("{scope}.entry_count"), s.entry_count as f64);
    }

    HealthSnapshot {
        status,
        metric_values,
        alerts,
        taken_at: Utc::now(),
        critical_collections,
        auto_prunes: Vec::new(),
    }
}
