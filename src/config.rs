use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::memory::types::Scope;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CairnConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub capacity: CapacityConfig,
    pub pruning: PruningConfig,
    pub health: HealthConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub busy_timeout_ms: u64,
    /// Upper bound on any single wait for the backing store.
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"hashing"` (deterministic, no model files) or `"local"` (ONNX Runtime).
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub dimension: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    /// Each retrieval path fetches `k * candidate_multiplier` candidates before fusion.
    pub candidate_multiplier: usize,
    pub rrf_k: usize,
    pub default_min_score: f64,
    /// Number of cached search rankings. `0` disables the cache.
    pub cache_capacity: usize,
    pub default_importance: f64,
}

/// Advisory per-scope capacity limits, copied onto each collection at creation.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CapacityConfig {
    pub global: usize,
    pub project: usize,
    pub agent: usize,
    pub thread: usize,
    pub objectives: usize,
    pub artifacts: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PruningConfig {
    pub recency_weight: f64,
    pub importance_weight: f64,
    pub frequency_weight: f64,
}

/// Two-level warning/critical pair.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub utilization: ThresholdPair,
    pub search_time_ms: ThresholdPair,
    pub fragmentation: ThresholdPair,
    /// Inverted: fires when the ratio drops *below* the threshold.
    pub cache_hit: ThresholdPair,
    /// Cache-hit ratio is not judged until this many lookups have been seen.
    pub cache_hit_min_samples: u64,
    pub auto_prune: bool,
    /// Fraction of `capacity_limit` an automatic prune shrinks a collection to.
    pub auto_prune_target_ratio: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub metrics_interval_secs: u64,
    pub health_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_cairn_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            busy_timeout_ms: 5000,
            operation_timeout_ms: 5000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_cairn_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "hashing".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            dimension: 384,
            timeout_ms: 3000,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            candidate_multiplier: 3,
            rrf_k: 60,
            default_min_score: 0.0,
            cache_capacity: 256,
            default_importance: 0.5,
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            global: 10_000,
            project: 5_000,
            agent: 2_000,
            thread: 1_000,
            objectives: 1_000,
            artifacts: 20_000,
        }
    }
}

impl CapacityConfig {
    pub fn limit_for(&self, scope: Scope) -> usize {
        match scope {
            Scope::Global => self.global,
            Scope::Project => self.project,
            Scope::Agent => self.agent,
            Scope::Thread => self.thread,
            Scope::Objectives => self.objectives,
            Scope::Artifacts => self.artifacts,
        }
    }
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            recency_weight: 1.0,
            importance_weight: 1.0,
            frequency_weight: 1.0,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            utilization: ThresholdPair {
                warning: 0.7,
                critical: 0.9,
            },
            search_time_ms: ThresholdPair {
                warning: 1000.0,
                critical: 3000.0,
            },
            fragmentation: ThresholdPair {
                warning: 0.3,
                critical: 0.5,
            },
            cache_hit: ThresholdPair {
                warning: 0.6,
                critical: 0.4,
            },
            cache_hit_min_samples: 50,
            auto_prune: true,
            auto_prune_target_ratio: 0.6,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_interval_secs: 300,
            health_interval_secs: 900,
        }
    }
}

/// Returns `~/.cairn/`
pub fn default_cairn_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cairn")
}

/// Returns the default config file path: `~/.cairn/config.toml`
pub fn default_config_path() -> PathBuf {
    default_cairn_dir().join("config.toml")
}

impl CairnConfig {
    /// Load config from TOML file (if it exists), apply env var overrides, validate.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CairnConfig::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (CAIRN_DB, CAIRN_LOG_LEVEL, CAIRN_EMBEDDING_PROVIDER, CAIRN_EMBEDDING_DIM).
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("CAIRN_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("CAIRN_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("CAIRN_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
        if let Ok(val) = std::env::var("CAIRN_EMBEDDING_DIM") {
            self.embedding.dimension = val
                .parse()
                .with_context(|| format!("CAIRN_EMBEDDING_DIM is not a number: {val}"))?;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be greater than zero");
        }
        if self.retrieval.rrf_k == 0 {
            bail!("retrieval.rrf_k must be greater than zero");
        }
        if self.retrieval.candidate_multiplier == 0 {
            bail!("retrieval.candidate_multiplier must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.default_importance) {
            bail!("retrieval.default_importance must be within [0.0, 1.0]");
        }
        if self.storage.operation_timeout_ms == 0 || self.embedding.timeout_ms == 0 {
            bail!("timeouts must be greater than zero");
        }
        if self.scheduler.metrics_interval_secs == 0 || self.scheduler.health_interval_secs == 0 {
            bail!("scheduler intervals must be greater than zero");
        }

        let weights = [
            self.pruning.recency_weight,
            self.pruning.importance_weight,
            self.pruning.frequency_weight,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            bail!("pruning weights must be finite and non-negative");
        }

        let h = &self.health;
        for (name, pair) in [
            ("utilization", h.utilization),
            ("search_time_ms", h.search_time_ms),
            ("fragmentation", h.fragmentation),
        ] {
            if pair.warning > pair.critical {
                bail!("health.{name}: warning ({}) must not exceed critical ({})", pair.warning, pair.critical);
            }
        }
        if h.cache_hit.warning < h.cache_hit.critical {
            bail!(
                "health.cache_hit is inverted: warning ({}) must be >= critical ({})",
                h.cache_hit.warning,
                h.cache_hit.critical
            );
        }
        if !(0.0..1.0).contains(&h.auto_prune_target_ratio)
            || h.auto_prune_target_ratio >= h.utilization.warning
        {
            bail!(
                "health.auto_prune_target_ratio ({}) must be below the utilization warning threshold ({})",
                h.auto_prune_target_ratio,
                h.utilization.warning
            );
        }
        Ok(())
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.operation_timeout_ms)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding.timeout_ms)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
