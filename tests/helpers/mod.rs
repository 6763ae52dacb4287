#![allow(dead_code)]

use anyhow::Result;
use cairn::config::CairnConfig;
use cairn::db;
use cairn::embedding::EmbeddingProvider;
use cairn::engine::MemoryEngine;
use cairn::memory::types::WriteMetadata;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Small dimension keeps hashing embeddings cheap in tests.
pub const DIM: usize = 32;

pub fn test_config() -> CairnConfig {
    let mut config = CairnConfig::default();
    config.embedding.dimension = DIM;
    config.scheduler.enabled = false;
    config
}

/// In-memory engine with the hashing embedder.
pub fn engine() -> MemoryEngine {
    engine_with(test_config())
}

pub fn engine_with(config: CairnConfig) -> MemoryEngine {
    MemoryEngine::in_memory(config).unwrap()
}

/// Engine over a database file inside `dir`. Returns the file path too, so
/// tests can inspect it through a second connection.
pub fn engine_on_disk(dir: &Path, config: CairnConfig) -> (MemoryEngine, PathBuf) {
    let path = dir.join("memory.db");
    let mut config = config;
    config.storage.db_path = path.to_string_lossy().into_owned();
    (MemoryEngine::open(config).unwrap(), path)
}

/// Engine whose embedder is `embedder`, over a fresh in-memory store.
pub fn engine_with_embedder(config: CairnConfig, embedder: Arc<dyn EmbeddingProvider>) -> MemoryEngine {
    let conn = db::open_in_memory(&config).unwrap();
    MemoryEngine::with_parts(conn, embedder, config, None)
}

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_in_memory(&test_config()).unwrap()
}

/// Read-only side connection to an on-disk store.
pub fn side_connection(path: &Path) -> Connection {
    db::load_sqlite_vec();
    Connection::open(path).unwrap()
}

pub fn audit_count(conn: &Connection, operation: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM memory_log WHERE operation = ?1",
        [operation],
        |r| r.get(0),
    )
    .unwrap()
}

pub fn meta(importance: f64) -> WriteMetadata {
    WriteMetadata {
        importance: Some(importance),
        ..WriteMetadata::default()
    }
}

/// Always fails, like an unreachable model server.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding backend unreachable")
    }
    fn dimensions(&self) -> usize {
        DIM
    }
    fn name(&self) -> &str {
        "failing"
    }
}

/// Answers correctly, but only after `delay`.
pub struct SlowEmbedder {
    pub delay: Duration,
}

impl EmbeddingProvider for SlowEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        std::thread::sleep(self.delay);
        let mut v = vec![0.0; DIM];
        v[0] = 1.0;
        Ok(v)
    }
    fn dimensions(&self) -> usize {
        DIM
    }
    fn name(&self) -> &str {
        "slow"
    }
}

/// Returns vectors of the wrong length.
pub struct ShortEmbedder;

impl EmbeddingProvider for ShortEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0; DIM / 2])
    }
    fn dimensions(&self) -> usize {
        DIM
    }
    fn name(&self) -> &str {
        "short"
    }
}
