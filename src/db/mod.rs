pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use crate::config::CairnConfig;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the cairn database at the given path, with sqlite-vec
/// loaded, the schema initialized, and migrations applied.
pub fn open_database(path: impl AsRef<Path>, config: &CairnConfig) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(config.storage.busy_timeout_ms))?;

    prepare(&mut conn, config)?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database with the full schema. Used by tests and `--in-memory` runs.
pub fn open_in_memory(config: &CairnConfig) -> Result<Connection> {
    load_sqlite_vec();
    let mut conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    prepare(&mut conn, config)?;
    Ok(conn)
}

fn prepare(conn: &mut Connection, config: &CairnConfig) -> Result<()> {
    schema::init_schema(conn).context("failed to initialize schema")?;
    migrations::run_migrations(conn, &config.embedding).context("failed to run migrations")?;

    if let Some(stored) = migrations::get_embedding_identity(conn)? {
        if stored.dimension != config.embedding.dimension || stored.provider != config.embedding.provider {
            tracing::warn!(
                stored_provider = %stored.provider,
                stored_dimension = stored.dimension,
                configured_provider = %config.embedding.provider,
                configured_dimension = config.embedding.dimension,
                "embedding configuration differs from the one this store was created with; \
                 existing collections will reject writes with a schema mismatch"
            );
        }
    }
    Ok(())
}

/// Ratio of free pages to total pages. `0.0` for an empty file.
pub fn fragmentation_ratio(conn: &Connection) -> rusqlite::Result<f64> {
    let free: i64 = conn.query_row("PRAGMA freelist_count", [], |r| r.get(0))?;
    let total: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
    if total <= 0 {
        return Ok(0.0);
    }
    Ok(free as f64 / total as f64)
}

/// Basic integrity probe used by `cairn doctor`.
pub fn integrity_check(conn: &Connection) -> rusqlite::Result<String> {
    conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))
}
