//! SQL DDL for the shared cairn tables and the per-collection indexes.
//!
//! Shared tables: `collections` (the registry), `memory_entries` (payloads for
//! every collection), `memory_log` (audit), and `schema_meta`. Each collection
//! additionally owns a `vec_<name>` vec0 table and an `fts_<name>` FTS5 table,
//! created lazily by the registry. All DDL uses `IF NOT EXISTS`.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Collection registry
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    scope TEXT NOT NULL CHECK(scope IN ('global','project','agent','thread','objectives','artifacts')),
    owner_key TEXT,
    dimension INTEGER NOT NULL CHECK(dimension > 0),
    capacity_limit INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_collections_scope ON collections(scope);

-- Entry payloads. `seq` doubles as the FTS5 rowid and records insertion order.
CREATE TABLE IF NOT EXISTS memory_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    collection TEXT NOT NULL REFERENCES collections(name),
    scope TEXT NOT NULL,
    owner_key TEXT,
    text TEXT NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance >= 0.0 AND importance <= 1.0),
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    created_at TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_entries_collection ON memory_entries(collection);
CREATE INDEX IF NOT EXISTS idx_entries_scope_owner ON memory_entries(scope, owner_key);

-- Audit log
CREATE TABLE IF NOT EXISTS memory_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','prune','auto_prune','vacuum')),
    memory_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize the shared tables. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Name of the vec0 table backing a collection.
pub fn vec_table(collection: &str) -> String {
    format!("vec_{collection}")
}

/// Name of the FTS5 table backing a collection.
pub fn fts_table(collection: &str) -> String {
    format!("fts_{collection}")
}

/// Create the dense and sparse index tables for one collection.
///
/// `collection` must come from [`crate::memory::registry::collection_name`],
/// which only emits `[a-z0-9_]`, so it is safe to splice into DDL.
pub fn create_collection_tables(
    conn: &Connection,
    collection: &str,
    dimension: usize,
) -> rusqlite::Result<()> {
    let vec = vec_table(collection);
    let fts = fts_table(collection);
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {vec} USING vec0(
            id TEXT PRIMARY KEY,
            embedding FLOAT[{dimension}]
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5(
            text,
            tokenize = 'unicode61 remove_diacritics 2'
        );"
    ))
}

/// Does a table (real or virtual) with this name exist?
pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}
