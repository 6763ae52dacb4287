//! Write path and entry-level reads.
//!
//! [`store_entry`] runs the whole write inside one transaction: resolve (or
//! create) the collection, upsert the dense point and payload, add the text to
//! the lexical index, write the audit row. The dense write is sequenced before
//! the sparse one, so an interrupted write can only ever leave a dense-only
//! orphan, and the transaction discards even that.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;

use crate::error::{MemoryError, Result};
use crate::memory::registry::{self, CollectionHandle};
use crate::memory::types::{EntryMetadata, MemoryEntry, Scope, StoredMetadata, WriteMetadata};
use crate::memory::vector::{EntryPayload, SqliteVectorStore, VectorStore};
use crate::memory::{lexical, format_timestamp, now_timestamp, parse_timestamp};

/// Columns read by [`entry_from_row`], against `memory_entries` aliased as `e`.
pub(crate) const ENTRY_COLUMNS: &str = "e.id, e.text, e.scope, e.owner_key, e.collection, \
     e.created_at, e.last_accessed_at, e.access_count, e.importance, e.metadata";

/// A validated write, ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub scope: Scope,
    pub owner_key: Option<&'a str>,
    pub text: &'a str,
    pub importance: f64,
    pub metadata: &'a WriteMetadata,
}

/// Where a new entry lands: the dimension every vector must have and the
/// advisory capacity copied onto a freshly created collection.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub dimension: usize,
    pub capacity_limit: usize,
}

/// Full write path: ensure collection → dense upsert → lexical index → audit log.
pub fn store_entry(
    conn: &mut Connection,
    entry: &NewEntry<'_>,
    vector: &[f32],
    spec: CollectionSpec,
) -> Result<MemoryEntry> {
    if !(0.0..=1.0).contains(&entry.importance) {
        return Err(MemoryError::InvalidRequest(format!(
            "importance must be within [0.0, 1.0], got {}",
            entry.importance
        )));
    }

    let tx = conn.transaction()?;

    let collection = registry::ensure(&tx, entry.scope, entry.owner_key, spec.dimension, spec.capacity_limit)?;

    let id = uuid::Uuid::now_v7().to_string();
    let created_at = chrono::Utc::now();
    let created_at_str = format_timestamp(created_at);
    let stored = StoredMetadata {
        sources: entry.metadata.sources.clone(),
        tags: entry.metadata.tags.clone(),
        extra: entry.metadata.extra.clone(),
    };

    let seq = SqliteVectorStore::new(&tx).upsert(
        &collection,
        &id,
        vector,
        &EntryPayload {
            text: entry.text,
            scope: collection.scope,
            owner_key: collection.owner_key.as_deref(),
            importance: entry.importance,
            created_at: &created_at_str,
            metadata: &stored,
        },
    )?;

    lexical::index(&tx, &collection.name, seq, entry.text)?;

    write_audit_log(
        &tx,
        "create",
        &id,
        Some(&serde_json::json!({ "collection": collection.name })),
    )?;

    tx.commit()?;

    Ok(MemoryEntry {
        id,
        text: entry.text.to_string(),
        scope: collection.scope,
        owner_key: collection.owner_key,
        collection: collection.name,
        metadata: EntryMetadata {
            created_at,
            last_accessed_at: None,
            access_count: 0,
            importance: entry.importance,
            sources: stored.sources,
            tags: stored.tags,
            extra: stored.extra,
        },
        vector: None,
    })
}

/// Decode an entry from `row`, starting at column `start` of [`ENTRY_COLUMNS`].
pub(crate) fn entry_from_row(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<MemoryEntry> {
    let scope: String = row.get(start + 2)?;
    let created_at: String = row.get(start + 5)?;
    let last_accessed_at: Option<String> = row.get(start + 6)?;
    let metadata: Option<String> = row.get(start + 9)?;
    let stored: StoredMetadata = metadata
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    Ok(MemoryEntry {
        id: row.get(start)?,
        text: row.get(start + 1)?,
        scope: scope.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(start + 2, rusqlite::types::Type::Text, e.into())
        })?,
        owner_key: row.get(start + 3)?,
        collection: row.get(start + 4)?,
        metadata: EntryMetadata {
            created_at: parse_timestamp(&created_at),
            last_accessed_at: last_accessed_at.as_deref().map(parse_timestamp),
            access_count: row.get::<_, i64>(start + 7)?.max(0) as u64,
            importance: row.get(start + 8)?,
            sources: stored.sources,
            tags: stored.tags,
            extra: stored.extra,
        },
        vector: None,
    })
}

/// Batch-fetch entries by id.
pub fn fetch_entries(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, MemoryEntry>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM memory_entries e WHERE e.id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| entry_from_row(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|e| (e.id.clone(), e)).collect())
}

/// Read-triggers-touch: bump `access_count` and `last_accessed_at`.
///
/// Returns the access time as stored.
pub fn touch(conn: &Connection, ids: &[&str]) -> Result<DateTime<Utc>> {
    let now = now_timestamp();
    if !ids.is_empty() {
        let mut stmt = conn.prepare(
            "UPDATE memory_entries SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
        )?;
        for id in ids {
            stmt.execute(params![now, id])?;
        }
    }
    Ok(parse_timestamp(&now))
}

/// Remove an entry from both indexes and the payload table.
///
/// Callers own the transaction.
pub(crate) fn delete_entry(conn: &Connection, collection: &str, id: &str, seq: i64) -> Result<()> {
    SqliteVectorStore::new(conn).delete(collection, id)?;
    lexical::remove(conn, collection, seq)?;
    conn.execute("DELETE FROM memory_entries WHERE seq = ?1", params![seq])?;
    Ok(())
}

pub fn count_entries(conn: &Connection, collection: &CollectionHandle) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memory_entries WHERE collection = ?1",
        params![collection.name],
        |row| row.get(0),
    )?;
    Ok(n.max(0) as u64)
}

/// Write an entry to the memory_log audit table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    operation: &str,
    memory_id: &str,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO memory_log (operation, memory_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, memory_id, details_json, now_timestamp()],
    )?;
    Ok(())
}
