use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;

use crate::error::Result;
use crate::memory::registry::{self, CollectionHandle};
use crate::memory::types::{Scope, ScopeStats};

/// Per-collection counts used by the metrics sampler and `cairn collections`.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    #[serde(flatten)]
    pub collection: CollectionHandle,
    pub entry_count: u64,
    pub size_estimate_bytes: u64,
    /// `entry_count / capacity_limit`.
    pub utilization: f64,
}

/// Cheap aggregate over the collections a scope (and optional owner) covers.
pub fn scope_stats(conn: &Connection, scope: Scope, owner_key: Option<&str>) -> Result<ScopeStats> {
    let collections = registry::collections_for(conn, scope, owner_key)?;
    let mut entry_count = 0;
    let mut size_estimate_bytes = 0;
    for handle in &collections {
        let (count, bytes) = collection_size(conn, handle)?;
        entry_count += count;
        size_estimate_bytes += bytes;
    }
    Ok(ScopeStats {
        scope,
        owner_key: if scope.is_owned() {
            owner_key.map(str::to_string)
        } else {
            None
        },
        collections: collections.len(),
        entry_count,
        size_estimate_bytes,
    })
}

/// Stats for every registered collection.
pub fn all_collection_stats(conn: &Connection) -> Result<Vec<CollectionStats>> {
    registry::list_all(conn)?
        .into_iter()
        .map(|collection| {
            let (entry_count, size_estimate_bytes) = collection_size(conn, &collection)?;
            let utilization = if collection.capacity_limit == 0 {
                0.0
            } else {
                entry_count as f64 / collection.capacity_limit as f64
            };
            Ok(CollectionStats {
                collection,
                entry_count,
                size_estimate_bytes,
                utilization,
            })
        })
        .collect()
}

/// `(entry_count, estimated bytes)`: text and metadata lengths plus the raw vectors.
fn collection_size(conn: &Connection, handle: &CollectionHandle) -> Result<(u64, u64)> {
    let (count, payload_bytes): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(LENGTH(text) + COALESCE(LENGTH(metadata), 0)), 0) \
         FROM memory_entries WHERE collection = ?1",
        params![handle.name],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let count = count.max(0) as u64;
    let vector_bytes = count * (handle.dimension * std::mem::size_of::<f32>()) as u64;
    Ok((count, payload_bytes.max(0) as u64 + vector_bytes))
}

/// Size of the database file on disk; 0 for in-memory stores.
pub fn db_size_bytes(db_path: Option<&Path>) -> u64 {
    db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0)
}
