//! Dense retrieval: the similarity-store contract and its sqlite-vec implementation.
//!
//! A point is an entry id, its vector (in `vec_<collection>`), and its payload
//! (the `memory_entries` row). Scores are cosine similarities recovered from
//! the L2 distance between unit vectors.

use rusqlite::{params, Connection};

use crate::db::schema::vec_table;
use crate::error::{MemoryError, Result};
use crate::memory::registry::CollectionHandle;
use crate::memory::store::{entry_from_row, ENTRY_COLUMNS};
use crate::memory::types::{MemoryEntry, Scope, StoredMetadata};

/// Payload written alongside a vector.
#[derive(Debug, Clone)]
pub struct EntryPayload<'a> {
    pub text: &'a str,
    pub scope: Scope,
    pub owner_key: Option<&'a str>,
    pub importance: f64,
    pub created_at: &'a str,
    pub metadata: &'a StoredMetadata,
}

/// Restricts a query to part of a collection.
#[derive(Debug, Clone, Default)]
pub struct PayloadFilter {
    pub scope: Option<Scope>,
    pub owner_key: Option<String>,
}

impl PayloadFilter {
    pub fn for_collection(collection: &CollectionHandle) -> Self {
        Self {
            scope: Some(collection.scope),
            owner_key: collection.owner_key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity, higher is closer.
    pub score: f64,
    pub payload: MemoryEntry,
    /// Stored vector; always `Some` when the query asked for vectors.
    pub vector: Option<Vec<f32>>,
}

pub trait VectorStore {
    /// Insert or replace one point. Returns the entry's sequence number.
    fn upsert(
        &self,
        collection: &CollectionHandle,
        id: &str,
        vector: &[f32],
        payload: &EntryPayload<'_>,
    ) -> Result<i64>;

    /// Nearest `k` points, closest first.
    fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
        filter: &PayloadFilter,
        with_vectors: bool,
    ) -> Result<Vec<VectorHit>>;

    fn delete(&self, collection: &str, id: &str) -> Result<()>;
}

/// [`VectorStore`] backed by sqlite-vec tables on a borrowed connection.
pub struct SqliteVectorStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteVectorStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

fn check_dimension(collection: &CollectionHandle, vector: &[f32]) -> Result<()> {
    if vector.len() != collection.dimension {
        return Err(MemoryError::SchemaMismatch {
            collection: collection.name.clone(),
            declared: collection.dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

impl VectorStore for SqliteVectorStore<'_> {
    fn upsert(
        &self,
        collection: &CollectionHandle,
        id: &str,
        vector: &[f32],
        payload: &EntryPayload<'_>,
    ) -> Result<i64> {
        check_dimension(collection, vector)?;
        let metadata_json = serde_json::to_string(payload.metadata)?;

        self.conn.execute(
            "INSERT INTO memory_entries \
             (id, collection, scope, owner_key, text, importance, access_count, created_at, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8) \
             ON CONFLICT(id) DO UPDATE SET \
                 text = excluded.text, importance = excluded.importance, metadata = excluded.metadata",
            params![
                id,
                collection.name,
                payload.scope.as_str(),
                payload.owner_key,
                payload.text,
                payload.importance,
                payload.created_at,
                metadata_json,
            ],
        )?;
        let seq: i64 = self.conn.query_row(
            "SELECT seq FROM memory_entries WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        let table = vec_table(&collection.name);
        self.conn
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        self.conn.execute(
            &format!("INSERT INTO {table} (id, embedding) VALUES (?1, ?2)"),
            params![id, super::embedding_to_bytes(vector)],
        )?;
        Ok(seq)
    }

    fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
        filter: &PayloadFilter,
        with_vectors: bool,
    ) -> Result<Vec<VectorHit>> {
        check_dimension(collection, vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let table = vec_table(&collection.name);
        let sql = format!(
            "SELECT v.distance, v.embedding, {ENTRY_COLUMNS} FROM ( \
                 SELECT id, distance, embedding FROM {table} \
                 WHERE embedding MATCH ?1 AND k = ?2 \
             ) v JOIN memory_entries e ON e.id = v.id \
             WHERE (?3 IS NULL OR e.scope = ?3) AND (?4 IS NULL OR e.owner_key = ?4) \
             ORDER BY v.distance, e.seq"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    super::embedding_to_bytes(vector),
                    k as i64,
                    filter.scope.map(|s| s.as_str()),
                    filter.owner_key,
                ],
                |row| {
                    let distance: f64 = row.get(0)?;
                    let blob: Option<Vec<u8>> = row.get(1)?;
                    let entry = entry_from_row(row, 2)?;
                    Ok((distance, blob, entry))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut hits = Vec::with_capacity(rows.len());
        for (distance, blob, entry) in rows {
            let vector = if with_vectors {
                let decoded = blob.map(|b| super::bytes_to_embedding(&b)).unwrap_or_default();
                if decoded.len() != collection.dimension {
                    return Err(MemoryError::VectorStore(format!(
                        "vector requested for `{}` in `{}` but the store returned {} of {} components",
                        entry.id,
                        collection.name,
                        decoded.len(),
                        collection.dimension
                    )));
                }
                Some(decoded)
            } else {
                None
            };
            hits.push(VectorHit {
                id: entry.id.clone(),
                score: super::l2_to_cosine(distance),
                payload: entry,
                vector,
            });
        }
        Ok(hits)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let table = vec_table(collection);
        self.conn
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        Ok(())
    }
}
