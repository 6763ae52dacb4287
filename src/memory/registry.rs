//! Collection registry: `(scope, owner_key)` → collection name, and lazy
//! creation of the backing dense/sparse tables.
//!
//! The naming function is pure and stable so external tools can reproduce it:
//!
//! | scope | owner | name |
//! |---|---|---|
//! | `Global` | ignored | `global` |
//! | any other | `alpha` | `project_alpha` |
//! | any other | `Team A` | `project__54eam_20_41` |
//!
//! Owner bytes in `[a-z0-9]` are kept verbatim; every other byte becomes `_`
//! followed by two lower-case hex digits. Because `_` itself is always
//! escaped, the encoding is injective.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::schema;
use crate::error::{MemoryError, Result};
use crate::memory::types::Scope;

/// A resolved, existing collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionHandle {
    pub name: String,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<String>,
    pub dimension: usize,
    pub capacity_limit: usize,
    pub created_at: DateTime<Utc>,
}

/// Deterministic collection name for a scope and owner.
///
/// Returns `InvalidRequest` when a per-owner scope is given no owner (or an
/// empty one).
pub fn collection_name(scope: Scope, owner_key: Option<&str>) -> Result<String> {
    if !scope.is_owned() {
        return Ok(scope.as_str().to_string());
    }
    let owner = owner_key
        .filter(|o| !o.is_empty())
        .ok_or_else(|| MemoryError::InvalidRequest(format!("scope `{scope}` requires an owner key")))?;

    let mut name = String::with_capacity(scope.as_str().len() + 1 + owner.len());
    name.push_str(scope.as_str());
    name.push('_');
    for b in owner.bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() {
            name.push(b as char);
        } else {
            name.push_str(&format!("_{b:02x}"));
        }
    }
    Ok(name)
}

/// Ensure the collection for `(scope, owner_key)` exists and matches `dimension`.
///
/// The first call creates the registry row plus the `vec_*`/`fts_*` tables;
/// later calls are reads. A stored dimension different from `dimension` is a
/// [`MemoryError::SchemaMismatch`].
pub fn ensure(
    conn: &Connection,
    scope: Scope,
    owner_key: Option<&str>,
    dimension: usize,
    capacity_limit: usize,
) -> Result<CollectionHandle> {
    let name = collection_name(scope, owner_key)?;

    if let Some(existing) = lookup_by_name(conn, &name)? {
        if existing.dimension != dimension {
            return Err(MemoryError::SchemaMismatch {
                collection: name,
                declared: existing.dimension,
                actual: dimension,
            });
        }
        return Ok(existing);
    }

    let owner_key = if scope.is_owned() {
        owner_key.map(str::to_string)
    } else {
        None
    };
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO collections (name, scope, owner_key, dimension, capacity_limit, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            name,
            scope.as_str(),
            owner_key,
            dimension as i64,
            capacity_limit as i64,
            super::format_timestamp(created_at),
        ],
    )?;
    schema::create_collection_tables(conn, &name, dimension)?;

    tracing::info!(collection = %name, scope = %scope, dimension, capacity_limit, "collection created");

    Ok(CollectionHandle {
        name,
        scope,
        owner_key,
        dimension,
        capacity_limit,
        created_at,
    })
}

/// Resolve without creating. `Ok(None)` when the collection has never been written.
pub fn lookup(conn: &Connection, scope: Scope, owner_key: Option<&str>) -> Result<Option<CollectionHandle>> {
    let name = collection_name(scope, owner_key)?;
    lookup_by_name(conn, &name)
}

pub fn lookup_by_name(conn: &Connection, name: &str) -> Result<Option<CollectionHandle>> {
    let handle = conn
        .query_row(
            "SELECT name, scope, owner_key, dimension, capacity_limit, created_at \
             FROM collections WHERE name = ?1",
            params![name],
            row_to_handle,
        )
        .optional()?;
    Ok(handle)
}

/// Every registered collection, ordered by name.
pub fn list_all(conn: &Connection) -> Result<Vec<CollectionHandle>> {
    let mut stmt = conn.prepare(
        "SELECT name, scope, owner_key, dimension, capacity_limit, created_at \
         FROM collections ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], row_to_handle)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Collections covered by a scope ref: one when the owner is known (or for
/// `Global`), every owner's collection otherwise.
pub fn collections_for(
    conn: &Connection,
    scope: Scope,
    owner_key: Option<&str>,
) -> Result<Vec<CollectionHandle>> {
    if !scope.is_owned() || owner_key.is_some() {
        return Ok(lookup(conn, scope, owner_key)?.into_iter().collect());
    }
    let mut stmt = conn.prepare(
        "SELECT name, scope, owner_key, dimension, capacity_limit, created_at \
         FROM collections WHERE scope = ?1 ORDER BY name",
    )?;
    let rows = stmt
        .query_map(params![scope.as_str()], row_to_handle)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_handle(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionHandle> {
    let scope: String = row.get(1)?;
    let created_at: String = row.get(5)?;
    Ok(CollectionHandle {
        name: row.get(0)?,
        scope: scope.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?,
        owner_key: row.get(2)?,
        dimension: row.get::<_, i64>(3)? as usize,
        capacity_limit: row.get::<_, i64>(4)? as usize,
        created_at: super::parse_timestamp(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CairnConfig;
    use crate::db;

    fn test_db() -> Connection {
        db::open_in_memory(&CairnConfig::default()).unwrap()
    }

    #[test]
    fn naming_is_deterministic_and_scope_prefixed() {
        assert_eq!(collection_name(Scope::Global, None).unwrap(), "global");
        assert_eq!(collection_name(Scope::Global, Some("ignored")).unwrap(), "global");
        assert_eq!(collection_name(Scope::Project, Some("alpha")).unwrap(), "project_alpha");
        assert_eq!(collection_name(Scope::Agent, Some("planner-1")).unwrap(), "agent_planner_2d1");
        assert_eq!(collection_name(Scope::Thread, Some("T 9")).unwrap(), "thread__54_209");
    }

    #[test]
    fn naming_is_injective_for_lookalike_owners() {
        let a = collection_name(Scope::Project, Some("a_b")).unwrap();
        let b = collection_name(Scope::Project, Some("a-b")).unwrap();
        let c = collection_name(Scope::Project, Some("A_b")).unwrap();
        let d = collection_name(Scope::Project, Some("a_5fb")).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'));
    }

    #[test]
    fn owned_scope_requires_owner() {
        let err = collection_name(Scope::Project, None).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidRequest(_)));
        let err = collection_name(Scope::Thread, Some("")).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidRequest(_)));
    }

    #[test]
    fn ensure_is_idempotent() {
        let conn = test_db();
        let first = ensure(&conn, Scope::Project, Some("alpha"), 8, 5000).unwrap();
        let second = ensure(&conn, Scope::Project, Some("alpha"), 8, 5000).unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(list_all(&conn).unwrap().len(), 1);
        assert!(schema::table_exists(&conn, "vec_project_alpha").unwrap());
        assert!(schema::table_exists(&conn, "fts_project_alpha").unwrap());
    }

    #[test]
    fn ensure_rejects_dimension_change() {
        let conn = test_db();
        ensure(&conn, Scope::Agent, Some("a1"), 8, 2000).unwrap();
        let err = ensure(&conn, Scope::Agent, Some("a1"), 16, 2000).unwrap_err();
        match err {
            MemoryError::SchemaMismatch {
                collection,
                declared,
                actual,
            } => {
                assert_eq!(collection, "agent_a1");
                assert_eq!(declared, 8);
                assert_eq!(actual, 16);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn lookup_does_not_create() {
        let conn = test_db();
        assert!(lookup(&conn, Scope::Global, None).unwrap().is_none());
        assert!(list_all(&conn).unwrap().is_empty());
    }

    #[test]
    fn collections_for_expands_missing_owner() {
        let conn = test_db();
        ensure(&conn, Scope::Project, Some("alpha"), 8, 5000).unwrap();
        ensure(&conn, Scope::Project, Some("beta"), 8, 5000).unwrap();
        ensure(&conn, Scope::Agent, Some("alpha"), 8, 2000).unwrap();

        let all_projects = collections_for(&conn, Scope::Project, None).unwrap();
        assert_eq!(all_projects.len(), 2);
        let one = collections_for(&conn, Scope::Project, Some("beta")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].owner_key.as_deref(), Some("beta"));
        assert!(collections_for(&conn, Scope::Thread, None).unwrap().is_empty());
    }
}
