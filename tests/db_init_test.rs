mod helpers;

use cairn::db;
use cairn::db::schema::{fts_table, table_exists, vec_table};
use cairn::memory::types::{Scope, WriteMetadata};

#[test]
fn schema_creates_core_tables() {
    let conn = helpers::test_db();
    for table in ["collections", "memory_entries", "memory_log", "schema_meta"] {
        assert!(table_exists(&conn, table).unwrap(), "{table} missing");
    }
}

#[test]
fn sqlite_vec_is_loaded() {
    let conn = helpers::test_db();
    let version: String = conn.query_row("SELECT vec_version()", [], |r| r.get(0)).unwrap();
    assert!(version.starts_with('v'));
}

#[test]
fn on_disk_database_uses_wal_and_passes_integrity_check() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("memory.db");
    let conn = db::open_database(&path, &helpers::test_config()).unwrap();

    let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
    assert_eq!(db::integrity_check(&conn).unwrap(), "ok");
    assert!(path.exists());
}

#[tokio::test]
async fn collection_tables_are_created_on_first_write() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, path) = helpers::engine_on_disk(dir.path(), helpers::test_config());
    engine
        .write(Scope::Thread, Some("Chat#42"), "first message", WriteMetadata::default())
        .await
        .unwrap();

    let conn = helpers::side_connection(&path);
    let name = cairn::memory::registry::collection_name(Scope::Thread, Some("Chat#42")).unwrap();
    assert_eq!(name, "thread__43hat_2342");
    assert!(table_exists(&conn, &vec_table(&name)).unwrap());
    assert!(table_exists(&conn, &fts_table(&name)).unwrap());
    assert_eq!(helpers::audit_count(&conn, "create"), 1);
}

#[tokio::test]
async fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = helpers::engine_on_disk(dir.path(), helpers::test_config());
    engine
        .write(Scope::Global, None, "persistent fact", WriteMetadata::default())
        .await
        .unwrap();
    drop(engine);

    let (engine, _) = helpers::engine_on_disk(dir.path(), helpers::test_config());
    let stats = engine.stats(Scope::Global, None).await.unwrap();
    assert_eq!(stats.entry_count, 1);
}

#[tokio::test]
async fn vacuum_is_audited() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, path) = helpers::engine_on_disk(dir.path(), helpers::test_config());
    engine.vacuum().await.unwrap();
    let conn = helpers::side_connection(&path);
    assert_eq!(helpers::audit_count(&conn, "vacuum"), 1);
}
