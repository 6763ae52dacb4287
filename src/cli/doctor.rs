//! CLI `doctor` command: database and embedding diagnostics.

use anyhow::{Context, Result};

use cairn::config::{expand_tilde, CairnConfig};
use cairn::db;
use cairn::embedding::local::model_files_present;
use cairn::memory::stats::all_collection_stats;

use super::format_bytes;

pub fn doctor(config: &CairnConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `cairn serve` or `cairn write` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path, config).context("failed to open database (may be corrupt)")?;

    let schema_version = db::migrations::get_schema_version(&conn)?;
    let vec_version: String = conn.query_row("SELECT vec_version()", [], |r| r.get(0))?;
    let identity = db::migrations::get_embedding_identity(&conn)?;
    let collections = all_collection_stats(&conn)?;
    let entries: u64 = collections.iter().map(|c| c.entry_count).sum();
    let log_count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_log", [], |r| r.get(0))?;
    let fragmentation = db::fragmentation_ratio(&conn)?;
    let integrity = db::integrity_check(&conn)?;

    println!("Cairn Health Report");
    println!("===================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {schema_version}");
    println!("sqlite-vec:        {vec_version}");
    println!("Fragmentation:     {:.1}%", fragmentation * 100.0);
    println!();
    println!("Embedding:");
    match &identity {
        Some(stored) => println!("  Stored:          {} ({} dims)", stored.provider, stored.dimension),
        None => println!("  Stored:          (not set)"),
    }
    println!(
        "  Configured:      {} ({} dims)",
        config.embedding.provider, config.embedding.dimension
    );
    if let Some(stored) = &identity {
        if stored.dimension != config.embedding.dimension {
            println!("  WARNING: dimension mismatch! Existing collections will reject writes.");
        }
    }
    if config.embedding.provider == "local" {
        let present = model_files_present(&expand_tilde(&config.embedding.cache_dir));
        println!(
            "  Model files:     {}",
            if present { "present" } else { "MISSING (run `cairn model download`)" }
        );
    }
    println!();
    println!("Row counts:");
    println!("  Collections:     {}", collections.len());
    println!("  Entries:         {entries}");
    println!("  Audit log:       {log_count}");
    println!();
    if integrity == "ok" {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({integrity})");
        println!();
        println!("Recovery: restore ~/.cairn/memory.db from a backup.");
    }
    if fragmentation >= config.health.fragmentation.warning {
        println!();
        println!("Run `cairn vacuum` to reclaim free pages.");
    }

    Ok(())
}
