use anyhow::Result;

use cairn::engine::MemoryEngine;
use cairn::memory::types::Scope;

use super::format_bytes;

/// Entry count and size for one scope, or every scope.
pub async fn stats(engine: &MemoryEngine, scope: Option<Scope>, owner_key: Option<&str>) -> Result<()> {
    let scopes: Vec<Scope> = match scope {
        Some(s) => vec![s],
        None => Scope::ALL.to_vec(),
    };

    println!("{:<12} {:>12} {:>10} {:>12}", "Scope", "Collections", "Entries", "Size");
    println!("{}", "=".repeat(49));
    for scope in scopes {
        let s = engine.stats(scope, owner_key).await?;
        println!(
            "{:<12} {:>12} {:>10} {:>12}",
            s.scope.as_str(),
            s.collections,
            s.entry_count,
            format_bytes(s.size_estimate_bytes)
        );
    }
    Ok(())
}

/// Every collection with its utilization.
pub async fn collections(engine: &MemoryEngine) -> Result<()> {
    let collections = engine.list_collections().await?;
    if collections.is_empty() {
        println!("No collections yet.");
        return Ok(());
    }

    println!("{:<40} {:>6} {:>10} {:>10} {:>7}", "Collection", "Dim", "Entries", "Capacity", "Used");
    println!("{}", "=".repeat(77));
    for c in &collections {
        println!(
            "{:<40} {:>6} {:>10} {:>10} {:>6.1}%",
            c.collection.name,
            c.collection.dimension,
            c.entry_count,
            c.collection.capacity_limit,
            c.utilization * 100.0
        );
    }
    Ok(())
}
