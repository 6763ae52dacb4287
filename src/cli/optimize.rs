use anyhow::Result;

use cairn::engine::MemoryEngine;
use cairn::memory::prune::{PrunePlan, PruneStrategy, PruneTrigger};
use cairn::memory::types::Scope;

/// Prune a scope (or one owner's collection) and print what was selected.
pub async fn optimize(
    engine: &MemoryEngine,
    scope: Scope,
    owner_key: Option<String>,
    strategy: PruneStrategy,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let result = engine
        .prune(PrunePlan {
            scope,
            owner_key,
            strategy,
            limit,
            dry_run,
            trigger: PruneTrigger::Manual,
        })
        .await?;

    let verb = if dry_run { "Would remove" } else { "Removed" };
    println!(
        "{verb} {} of {} entries from {} (strategy: {}, limit: {})",
        result.candidates_considered, result.entries_examined, scope, result.strategy, result.limit
    );
    for id in &result.candidate_ids {
        println!("  {id}");
    }
    if dry_run && result.candidates_considered > 0 {
        println!("\nRe-run with --commit to delete.");
    }
    Ok(())
}

pub async fn vacuum(engine: &MemoryEngine) -> Result<()> {
    let before = engine.collect_metrics().await?;
    engine.vacuum().await?;
    let after = engine.collect_metrics().await?;
    println!(
        "Vacuum complete: fragmentation {:.1}% -> {:.1}%",
        before.fragmentation * 100.0,
        after.fragmentation * 100.0
    );
    Ok(())
}
