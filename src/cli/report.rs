//! CLI `report` command: metrics and health in one screen.

use anyhow::Result;

use cairn::engine::MemoryEngine;

use super::format_bytes;

pub async fn report(engine: &MemoryEngine, json: bool) -> Result<()> {
    let report = engine.report().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let m = &report.metrics;
    println!("Cairn Memory Report ({})", report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{}", "=".repeat(48));
    println!("Status:            {}", report.health.status);
    println!("Utilization (max): {:.1}%", m.utilization * 100.0);
    println!("Fragmentation:     {:.1}%", m.fragmentation * 100.0);
    println!("Database size:     {}", format_bytes(m.db_size_bytes));
    match m.cache_hit_ratio() {
        Some(ratio) => println!("Cache hit ratio:   {:.1}% of {} lookups", ratio * 100.0, m.cache.lookups()),
        None => println!("Cache hit ratio:   (no lookups)"),
    }
    match m.search_latency.avg_ms {
        Some(avg) => println!("Avg search time:   {avg:.1} ms"),
        None => println!("Avg search time:   (no searches)"),
    }
    println!(
        "Embedding:         {} ({} dims, {})",
        report.embedding.provider,
        report.embedding.dimension,
        if report.embedding.healthy { "healthy" } else { "UNHEALTHY" }
    );
    println!();

    println!("{:<12} {:>12} {:>10} {:>12} {:>7}", "Scope", "Collections", "Entries", "Size", "Max");
    for (scope, s) in &m.scopes {
        println!(
            "{:<12} {:>12} {:>10} {:>12} {:>6.1}%",
            scope.as_str(),
            s.collections,
            s.entry_count,
            format_bytes(s.size_estimate_bytes),
            s.max_utilization * 100.0
        );
    }

    if !report.health.alerts.is_empty() {
        println!();
        println!("Alerts:");
        for alert in &report.health.alerts {
            println!("  [{}] {}: {}", alert.level, alert.metric, alert.message);
            println!("      -> {}", alert.recommendation);
        }
    }

    Ok(())
}
