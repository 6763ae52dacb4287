use anyhow::Result;

use cairn::engine::MemoryEngine;
use cairn::memory::types::{ScopeRef, SearchMode, SearchRequest};

/// Run a search from the terminal and print the ranked results.
pub async fn search(
    engine: &MemoryEngine,
    query: &str,
    scopes: Vec<ScopeRef>,
    k: Option<usize>,
    min_score: Option<f64>,
    mode: SearchMode,
) -> Result<()> {
    let retrieval = &engine.config().retrieval;
    let hits = engine
        .search(SearchRequest {
            query: query.to_string(),
            scopes,
            k: k.unwrap_or(retrieval.default_k),
            min_score: min_score.unwrap_or(retrieval.default_min_score),
            mode,
        })
        .await?;

    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        let preview: String = if hit.entry.text.chars().count() > 120 {
            format!("{}...", hit.entry.text.chars().take(120).collect::<String>())
        } else {
            hit.entry.text.clone()
        };

        println!(
            "  {}. [{}] {} (score: {:.4}, importance: {:.2}, accesses: {})",
            i + 1,
            hit.entry.collection,
            hit.entry.id,
            hit.score,
            hit.entry.metadata.importance,
            hit.entry.metadata.access_count,
        );
        println!("     {preview}");
        println!();
    }

    Ok(())
}
