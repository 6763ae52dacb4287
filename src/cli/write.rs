use anyhow::Result;

use cairn::engine::MemoryEngine;
use cairn::memory::types::{Scope, WriteMetadata};

/// Store one memory from the command line and print its id.
pub async fn write(
    engine: &MemoryEngine,
    scope: Scope,
    owner_key: Option<&str>,
    text: &str,
    importance: Option<f64>,
    tags: Vec<String>,
) -> Result<()> {
    let metadata = WriteMetadata {
        importance,
        tags,
        ..WriteMetadata::default()
    };
    let id = engine.write(scope, owner_key, text, metadata).await?;
    println!("{id}");
    Ok(())
}
