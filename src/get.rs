//! Chunk lookup and removal by lexical document id (`{name}_{ordinal}`).
//!
//! CLI counterparts of `GET /chunks/{id}` and `DELETE /chunks/{id}`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::services::Services;

/// CLI entry point: print one chunk.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let services = Services::from_config(config).await?;
    let Some(doc) = services.get_chunk(id).await? else {
        bail!("chunk not found: {}", id);
    };

    println!("--- Chunk ---");
    println!("id:           {}", doc.id);
    println!("embedding_id: {}", doc.embedding_id);
    println!("metadata:     {}", doc.metadata);
    println!();
    println!("{}", doc.content);
    Ok(())
}

/// CLI entry point: delete one chunk from the lexical index.
pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let services = Services::from_config(config).await?;
    if services.delete_chunk(id).await? {
        println!("deleted {}", id);
    } else {
        println!("no chunk with id {}", id);
    }
    Ok(())
}
