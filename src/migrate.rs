//! Idempotent schema setup for the tables this crate owns.
//!
//! The lexical backend creates its own tables through
//! [`LexicalIndexGateway::ensure_index`](crate::lexical::LexicalIndexGateway::ensure_index).

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create ledger and cache tables on an already-open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per chunk whose vector was written. `linked` flips to 1 once
    // the matching lexical document exists.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_links (
            doc_id TEXT PRIMARY KEY,
            document_name TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            embedding_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            linked INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            linked_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_links_linked ON chunk_links(linked)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_links_document ON chunk_links(document_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
