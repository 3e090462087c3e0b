//! Chunk link ledger.
//!
//! Vector and lexical writes are not atomic together. Every chunk whose
//! vector is written gets a row here before the lexical write, and the row
//! is marked linked once the lexical document exists. Rows left unlinked
//! are what [`repair`](crate::repair) works through.

use sqlx::{Row, SqlitePool};

use crate::error::{RagError, RagResult};

/// A chunk whose vector exists but whose lexical document may not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub doc_id: String,
    pub document_name: String,
    pub ordinal: usize,
    pub embedding_id: u64,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerCounts {
    pub linked: u64,
    pub pending: u64,
}

pub struct LinkLedger {
    pool: SqlitePool,
}

fn ledger_err(e: sqlx::Error) -> RagError {
    RagError::Ledger(e.to_string())
}

impl LinkLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a written vector. Re-ingesting a chunk id replaces the row
    /// and resets it to unlinked.
    pub async fn record(&self, link: &PendingLink) -> RagResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk_links
                (doc_id, document_name, ordinal, embedding_id, content, linked, created_at, linked_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, NULL)
            ON CONFLICT(doc_id) DO UPDATE SET
                document_name = excluded.document_name,
                ordinal = excluded.ordinal,
                embedding_id = excluded.embedding_id,
                content = excluded.content,
                linked = 0,
                created_at = excluded.created_at,
                linked_at = NULL
            "#,
        )
        .bind(&link.doc_id)
        .bind(&link.document_name)
        .bind(link.ordinal as i64)
        .bind(link.embedding_id as i64)
        .bind(&link.content)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(ledger_err)?;
        Ok(())
    }

    pub async fn mark_linked(&self, doc_id: &str) -> RagResult<()> {
        sqlx::query("UPDATE chunk_links SET linked = 1, linked_at = ? WHERE doc_id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(doc_id)
            .execute(&self.pool)
            .await
            .map_err(ledger_err)?;
        Ok(())
    }

    /// Unlinked rows, oldest vector first.
    pub async fn pending(&self) -> RagResult<Vec<PendingLink>> {
        let rows = sqlx::query(
            "SELECT doc_id, document_name, ordinal, embedding_id, content \
             FROM chunk_links WHERE linked = 0 ORDER BY embedding_id, doc_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ledger_err)?;

        Ok(rows
            .iter()
            .map(|row| PendingLink {
                doc_id: row.get("doc_id"),
                document_name: row.get("document_name"),
                ordinal: row.get::<i64, _>("ordinal") as usize,
                embedding_id: row.get::<i64, _>("embedding_id") as u64,
                content: row.get("content"),
            })
            .collect())
    }

    pub async fn forget(&self, doc_id: &str) -> RagResult<bool> {
        let result = sqlx::query("DELETE FROM chunk_links WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await
            .map_err(ledger_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn counts(&self) -> RagResult<LedgerCounts> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(linked = 1), 0) AS linked, COALESCE(SUM(linked = 0), 0) AS pending \
             FROM chunk_links",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(ledger_err)?;
        Ok(LedgerCounts {
            linked: row.get::<i64, _>("linked") as u64,
            pending: row.get::<i64, _>("pending") as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn ledger() -> LinkLedger {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        LinkLedger::new(pool)
    }

    fn link(name: &str, ordinal: usize, embedding_id: u64) -> PendingLink {
        PendingLink {
            doc_id: crate::models::chunk_doc_id(name, ordinal),
            document_name: name.to_string(),
            ordinal,
            embedding_id,
            content: format!("chunk {}", ordinal),
        }
    }

    #[tokio::test]
    async fn test_record_then_mark() {
        let ledger = ledger().await;
        ledger.record(&link("a.txt", 0, 0)).await.unwrap();
        ledger.record(&link("a.txt", 1, 1)).await.unwrap();
        ledger.mark_linked("a.txt_0").await.unwrap();

        let pending = ledger.pending().await.unwrap();
        assert_eq!(pending, vec![link("a.txt", 1, 1)]);
        assert_eq!(
            ledger.counts().await.unwrap(),
            LedgerCounts {
                linked: 1,
                pending: 1
            }
        );
    }

    #[tokio::test]
    async fn test_rerecord_resets_link() {
        let ledger = ledger().await;
        ledger.record(&link("a.txt", 0, 0)).await.unwrap();
        ledger.mark_linked("a.txt_0").await.unwrap();
        ledger.record(&link("a.txt", 0, 5)).await.unwrap();

        let pending = ledger.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].embedding_id, 5);
    }

    #[tokio::test]
    async fn test_empty_counts() {
        let ledger = ledger().await;
        assert_eq!(ledger.counts().await.unwrap(), LedgerCounts::default());
        assert!(!ledger.forget("missing_0").await.unwrap());
    }
}
