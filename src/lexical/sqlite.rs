//! Lexical backend on SQLite FTS5, stored in the service database.
//!
//! Relevance follows the shape of an Elasticsearch `bool.should` query: a
//! text match contributes its BM25 score (negated FTS5 `bm25()`, so higher
//! is better) and membership of `embedding_id` in the position set adds a
//! constant `1.0`.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use super::{query_terms, BackendError, LexicalBackend};
use crate::models::{LexicalDocument, LexicalHit};

/// Score added by the position-membership clause.
const POSITION_MATCH_SCORE: f64 = 1.0;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl SqliteBackend {
    /// BM25-ranked content matches, best first, keyed by document id. With
    /// `within`, only documents whose `embedding_id` is listed count.
    async fn text_matches(
        &self,
        fts_query: &str,
        within: Option<&[u64]>,
        limit: usize,
    ) -> Result<Vec<(String, LexicalHit)>, BackendError> {
        let filter = match within {
            Some(ids) => format!("AND d.embedding_id IN ({})", vec!["?"; ids.len()].join(", ")),
            None => String::new(),
        };
        let sql = format!(
            r#"
            SELECT d.id, d.content, d.metadata_json, d.embedding_id,
                   bm25(lexical_fts) AS text_rank
            FROM lexical_fts
            JOIN lexical_documents d ON d.id = lexical_fts.doc_id
            WHERE lexical_fts MATCH ? {}
            ORDER BY text_rank, d.embedding_id
            LIMIT ?
            "#,
            filter
        );

        let mut query = sqlx::query(&sql).bind(fts_query);
        for p in within.unwrap_or_default() {
            query = query.bind(*p as i64);
        }
        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("text_rank");
                (row.get("id"), row_to_hit(row, -rank))
            })
            .collect())
    }
}

fn map_err(e: sqlx::Error) -> BackendError {
    match e {
        sqlx::Error::PoolTimedOut => BackendError::Timeout("database pool timed out".to_string()),
        other => BackendError::Failed(other.to_string()),
    }
}

fn row_to_hit(row: &sqlx::sqlite::SqliteRow, score: f64) -> LexicalHit {
    let metadata_json: String = row.get("metadata_json");
    let embedding_id: i64 = row.get("embedding_id");
    LexicalHit {
        content: row.get("content"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        embedding_id: embedding_id as u64,
        score,
    }
}

#[async_trait]
impl LexicalBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn ensure_index(&self) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lexical_documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                embedding_id INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_lexical_embedding_id ON lexical_documents(embedding_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        // FTS5 CREATE is not idempotent natively, so we check first
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='lexical_fts'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        if !fts_exists {
            sqlx::query("CREATE VIRTUAL TABLE lexical_fts USING fts5(doc_id UNINDEXED, content)")
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        }

        Ok(())
    }

    async fn upsert(&self, doc: &LexicalDocument) -> Result<(), BackendError> {
        let metadata_json = serde_json::to_string(&doc.metadata)
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(map_err)?;

        sqlx::query(
            r#"
            INSERT INTO lexical_documents (id, content, metadata_json, embedding_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                embedding_id = excluded.embedding_id
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.content)
        .bind(&metadata_json)
        .bind(doc.embedding_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        sqlx::query("DELETE FROM lexical_fts WHERE doc_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        sqlx::query("INSERT INTO lexical_fts (doc_id, content) VALUES (?, ?)")
            .bind(&doc.id)
            .bind(&doc.content)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn search(
        &self,
        query_text: &str,
        positions: &[u64],
        limit: usize,
    ) -> Result<Vec<LexicalHit>, BackendError> {
        let mut hits: HashMap<String, LexicalHit> = HashMap::new();

        // Full-text clause
        let terms = query_terms(query_text);
        if !terms.is_empty() {
            let fts_query = terms
                .iter()
                .map(|t| format!("\"{}\"", t))
                .collect::<Vec<_>>()
                .join(" OR ");

            // Position-clause documents get their text score from the
            // restricted call, so only the top `limit + positions.len()`
            // remaining text matches can reach the result.
            let bound = limit.saturating_add(positions.len());
            for (id, hit) in self.text_matches(&fts_query, None, bound).await? {
                hits.insert(id, hit);
            }
            if !positions.is_empty() {
                let restricted = self
                    .text_matches(&fts_query, Some(positions), positions.len())
                    .await?;
                for (id, hit) in restricted {
                    hits.insert(id, hit);
                }
            }
        }

        // Position-membership clause
        if !positions.is_empty() {
            let placeholders = vec!["?"; positions.len()].join(", ");
            let sql = format!(
                "SELECT id, content, metadata_json, embedding_id FROM lexical_documents \
                 WHERE embedding_id IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for p in positions {
                query = query.bind(*p as i64);
            }
            let rows = query.fetch_all(&self.pool).await.map_err(map_err)?;

            for row in &rows {
                let id: String = row.get("id");
                hits.entry(id)
                    .and_modify(|h| h.score += POSITION_MATCH_SCORE)
                    .or_insert_with(|| row_to_hit(row, POSITION_MATCH_SCORE));
            }
        }

        let mut ranked: Vec<LexicalHit> = hits.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.embedding_id.cmp(&b.embedding_id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn get(&self, id: &str) -> Result<Option<LexicalDocument>, BackendError> {
        let row = sqlx::query(
            "SELECT id, content, metadata_json, embedding_id FROM lexical_documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(row.map(|row| {
            let hit = row_to_hit(&row, 0.0);
            LexicalDocument {
                id: row.get("id"),
                content: hit.content,
                metadata: hit.metadata,
                embedding_id: hit.embedding_id,
            }
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool, BackendError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        sqlx::query("DELETE FROM lexical_fts WHERE doc_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        let result = sqlx::query("DELETE FROM lexical_documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }
}
