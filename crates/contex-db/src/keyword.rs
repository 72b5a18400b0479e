//! Full-text keyword index over context nodes.
//!
//! Uses the generated `tsv` column on `context_node` with
//! `websearch_to_tsquery` for OR/NOT/phrase operators and `ts_rank` with
//! normalization flag 32 (divides by rank + 1) for BM25-like scoring.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use contex_core::{Error, KeywordIndex, Result, SearchHit};

/// PostgreSQL FTS implementation of the keyword index.
pub struct PgKeywordIndex {
    pool: PgPool,
}

impl PgKeywordIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeywordIndex for PgKeywordIndex {
    async fn search(&self, project_id: &str, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
        if limit <= 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT node_key, data_key, description, data,
                    ts_rank(tsv, websearch_to_tsquery('english', $2), 32) AS score
             FROM context_node
             WHERE project_id = $1
               AND tsv @@ websearch_to_tsquery('english', $2)
             ORDER BY score DESC, node_key ASC
             LIMIT $3",
        )
        .bind(project_id)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                node_key: row.get("node_key"),
                data_key: row.get("data_key"),
                description: row.get("description"),
                data: row.get("data"),
                score: row.get::<f32, _>("score"),
            })
            .collect())
    }
}
