//! pgvector-backed context node index.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use contex_core::{ContextNode, Error, Result, SearchHit, VectorIndex};

/// PostgreSQL implementation of the vector index over `context_node`.
pub struct PgVectorIndex {
    pool: PgPool,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert within an existing transaction, so the caller can commit node
    /// writes together with the event append.
    pub async fn upsert_tx(
        tx: &mut Transaction<'_, Postgres>,
        node: &ContextNode,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO context_node
                 (id, project_id, data_key, node_key, description, data, data_format,
                  embedding, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
             ON CONFLICT (project_id, node_key)
             DO UPDATE SET data_key    = EXCLUDED.data_key,
                           description = EXCLUDED.description,
                           data        = EXCLUDED.data,
                           data_format = EXCLUDED.data_format,
                           embedding   = EXCLUDED.embedding,
                           updated_at  = EXCLUDED.updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(&node.project_id)
        .bind(&node.data_key)
        .bind(&node.node_key)
        .bind(&node.description)
        .bind(&node.data)
        .bind(&node.data_format)
        .bind(Vector::from(node.embedding.clone()))
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    fn parse_node(row: &sqlx::postgres::PgRow) -> ContextNode {
        let embedding: Vector = row.get("embedding");
        let embedding = embedding.as_slice().to_vec();
        ContextNode {
            project_id: row.get("project_id"),
            data_key: row.get("data_key"),
            node_key: row.get("node_key"),
            description: row.get("description"),
            data: row.get("data"),
            data_format: row.get("data_format"),
            embedding,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn upsert(&self, node: &ContextNode) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::upsert_tx(&mut tx, node).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn delete(&self, project_id: &str, node_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM context_node WHERE project_id = $1 AND node_key = $2")
            .bind(project_id)
            .bind(node_key)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn search(
        &self,
        project_id: &str,
        query_embedding: &[f32],
        top_k: i64,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        if top_k <= 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT node_key, data_key, description, data,
                    1.0 - (embedding <=> $2::vector) AS score
             FROM context_node
             WHERE project_id = $1
               AND 1.0 - (embedding <=> $2::vector) >= $3
             ORDER BY embedding <=> $2::vector, node_key ASC
             LIMIT $4",
        )
        .bind(project_id)
        .bind(Vector::from(query_embedding.to_vec()))
        .bind(threshold as f64)
        .bind(top_k)
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
                score: row.get::<f64, _>("score") as f32,
            })
            .collect())
    }

    async fn get(&self, project_id: &str, node_key: &str) -> Result<Option<ContextNode>> {
        let row = sqlx::query(
            "SELECT project_id, data_key, node_key, description, data, data_format,
                    embedding, created_at, updated_at
             FROM context_node
             WHERE project_id = $1 AND node_key = $2",
        )
        .bind(project_id)
        .bind(node_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_node))
    }

    async fn list(&self, project_id: &str) -> Result<Vec<ContextNode>> {
        let rows = sqlx::query(
            "SELECT project_id, data_key, node_key, description, data, data_format,
                    embedding, created_at, updated_at
             FROM context_node
             WHERE project_id = $1
             ORDER BY node_key ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_node).collect())
    }
}
