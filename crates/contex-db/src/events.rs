//! PostgreSQL event log with per-project monotonic sequencing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use contex_core::defaults::EVENT_READ_MAX_LIMIT;
use contex_core::{Error, Event, EventLog, EventType, Result};

/// PostgreSQL implementation of the append-only event log.
///
/// Sequence allocation goes through an upsert on `project_sequence` inside
/// the same transaction as the event row. Concurrent appends to one project
/// serialize on that row, which yields gap-free, strictly increasing
/// sequences.
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Allocate the next sequence for a project within a transaction.
    pub async fn next_sequence(
        tx: &mut Transaction<'_, Postgres>,
        project_id: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO project_sequence (project_id, last_sequence)
             VALUES ($1, 1)
             ON CONFLICT (project_id)
             DO UPDATE SET last_sequence = project_sequence.last_sequence + 1
             RETURNING last_sequence",
        )
        .bind(project_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("last_sequence"))
    }

    /// Append an event within an existing transaction, so callers can commit
    /// the event together with index writes.
    pub async fn append_tx(
        tx: &mut Transaction<'_, Postgres>,
        project_id: &str,
        event_type: EventType,
        data: JsonValue,
    ) -> Result<i64> {
        let sequence = Self::next_sequence(tx, project_id).await?;
        sqlx::query(
            "INSERT INTO event (id, project_id, event_type, data, sequence, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(event_type.as_str())
        .bind(&data)
        .bind(sequence)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "log",
            op = "append",
            project_id,
            sequence,
            event_type = event_type.as_str(),
            "Appended event"
        );
        Ok(sequence)
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<Event> {
        let event_type_raw: String = row.get("event_type");
        let event_type = EventType::parse(&event_type_raw).ok_or_else(|| {
            Error::PermanentBackend(format!("unknown event type in log: {event_type_raw}"))
        })?;
        Ok(Event {
            id: row.get("id"),
            project_id: row.get("project_id"),
            tenant_id: row.get("tenant_id"),
            event_type,
            data: row.get("data"),
            sequence: row.get("sequence"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(
        &self,
        project_id: &str,
        event_type: EventType,
        data: JsonValue,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let sequence = Self::append_tx(&mut tx, project_id, event_type, data).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(sequence)
    }

    async fn read(&self, project_id: &str, since: i64, limit: i64) -> Result<Vec<Event>> {
        let limit = limit.clamp(0, EVENT_READ_MAX_LIMIT);
        let rows = sqlx::query(
            "SELECT id, project_id, tenant_id, event_type, data, sequence, created_at
             FROM event
             WHERE project_id = $1 AND sequence > $2
             ORDER BY sequence ASC
             LIMIT $3",
        )
        .bind(project_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn length(&self, project_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(last_sequence, 0) AS head
             FROM project_sequence WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| r.get("head")).unwrap_or(0))
    }

    async fn trim(&self, retention_days: i64) -> Result<u64> {
        // Trimming never touches context_node rows; the index reflects
        // current state regardless of log history.
        let result = sqlx::query(
            "DELETE FROM event WHERE created_at < now() - ($1 * INTERVAL '1 day')",
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
