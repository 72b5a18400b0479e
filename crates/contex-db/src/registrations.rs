//! Agent registration repository.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::info;

use contex_core::{AgentRegistration, DeliveryMode, Error, RegistrationRepository, Result};

/// PostgreSQL implementation of the subscription registry.
pub struct PgRegistrationRepository {
    pool: PgPool,
}

impl PgRegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<AgentRegistration> {
        let mode: String = row.get("delivery_mode");
        let target: String = row.get("delivery_target");
        let hmac_secret: Option<String> = row.get("hmac_secret");
        let delivery = match mode.as_str() {
            "pubsub" => DeliveryMode::PubSub { channel: target },
            "webhook" => DeliveryMode::Webhook {
                url: target,
                hmac_secret,
            },
            other => {
                return Err(Error::PermanentBackend(format!(
                    "unknown delivery mode in registry: {other}"
                )))
            }
        };
        Ok(AgentRegistration {
            agent_id: row.get("agent_id"),
            project_id: row.get("project_id"),
            needs: row.get("needs"),
            delivery,
            last_seen_sequence: row.get("last_seen_sequence"),
            created_at: row.get("created_at"),
            last_active_at: row.get("last_active_at"),
        })
    }
}

#[async_trait]
impl RegistrationRepository for PgRegistrationRepository {
    async fn upsert(&self, registration: &AgentRegistration) -> Result<()> {
        let hmac_secret = match &registration.delivery {
            DeliveryMode::Webhook { hmac_secret, .. } => hmac_secret.clone(),
            DeliveryMode::PubSub { .. } => None,
        };
        sqlx::query(
            "INSERT INTO agent_registration
                 (agent_id, project_id, needs, delivery_mode, delivery_target,
                  hmac_secret, last_seen_sequence, created_at, last_active_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now())
             ON CONFLICT (agent_id)
             DO UPDATE SET project_id         = EXCLUDED.project_id,
                           needs              = EXCLUDED.needs,
                           delivery_mode      = EXCLUDED.delivery_mode,
                           delivery_target    = EXCLUDED.delivery_target,
                           hmac_secret        = EXCLUDED.hmac_secret,
                           last_seen_sequence = EXCLUDED.last_seen_sequence,
                           last_active_at     = now()",
        )
        .bind(&registration.agent_id)
        .bind(&registration.project_id)
        .bind(&registration.needs)
        .bind(registration.delivery.mode_str())
        .bind(registration.delivery.target())
        .bind(&hmac_secret)
        .bind(registration.last_seen_sequence)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "registry",
            op = "upsert",
            agent_id = %registration.agent_id,
            project_id = %registration.project_id,
            "Registration stored"
        );
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agent_registration WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, agent_id: &str) -> Result<Option<AgentRegistration>> {
        let row = sqlx::query(
            "SELECT agent_id, project_id, needs, delivery_mode, delivery_target,
                    hmac_secret, last_seen_sequence, created_at, last_active_at
             FROM agent_registration WHERE agent_id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn list(&self, project_id: Option<&str>) -> Result<Vec<AgentRegistration>> {
        let rows = match project_id {
            Some(project_id) => {
                sqlx::query(
                    "SELECT agent_id, project_id, needs, delivery_mode, delivery_target,
                            hmac_secret, last_seen_sequence, created_at, last_active_at
                     FROM agent_registration
                     WHERE project_id = $1
                     ORDER BY agent_id ASC",
                )
                .bind(project_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT agent_id, project_id, needs, delivery_mode, delivery_target,
                            hmac_secret, last_seen_sequence, created_at, last_active_at
                     FROM agent_registration
                     ORDER BY agent_id ASC",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn advance_sequence(&self, agent_id: &str, sequence: i64) -> Result<()> {
        // Monotonic: stale updates from out-of-order acks are no-ops.
        sqlx::query(
            "UPDATE agent_registration
             SET last_seen_sequence = GREATEST(last_seen_sequence, $2),
                 last_active_at = now()
             WHERE agent_id = $1",
        )
        .bind(agent_id)
        .bind(sequence)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn touch(&self, agent_id: &str) -> Result<()> {
        sqlx::query("UPDATE agent_registration SET last_active_at = now() WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn expire_idle(&self, max_idle_days: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM agent_registration
             WHERE last_active_at < now() - ($1 * INTERVAL '1 day')",
        )
        .bind(max_idle_days)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
