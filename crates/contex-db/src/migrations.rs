//! Schema bootstrap for the Contex tables.
//!
//! Idempotent: every statement is `IF NOT EXISTS`, so `run_migrations` is
//! safe to call on every startup. Requires the pgvector extension.

use sqlx::PgPool;
use tracing::info;

use contex_core::{Error, Result};

const STATEMENTS: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS vector",
    // Append-only event log; (project_id, sequence) is the ordering key.
    r#"
    CREATE TABLE IF NOT EXISTS event (
        id          UUID PRIMARY KEY,
        project_id  TEXT NOT NULL,
        tenant_id   TEXT,
        event_type  TEXT NOT NULL,
        data        JSONB NOT NULL,
        sequence    BIGINT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (project_id, sequence)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS event_project_seq_idx ON event (project_id, sequence)",
    // Transactional sequence allocation row; appends contend on this.
    r#"
    CREATE TABLE IF NOT EXISTS project_sequence (
        project_id    TEXT PRIMARY KEY,
        last_sequence BIGINT NOT NULL DEFAULT 0
    )
    "#,
    // Materialized projection of current node state.
    r#"
    CREATE TABLE IF NOT EXISTS context_node (
        id          UUID PRIMARY KEY,
        project_id  TEXT NOT NULL,
        data_key    TEXT NOT NULL,
        node_key    TEXT NOT NULL,
        description TEXT NOT NULL,
        data        JSONB NOT NULL,
        data_format TEXT NOT NULL DEFAULT 'json',
        embedding   vector(384) NOT NULL,
        tsv         tsvector GENERATED ALWAYS AS (
                        to_tsvector('english', description || ' ' || (data::text))
                    ) STORED,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (project_id, node_key)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS context_node_project_idx ON context_node (project_id)",
    r#"
    CREATE INDEX IF NOT EXISTS context_node_embedding_idx
        ON context_node USING hnsw (embedding vector_cosine_ops)
    "#,
    "CREATE INDEX IF NOT EXISTS context_node_tsv_idx ON context_node USING gin (tsv)",
    r#"
    CREATE TABLE IF NOT EXISTS agent_registration (
        agent_id           TEXT PRIMARY KEY,
        project_id         TEXT NOT NULL,
        needs              TEXT[] NOT NULL,
        delivery_mode      TEXT NOT NULL,
        delivery_target    TEXT NOT NULL,
        hmac_secret        TEXT,
        last_seen_sequence BIGINT NOT NULL DEFAULT 0,
        created_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_active_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS agent_registration_project_idx ON agent_registration (project_id)",
];

/// Create all Contex tables and indexes if they do not exist.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
    }
    info!(
        subsystem = "db",
        component = "migrations",
        op = "bootstrap",
        "Schema bootstrap complete"
    );
    Ok(())
}
