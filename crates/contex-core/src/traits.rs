//! Core traits for Contex abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// EVENT LOG
// =============================================================================

/// Append-only event log with per-project monotonic sequencing.
///
/// Appends are durable before returning. Under concurrent appends to the same
/// project, sequences are totally ordered without gaps or duplicates.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event, allocating the next sequence for the project.
    async fn append(
        &self,
        project_id: &str,
        event_type: EventType,
        data: JsonValue,
    ) -> Result<i64>;

    /// Read events with `sequence > since`, ascending, capped at `limit`
    /// (at most 1000). Callers paginate by advancing `since` to the last
    /// returned sequence.
    async fn read(&self, project_id: &str, since: i64, limit: i64) -> Result<Vec<Event>>;

    /// Current maximum sequence for the project (0 if no events).
    async fn length(&self, project_id: &str) -> Result<i64>;

    /// Delete events older than `retention_days`, across all projects.
    /// Returns the number removed. Trimming never affects sequences already
    /// allocated.
    async fn trim(&self, retention_days: i64) -> Result<u64>;
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// Embedding-indexed store of context nodes, keyed by `(project_id, node_key)`.
///
/// The event log is the source of truth; this index is a materialized
/// projection of current node state.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Atomic insert-or-replace keyed by `(project_id, node_key)`.
    async fn upsert(&self, node: &ContextNode) -> Result<()>;

    /// Remove a node. Missing keys are not an error.
    async fn delete(&self, project_id: &str, node_key: &str) -> Result<()>;

    /// Cosine-similarity top-K with a threshold filter. Results are ordered
    /// by similarity descending, tie-broken by `node_key` ascending.
    async fn search(
        &self,
        project_id: &str,
        query_embedding: &[f32],
        top_k: i64,
        threshold: f32,
    ) -> Result<Vec<SearchHit>>;

    /// Fetch a single node with its stored embedding.
    async fn get(&self, project_id: &str, node_key: &str) -> Result<Option<ContextNode>>;

    /// All nodes for a project, with embeddings.
    async fn list(&self, project_id: &str) -> Result<Vec<ContextNode>>;
}

// =============================================================================
// KEYWORD INDEX
// =============================================================================

/// BM25-style keyword index over node descriptions and payloads.
///
/// Participates only when hybrid mode is enabled.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    /// Ranked keyword search, best first.
    async fn search(&self, project_id: &str, query: &str, limit: i64) -> Result<Vec<SearchHit>>;
}

// =============================================================================
// SUBSCRIPTION REGISTRY
// =============================================================================

/// Durable store of agent registrations.
#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    /// Insert or atomically replace a registration by `agent_id`.
    async fn upsert(&self, registration: &AgentRegistration) -> Result<()>;

    /// Remove a registration. Returns whether it existed.
    async fn delete(&self, agent_id: &str) -> Result<bool>;

    /// Fetch a registration by id.
    async fn get(&self, agent_id: &str) -> Result<Option<AgentRegistration>>;

    /// List registrations, optionally scoped to a project.
    async fn list(&self, project_id: Option<&str>) -> Result<Vec<AgentRegistration>>;

    /// Advance `last_seen_sequence` (monotonic; stale values are ignored)
    /// and refresh activity.
    async fn advance_sequence(&self, agent_id: &str, sequence: i64) -> Result<()>;

    /// Refresh `last_active_at` without touching the sequence.
    async fn touch(&self, agent_id: &str) -> Result<()>;

    /// Delete registrations idle longer than `max_idle_days`. Returns the
    /// number removed.
    async fn expire_idle(&self, max_idle_days: i64) -> Result<u64>;
}

// =============================================================================
// EMBEDDING BACKEND
// =============================================================================

/// Backend for generating text embeddings.
///
/// `embed` must be deterministic and referentially transparent: the same text
/// always yields the same vector. Failures are fatal for the calling
/// operation; there is no silent degradation.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate an embedding for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Model name being used.
    fn model_name(&self) -> &str;

    /// Check if the backend is available and responding.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// PUB/SUB
// =============================================================================

/// Best-effort pub/sub publisher for agent notification channels.
///
/// A missed delivery (no live subscriber) is tolerated; agents reconcile via
/// `EventLog::read(since)` on reconnect.
#[async_trait]
pub trait PubSubPublisher: Send + Sync {
    /// Publish a JSON-encoded payload on a channel. Returns the number of
    /// receivers the broker reported, when known.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Check broker connectivity.
    async fn health_check(&self) -> Result<bool>;
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero norm or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
