//! Domain models for the Contex routing engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Embedding vector dimension (all-MiniLM-class models).
pub const EMBEDDING_DIM: usize = 384;

/// Event types recorded in the per-project event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DataPublished,
    DataDeleted,
    AgentRegistered,
    AgentUnregistered,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DataPublished => "data_published",
            EventType::DataDeleted => "data_deleted",
            EventType::AgentRegistered => "agent_registered",
            EventType::AgentUnregistered => "agent_unregistered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data_published" => Some(EventType::DataPublished),
            "data_deleted" => Some(EventType::DataDeleted),
            "agent_registered" => Some(EventType::AgentRegistered),
            "agent_unregistered" => Some(EventType::AgentUnregistered),
            _ => None,
        }
    }
}

/// An immutable record in the per-project append-only event log.
///
/// `sequence` is strictly increasing per `project_id`; records are never
/// mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub event_type: EventType,
    pub data: JsonValue,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

/// One addressable, embeddable unit of published data.
///
/// `(project_id, node_key)` is unique; publishing the same key replaces the
/// node atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextNode {
    pub project_id: String,
    pub data_key: String,
    pub node_key: String,
    pub description: String,
    pub data: JsonValue,
    pub data_format: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How updates are delivered to a registered agent.
///
/// Immutable after registration; re-register to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Best-effort publish on a pub/sub channel.
    PubSub { channel: String },
    /// Reliable HTTP POST with optional HMAC signing.
    Webhook {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hmac_secret: Option<String>,
    },
}

impl DeliveryMode {
    /// Default channel name for an agent.
    pub fn default_channel(agent_id: &str) -> String {
        format!("agent:{agent_id}:updates")
    }

    /// Stable string tag for persistence.
    pub fn mode_str(&self) -> &'static str {
        match self {
            DeliveryMode::PubSub { .. } => "pubsub",
            DeliveryMode::Webhook { .. } => "webhook",
        }
    }

    /// The channel or URL updates are sent to.
    pub fn target(&self) -> &str {
        match self {
            DeliveryMode::PubSub { channel } => channel,
            DeliveryMode::Webhook { url, .. } => url,
        }
    }
}

/// A durable agent registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub project_id: String,
    /// Ordered free-text needs, matched by cosine similarity.
    pub needs: Vec<String>,
    pub delivery: DeliveryMode,
    /// Highest event sequence acknowledged or delivered to this agent.
    pub last_seen_sequence: i64,
    pub created_at: DateTime<Utc>,
    /// Last dispatch or acknowledgement; drives idle expiry.
    pub last_active_at: DateTime<Utc>,
}

/// Request to register (or replace) an agent.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub project_id: String,
    pub needs: Vec<String>,
    pub delivery: DeliveryMode,
    /// Starting sequence for live deliveries. Defaults to the current project
    /// length so only strictly newer events are delivered.
    #[serde(default)]
    pub since: Option<i64>,
}

/// Result of registering an agent.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub agent_id: String,
    pub project_id: String,
    pub channel: String,
    pub matched_needs_count: usize,
    pub caught_up_events: usize,
    pub last_seen_sequence: i64,
}

/// A single match surfaced by the semantic matcher.
///
/// Ephemeral; derived per query. `similarity >= threshold` is required to
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub node_key: String,
    pub data_key: String,
    pub description: String,
    pub data: JsonValue,
    pub similarity: f32,
    /// Index of the need (or query) that produced this match.
    pub need_index: usize,
}

/// Matches for one need, preserving per-need grouping.
#[derive(Debug, Clone, Serialize)]
pub struct NeedMatches {
    pub need: String,
    pub need_index: usize,
    pub matches: Vec<Match>,
}

/// A raw hit from the vector index, before fusion and thresholding.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub node_key: String,
    pub data_key: String,
    pub description: String,
    pub data: JsonValue,
    pub score: f32,
}

/// Payload types delivered to agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    InitialContext,
    DataUpdate,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::InitialContext => "initial_context",
            UpdateKind::DataUpdate => "data_update",
        }
    }
}

/// Wire payload for a live `data_update` delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: String,
    pub agent_id: String,
    pub sequence: i64,
    pub data_key: String,
    pub node_key: String,
    pub data: JsonValue,
    pub matched_need: String,
}

impl DataUpdate {
    pub fn new(
        project_id: impl Into<String>,
        agent_id: impl Into<String>,
        sequence: i64,
        data_key: impl Into<String>,
        node_key: impl Into<String>,
        data: JsonValue,
        matched_need: impl Into<String>,
    ) -> Self {
        Self {
            kind: UpdateKind::DataUpdate.as_str().to_string(),
            project_id: project_id.into(),
            agent_id: agent_id.into(),
            sequence,
            data_key: data_key.into(),
            node_key: node_key.into(),
            data,
            matched_need: matched_need.into(),
        }
    }
}

/// Wire payload for the initial snapshot sent at registration.
#[derive(Debug, Clone, Serialize)]
pub struct InitialContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: String,
    pub agent_id: String,
    pub sequence: i64,
    pub context: Vec<NeedMatches>,
}

impl InitialContext {
    pub fn new(
        project_id: impl Into<String>,
        agent_id: impl Into<String>,
        sequence: i64,
        context: Vec<NeedMatches>,
    ) -> Self {
        Self {
            kind: UpdateKind::InitialContext.as_str().to_string(),
            project_id: project_id.into(),
            agent_id: agent_id.into(),
            sequence,
            context,
        }
    }
}

/// Process-wide degradation mode, recomputed on every health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradationMode {
    /// All operations enabled.
    Normal,
    /// Semantic queries and registrations rejected; publishes succeed with
    /// deferred dispatch.
    Degraded,
    /// Event-log backend unhealthy; mutating operations fail fast.
    Unavailable,
}
