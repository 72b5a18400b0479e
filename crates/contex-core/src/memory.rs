//! In-memory backend implementations for testing and embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity over all stored vectors;
//! keyword search is term-overlap counting. Semantics match the PostgreSQL
//! adapters, so the engine behaves identically against either.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;
use crate::traits::*;

// =============================================================================
// EVENT LOG
// =============================================================================

/// In-memory append-only event log with per-project sequencing.
pub struct MemoryEventLog {
    events: RwLock<HashMap<String, Vec<Event>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(
        &self,
        project_id: &str,
        event_type: EventType,
        data: JsonValue,
    ) -> Result<i64> {
        let mut events = self.events.write().unwrap();
        let log = events.entry(project_id.to_string()).or_default();
        let sequence = log.last().map(|e| e.sequence).unwrap_or(0) + 1;
        log.push(Event {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            tenant_id: None,
            event_type,
            data,
            sequence,
            created_at: Utc::now(),
        });
        Ok(sequence)
    }

    async fn read(&self, project_id: &str, since: i64, limit: i64) -> Result<Vec<Event>> {
        let events = self.events.read().unwrap();
        let limit = limit.clamp(0, crate::defaults::EVENT_READ_MAX_LIMIT) as usize;
        Ok(events
            .get(project_id)
            .map(|log| {
                log.iter()
                    .filter(|e| e.sequence > since)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn length(&self, project_id: &str) -> Result<i64> {
        let events = self.events.read().unwrap();
        Ok(events
            .get(project_id)
            .and_then(|log| log.last())
            .map(|e| e.sequence)
            .unwrap_or(0))
    }

    async fn trim(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut events = self.events.write().unwrap();
        let mut removed = 0u64;
        for log in events.values_mut() {
            let before = log.len();
            log.retain(|e| e.created_at >= cutoff);
            removed += (before - log.len()) as u64;
        }
        Ok(removed)
    }
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// In-memory vector index with brute-force cosine search.
pub struct MemoryVectorIndex {
    nodes: RwLock<HashMap<(String, String), ContextNode>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, node: &ContextNode) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap();
        nodes.insert(
            (node.project_id.clone(), node.node_key.clone()),
            node.clone(),
        );
        Ok(())
    }

    async fn delete(&self, project_id: &str, node_key: &str) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap();
        nodes.remove(&(project_id.to_string(), node_key.to_string()));
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
        let nodes = self.nodes.read().unwrap();
        let mut hits: Vec<SearchHit> = nodes
            .values()
            .filter(|n| n.project_id == project_id)
            .filter_map(|n| {
                let score = cosine_similarity(query_embedding, &n.embedding);
                if score >= threshold {
                    Some(SearchHit {
                        node_key: n.node_key.clone(),
                        data_key: n.data_key.clone(),
                        description: n.description.clone(),
                        data: n.data.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_key.cmp(&b.node_key))
        });
        hits.truncate(top_k as usize);
        Ok(hits)
    }

    async fn get(&self, project_id: &str, node_key: &str) -> Result<Option<ContextNode>> {
        let nodes = self.nodes.read().unwrap();
        Ok(nodes
            .get(&(project_id.to_string(), node_key.to_string()))
            .cloned())
    }

    async fn list(&self, project_id: &str) -> Result<Vec<ContextNode>> {
        let nodes = self.nodes.read().unwrap();
        let mut all: Vec<ContextNode> = nodes
            .values()
            .filter(|n| n.project_id == project_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.node_key.cmp(&b.node_key));
        Ok(all)
    }
}

// =============================================================================
// KEYWORD INDEX
// =============================================================================

/// In-memory keyword index scoring by query-term overlap.
pub struct MemoryKeywordIndex {
    index: std::sync::Arc<MemoryVectorIndex>,
}

impl MemoryKeywordIndex {
    /// Shares node storage with a [`MemoryVectorIndex`].
    pub fn new(index: std::sync::Arc<MemoryVectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl KeywordIndex for MemoryKeywordIndex {
    async fn search(&self, project_id: &str, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() || limit <= 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .index
            .list(project_id)
            .await?
            .into_iter()
            .filter_map(|n| {
                let haystack =
                    format!("{} {}", n.description, n.data).to_lowercase();
                let matches = terms.iter().filter(|t| haystack.contains(**t)).count();
                if matches > 0 {
                    Some(SearchHit {
                        node_key: n.node_key,
                        data_key: n.data_key,
                        description: n.description,
                        data: n.data,
                        score: matches as f32 / terms.len() as f32,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_key.cmp(&b.node_key))
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }
}

// =============================================================================
// REGISTRATION REPOSITORY
// =============================================================================

/// In-memory subscription registry.
pub struct MemoryRegistrationRepository {
    registrations: RwLock<HashMap<String, AgentRegistration>>,
}

impl MemoryRegistrationRepository {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRegistrationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistrationRepository for MemoryRegistrationRepository {
    async fn upsert(&self, registration: &AgentRegistration) -> Result<()> {
        let mut registrations = self.registrations.write().unwrap();
        registrations.insert(registration.agent_id.clone(), registration.clone());
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> Result<bool> {
        let mut registrations = self.registrations.write().unwrap();
        Ok(registrations.remove(agent_id).is_some())
    }

    async fn get(&self, agent_id: &str) -> Result<Option<AgentRegistration>> {
        let registrations = self.registrations.read().unwrap();
        Ok(registrations.get(agent_id).cloned())
    }

    async fn list(&self, project_id: Option<&str>) -> Result<Vec<AgentRegistration>> {
        let registrations = self.registrations.read().unwrap();
        let mut all: Vec<AgentRegistration> = registrations
            .values()
            .filter(|r| project_id.map(|p| r.project_id == p).unwrap_or(true))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(all)
    }

    async fn advance_sequence(&self, agent_id: &str, sequence: i64) -> Result<()> {
        let mut registrations = self.registrations.write().unwrap();
        if let Some(reg) = registrations.get_mut(agent_id) {
            reg.last_seen_sequence = reg.last_seen_sequence.max(sequence);
            reg.last_active_at = Utc::now();
        }
        Ok(())
    }

    async fn touch(&self, agent_id: &str) -> Result<()> {
        let mut registrations = self.registrations.write().unwrap();
        if let Some(reg) = registrations.get_mut(agent_id) {
            reg.last_active_at = Utc::now();
        }
        Ok(())
    }

    async fn expire_idle(&self, max_idle_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(max_idle_days);
        let mut registrations = self.registrations.write().unwrap();
        let before = registrations.len();
        registrations.retain(|_, r| r.last_active_at >= cutoff);
        Ok((before - registrations.len()) as u64)
    }
}

// =============================================================================
// PUB/SUB
// =============================================================================

/// In-memory pub/sub broker backed by per-channel broadcast channels.
pub struct MemoryPubSub {
    channels: RwLock<HashMap<String, tokio::sync::broadcast::Sender<String>>>,
    published: AtomicUsize,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            published: AtomicUsize::new(0),
        }
    }

    /// Subscribe to a channel, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> tokio::sync::broadcast::Receiver<String> {
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| tokio::sync::broadcast::channel(256).0)
            .subscribe()
    }

    /// Total messages published across all channels.
    pub fn published_count(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubPublisher for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.published.fetch_add(1, Ordering::Relaxed);
        let channels = self.channels.read().unwrap();
        match channels.get(channel) {
            // Send errors mean no live subscribers; best-effort tolerates that.
            Some(tx) => Ok(tx.send(payload.to_string()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// A backend that always fails, for degradation testing.
pub struct FailingEventLog;

#[async_trait]
impl EventLog for FailingEventLog {
    async fn append(&self, _: &str, _: EventType, _: JsonValue) -> Result<i64> {
        Err(Error::TransientBackend("event log unavailable".to_string()))
    }

    async fn read(&self, _: &str, _: i64, _: i64) -> Result<Vec<Event>> {
        Err(Error::TransientBackend("event log unavailable".to_string()))
    }

    async fn length(&self, _: &str) -> Result<i64> {
        Err(Error::TransientBackend("event log unavailable".to_string()))
    }

    async fn trim(&self, _: i64) -> Result<u64> {
        Err(Error::TransientBackend("event log unavailable".to_string()))
    }
}
