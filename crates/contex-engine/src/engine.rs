//! The Context Engine façade.
//!
//! Sequences the write path (publish → normalize → embed → log → index →
//! dispatch) and the subscription path (register → snapshot → subscribe →
//! catch-up), applying the degradation policy at each entry point.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, instrument, warn};

use contex_core::defaults::{
    DELIVERY_DRAIN_SECS, DESCRIPTION_TOKENS, EVENT_READ_LIMIT, EVENT_READ_MAX_LIMIT,
    REQUEST_DEADLINE_SECS,
};
use contex_core::{
    decompose, describe, normalize, AgentRegistration, ContexConfig, ContextNode, DataFormat,
    DegradationMode, DeliveryMode, EmbeddingBackend, Error, Event, EventLog, EventType,
    InitialContext, KeywordIndex, NeedMatches, PubSubPublisher, RegisterRequest,
    RegisterResponse, RegistrationRepository, Result, VectorIndex,
};
use contex_dispatch::{
    CircuitConfig, CircuitRegistry, DeferredPublish, Dispatcher, NodeUpdate, Outbox,
    PublishNotification, RetryPolicy, WebhookSender,
};
use contex_inference::{CachedEmbedder, HttpEmbeddingBackend};
use contex_search::SemanticMatcher;

use crate::degradation::{Component, DegradationController};
use crate::export::{self, ProjectExport};

/// External collaborators the engine is wired to.
pub struct EngineDeps {
    pub log: Arc<dyn EventLog>,
    pub index: Arc<dyn VectorIndex>,
    pub keyword: Option<Arc<dyn KeywordIndex>>,
    pub registrations: Arc<dyn RegistrationRepository>,
    pub embedding: Arc<dyn EmbeddingBackend>,
    pub pubsub: Arc<dyn PubSubPublisher>,
}

/// Request to publish a record under a project namespace.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub project_id: String,
    pub data_key: String,
    pub data: JsonValue,
    /// Embedding text; auto-generated from the payload when absent.
    pub description: Option<String>,
    /// Ingress format of `data` (`json|yaml|toml|xml|csv|text`), default json.
    pub data_format: Option<String>,
}

/// What a publisher learns: the event was durably appended, and into which
/// node keys the payload decomposed. Delivery outcome is never part of it.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub sequence: i64,
    pub node_keys: Vec<String>,
}

/// The routing-engine façade.
pub struct ContextEngine {
    config: ContexConfig,
    log: Arc<dyn EventLog>,
    index: Arc<dyn VectorIndex>,
    registrations: Arc<dyn RegistrationRepository>,
    embedder: Arc<CachedEmbedder>,
    matcher: SemanticMatcher,
    dispatcher: Arc<Dispatcher>,
    pubsub: Arc<dyn PubSubPublisher>,
    degradation: Arc<DegradationController>,
    outbox: Outbox,
}

impl ContextEngine {
    /// Wire an engine from explicit collaborators.
    pub fn new(config: ContexConfig, deps: EngineDeps) -> Result<Self> {
        Self::with_retry_policy(
            config.clone(),
            deps,
            RetryPolicy::default().with_max_attempts(config.delivery.webhook_max_attempts),
        )
    }

    /// Wire an engine with a custom webhook retry policy (tests use a fast
    /// schedule).
    pub fn with_retry_policy(
        config: ContexConfig,
        deps: EngineDeps,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        for warning in config.validate() {
            warn!(subsystem = "engine", warning, "Configuration warning");
        }

        let embedder = Arc::new(CachedEmbedder::new(
            deps.embedding,
            config.embedding.cache_size,
        ));
        let matcher = SemanticMatcher::new(
            embedder.clone(),
            deps.index.clone(),
            deps.keyword,
            config.matching.clone(),
        );
        let circuits = Arc::new(CircuitRegistry::new(CircuitConfig {
            failure_threshold: config.delivery.circuit_failure_threshold,
            cooldown: Duration::from_secs(config.delivery.circuit_cooldown_secs),
        }));
        let webhook = Arc::new(WebhookSender::new(retry_policy, circuits)?);
        let dispatcher = Arc::new(Dispatcher::new(
            deps.registrations.clone(),
            embedder.clone(),
            webhook,
            deps.pubsub.clone(),
            config.matching.similarity_threshold,
            config.delivery.queue_capacity,
        ));

        info!(
            subsystem = "engine",
            op = "init",
            model = embedder.model_name(),
            threshold = config.matching.similarity_threshold,
            max_matches = config.matching.max_matches,
            "Context engine initialized"
        );

        Ok(Self {
            config,
            log: deps.log,
            index: deps.index,
            registrations: deps.registrations,
            embedder,
            matcher,
            dispatcher,
            pubsub: deps.pubsub,
            degradation: Arc::new(DegradationController::new()),
            outbox: Outbox::default(),
        })
    }

    /// Connect the production stack: PostgreSQL (event log, vector index,
    /// keyword index, registry), Redis pub/sub, and the HTTP embedding
    /// backend.
    pub async fn connect(config: ContexConfig) -> Result<Self> {
        let pool = contex_db::create_pool(&config.database_url).await?;
        contex_db::run_migrations(&pool).await?;

        let keyword: Option<Arc<dyn KeywordIndex>> = if config.matching.hybrid_search_enabled {
            Some(Arc::new(contex_db::PgKeywordIndex::new(pool.clone())))
        } else {
            None
        };
        let embedding: Arc<dyn EmbeddingBackend> =
            Arc::new(HttpEmbeddingBackend::from_config(&config.embedding)?);
        let pubsub: Arc<dyn PubSubPublisher> = Arc::new(
            contex_dispatch::RedisPubSub::connect(&config.redis_url).await?,
        );

        let deps = EngineDeps {
            log: Arc::new(contex_db::PgEventLog::new(pool.clone())),
            index: Arc::new(contex_db::PgVectorIndex::new(pool.clone())),
            keyword,
            registrations: Arc::new(contex_db::PgRegistrationRepository::new(pool)),
            embedding,
            pubsub,
        };
        let engine = Self::new(config, deps)?;

        // The embedding model is probed once at startup; a dead model is a
        // configuration problem, not a transient.
        if !engine.embedder.health_check().await.unwrap_or(false) {
            warn!(
                subsystem = "engine",
                component = "embedder",
                "Embedding backend not responding at startup"
            );
        }
        Ok(engine)
    }

    pub fn config(&self) -> &ContexConfig {
        &self.config
    }

    pub fn mode(&self) -> DegradationMode {
        self.degradation.mode()
    }

    pub fn degradation(&self) -> &Arc<DegradationController> {
        &self.degradation
    }

    async fn with_deadline<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(Duration::from_secs(REQUEST_DEADLINE_SECS), future).await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled(format!(
                "deadline of {REQUEST_DEADLINE_SECS}s exceeded"
            ))),
        }
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Publish a record: normalize, decompose, embed, append, index, and
    /// hand off to the dispatcher.
    ///
    /// The append is the commit point: a successful return means the event
    /// is durable. Index writes follow the append (the log is the source of
    /// truth; the index is reconciled from it after a crash). While the
    /// service is degraded, index and dispatch work is parked in the outbox
    /// and drained on recovery.
    #[instrument(skip(self, request), fields(subsystem = "engine", op = "publish"))]
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt> {
        self.with_deadline(self.publish_inner(request)).await
    }

    async fn publish_inner(&self, request: PublishRequest) -> Result<PublishReceipt> {
        if self.mode() == DegradationMode::Unavailable {
            return Err(Error::TransientBackend(
                "event log unavailable, rejecting mutations".to_string(),
            ));
        }
        if request.project_id.is_empty() {
            return Err(Error::Validation("project_id must be non-empty".to_string()));
        }
        if request.data_key.is_empty() {
            return Err(Error::Validation("data_key must be non-empty".to_string()));
        }

        let format = match &request.data_format {
            Some(raw) => DataFormat::parse(raw)?,
            None => DataFormat::Json,
        };
        let normalized = normalize(&request.data, format)?;
        let drafts = decompose(&normalized, self.config.node_decompose_depth);

        let degraded = self.mode() == DegradationMode::Degraded;
        let now = Utc::now();
        let mut nodes = Vec::with_capacity(drafts.len());
        let mut updates = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let node_key = draft.node_key(&request.data_key);
            let description = match (&request.description, draft.pointer.is_empty()) {
                (Some(description), true) => description.clone(),
                _ => describe(&node_key, &draft.data, DESCRIPTION_TOKENS),
            };
            let embedding = self.embedder.embed(&description).await?.as_ref().clone();

            // Republishing identical content produces no deliveries; the
            // stored vector decides, so the outcome is deterministic.
            let embedding_changed = if degraded {
                true
            } else {
                match self.index.get(&request.project_id, &node_key).await? {
                    Some(existing) => existing.embedding != embedding,
                    None => true,
                }
            };

            updates.push(NodeUpdate {
                data_key: request.data_key.clone(),
                node_key: node_key.clone(),
                description: description.clone(),
                data: draft.data.clone(),
                embedding_changed,
            });
            nodes.push(ContextNode {
                project_id: request.project_id.clone(),
                data_key: request.data_key.clone(),
                node_key,
                description,
                data: draft.data.clone(),
                data_format: format.as_str().to_string(),
                embedding,
                created_at: now,
                updated_at: now,
            });
        }

        let node_keys: Vec<String> = nodes.iter().map(|n| n.node_key.clone()).collect();
        let event_payload = json!({
            "data_key": request.data_key.clone(),
            "node_key": node_keys[0].clone(),
            "node_keys": node_keys.clone(),
            "description": nodes[0].description.clone(),
            "data": normalized,
        });

        // Commit point. On failure nothing reaches the index or dispatcher.
        let sequence = self
            .log
            .append(&request.project_id, EventType::DataPublished, event_payload)
            .await?;

        let notification = PublishNotification {
            project_id: request.project_id.clone(),
            sequence,
            nodes: updates,
        };

        if degraded {
            self.outbox.push(DeferredPublish {
                nodes,
                notification,
            });
            debug!(
                subsystem = "engine",
                op = "publish",
                project_id = %request.project_id,
                sequence,
                "Degraded: index and dispatch deferred to outbox"
            );
        } else {
            for node in &nodes {
                self.index.upsert(node).await?;
            }
            self.dispatcher.dispatch(&notification).await?;
        }

        info!(
            subsystem = "engine",
            op = "publish",
            project_id = %request.project_id,
            sequence,
            node_count = node_keys.len(),
            "Published"
        );
        Ok(PublishReceipt {
            sequence,
            node_keys,
        })
    }

    /// Delete a published record and all nodes decomposed from it.
    pub async fn delete_data(&self, project_id: &str, data_key: &str) -> Result<i64> {
        if self.mode() == DegradationMode::Unavailable {
            return Err(Error::TransientBackend(
                "event log unavailable, rejecting mutations".to_string(),
            ));
        }
        let nodes = self.index.list(project_id).await?;
        let mut node_keys = Vec::new();
        for node in nodes.iter().filter(|n| n.data_key == data_key) {
            self.index.delete(project_id, &node.node_key).await?;
            node_keys.push(node.node_key.clone());
        }
        if node_keys.is_empty() {
            return Err(Error::NotFound(format!("data key {data_key}")));
        }
        let sequence = self
            .log
            .append(
                project_id,
                EventType::DataDeleted,
                json!({"data_key": data_key, "node_keys": node_keys}),
            )
            .await?;
        Ok(sequence)
    }

    // =========================================================================
    // QUERY
    // =========================================================================

    /// Ad-hoc semantic query; no registration and no mutation.
    pub async fn query(
        &self,
        project_id: &str,
        queries: &[String],
        top_k: Option<i64>,
        threshold: Option<f32>,
        hybrid: Option<bool>,
    ) -> Result<Vec<NeedMatches>> {
        if self.mode() == DegradationMode::Degraded {
            return Err(Error::TransientBackend(
                "semantic search degraded, retry later".to_string(),
            ));
        }
        self.with_deadline(
            self.matcher
                .query(project_id, queries, top_k, threshold, hybrid),
        )
        .await
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register an agent: persist, snapshot, subscribe, catch up.
    #[instrument(skip(self, request), fields(subsystem = "engine", op = "register"))]
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        self.with_deadline(self.register_inner(request)).await
    }

    async fn register_inner(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        if self.mode() != DegradationMode::Normal {
            return Err(Error::TransientBackend(
                "registrations unavailable while degraded, retry later".to_string(),
            ));
        }
        if request.agent_id.is_empty() {
            return Err(Error::Validation("agent_id must be non-empty".to_string()));
        }
        if request.needs.is_empty() || request.needs.iter().any(|n| n.trim().is_empty()) {
            return Err(Error::Validation(
                "needs must be a non-empty list of non-empty strings".to_string(),
            ));
        }
        if let DeliveryMode::Webhook { url, .. } = &request.delivery {
            if url.is_empty() {
                return Err(Error::Validation(
                    "webhook delivery requires a url".to_string(),
                ));
            }
        }

        let head = self.log.length(&request.project_id).await?;
        let since = request.since.unwrap_or(head).clamp(0, head);

        // Snapshot against current nodes, bounded by the context budget.
        let matches = self
            .matcher
            .match_needs(&request.project_id, &request.needs)
            .await?;
        let matches = truncate_matches(matches, self.config.matching.max_context_size);
        let matched_needs_count: usize = matches.iter().map(|m| m.matches.len()).sum();

        let delivery = match request.delivery {
            DeliveryMode::PubSub { channel } if channel.is_empty() => DeliveryMode::PubSub {
                channel: DeliveryMode::default_channel(&request.agent_id),
            },
            other => other,
        };
        let now = Utc::now();
        let registration = AgentRegistration {
            agent_id: request.agent_id.clone(),
            project_id: request.project_id.clone(),
            needs: request.needs.clone(),
            delivery,
            last_seen_sequence: since,
            created_at: now,
            last_active_at: now,
        };

        // Registrations are not written to the project event log: publish
        // sequences stay aligned with data updates, and agents reconcile
        // registry state through the registry itself.
        self.registrations.upsert(&registration).await?;
        self.dispatcher.register_agent(&registration);

        // Initial snapshot, then missed-event catch-up for channel listeners.
        let initial = InitialContext::new(
            request.project_id.clone(),
            request.agent_id.clone(),
            head,
            matches,
        );
        let body = serde_json::to_string(&initial)?;
        if !self
            .dispatcher
            .deliver_now(&registration, "initial_context", &body)
            .await
        {
            warn!(
                subsystem = "engine",
                op = "register",
                agent_id = %request.agent_id,
                "Initial context delivery failed"
            );
        }

        let caught_up_events = if matches!(registration.delivery, DeliveryMode::PubSub { .. }) {
            let missed = self
                .log
                .read(&request.project_id, since, EVENT_READ_MAX_LIMIT)
                .await?;
            for event in &missed {
                let body = serde_json::to_string(event)?;
                self.dispatcher
                    .deliver_now(&registration, "event", &body)
                    .await;
            }
            missed.len()
        } else {
            0
        };

        info!(
            subsystem = "engine",
            op = "register",
            agent_id = %request.agent_id,
            project_id = %request.project_id,
            result_count = matched_needs_count,
            caught_up = caught_up_events,
            "Agent registered"
        );
        Ok(RegisterResponse {
            agent_id: request.agent_id,
            project_id: request.project_id,
            channel: registration.delivery.target().to_string(),
            matched_needs_count,
            caught_up_events,
            last_seen_sequence: since,
        })
    }

    /// Remove an agent registration.
    pub async fn unregister(&self, agent_id: &str) -> Result<()> {
        if self.registrations.get(agent_id).await?.is_none() {
            return Err(Error::NotFound(format!("agent {agent_id}")));
        }
        self.registrations.delete(agent_id).await?;
        self.dispatcher.remove_agent(agent_id);
        Ok(())
    }

    /// Fetch an agent registration.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRegistration>> {
        self.registrations.get(agent_id).await
    }

    /// List registrations, optionally scoped to a project.
    pub async fn list_agents(&self, project_id: Option<&str>) -> Result<Vec<AgentRegistration>> {
        self.registrations.list(project_id).await
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Read the per-project event stream.
    pub async fn events(
        &self,
        project_id: &str,
        since: i64,
        count: Option<i64>,
    ) -> Result<Vec<Event>> {
        self.log
            .read(project_id, since, count.unwrap_or(EVENT_READ_LIMIT))
            .await
    }

    // =========================================================================
    // EXPORT / IMPORT
    // =========================================================================

    /// Export a project's nodes (with embeddings) and event history.
    pub async fn export_project(&self, project_id: &str) -> Result<ProjectExport> {
        export::export_project(self.index.as_ref(), self.log.as_ref(), project_id).await
    }

    /// Import a previously exported project under a (possibly different) id.
    pub async fn import_project(
        &self,
        export: &ProjectExport,
        project_id: &str,
    ) -> Result<usize> {
        export::import_project(self.index.as_ref(), self.log.as_ref(), export, project_id).await
    }

    // =========================================================================
    // HEALTH AND MAINTENANCE
    // =========================================================================

    /// Probe every dependency once and fold the results into the
    /// degradation controller. Drains the outbox after a recovery.
    pub async fn probe_once(&self) {
        let checks: [(Component, bool); 3] = [
            (
                Component::EventLog,
                self.log.length("__contex_health").await.is_ok(),
            ),
            (
                Component::VectorIndex,
                self.index.list("__contex_health").await.is_ok(),
            ),
            (
                Component::Broker,
                self.pubsub.health_check().await.unwrap_or(false),
            ),
        ];
        for (component, healthy) in checks {
            if healthy {
                self.degradation.record_success(component);
            } else {
                self.degradation.record_failure(component);
            }
        }

        if self.mode() == DegradationMode::Normal {
            if let Err(e) = self.drain_outbox().await {
                warn!(subsystem = "engine", error = %e, "Outbox drain failed");
            }
        }
    }

    /// Apply deferred index writes and fan-out parked while degraded.
    pub async fn drain_outbox(&self) -> Result<()> {
        let deferred = self.outbox.drain();
        if deferred.is_empty() {
            return Ok(());
        }
        info!(
            subsystem = "engine",
            component = "outbox",
            result_count = deferred.len(),
            "Draining deferred publishes"
        );
        for entry in deferred {
            for node in &entry.nodes {
                self.index.upsert(node).await?;
            }
            self.dispatcher.dispatch(&entry.notification).await?;
        }
        Ok(())
    }

    /// Deferred publishes currently parked.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// One maintenance pass: event retention trim and idle-agent expiry.
    pub async fn run_maintenance(&self) -> Result<()> {
        let trimmed = self
            .log
            .trim(self.config.retention.event_retention_days)
            .await?;
        let expired = self
            .registrations
            .expire_idle(self.config.retention.agent_idle_expiry_days)
            .await?;
        if trimmed > 0 || expired > 0 {
            info!(
                subsystem = "engine",
                op = "maintenance",
                trimmed_events = trimmed,
                expired_agents = expired,
                "Maintenance pass complete"
            );
        }
        Ok(())
    }

    /// Drain delivery workers, allowing in-flight webhooks to finish.
    pub async fn shutdown(&self) {
        self.dispatcher
            .shutdown(Duration::from_secs(DELIVERY_DRAIN_SECS))
            .await;
    }
}

/// Truncate snapshot matches to the context budget (serialized characters).
///
/// The best match per need is kept first when it fits; the remaining budget
/// is filled with the highest-similarity matches across all needs. Per-need
/// grouping and ordering are preserved.
fn truncate_matches(matches: Vec<NeedMatches>, max_chars: usize) -> Vec<NeedMatches> {
    fn cost(data: &JsonValue) -> usize {
        data.to_string().len()
    }

    let total: usize = matches
        .iter()
        .flat_map(|m| m.matches.iter())
        .map(|m| cost(&m.data))
        .sum();
    if total <= max_chars {
        return matches;
    }

    let mut budget = max_chars as i64;
    let mut kept: Vec<(usize, String)> = Vec::new();

    // Phase 1: the top match per need.
    for need in &matches {
        if let Some(best) = need.matches.first() {
            let c = cost(&best.data) as i64;
            if c <= budget {
                budget -= c;
                kept.push((need.need_index, best.node_key.clone()));
            }
        }
    }

    // Phase 2: remaining matches by similarity, best first.
    let mut rest: Vec<(usize, String, f32, i64)> = Vec::new();
    for need in &matches {
        for m in need.matches.iter().skip(1) {
            rest.push((
                need.need_index,
                m.node_key.clone(),
                m.similarity,
                cost(&m.data) as i64,
            ));
        }
    }
    rest.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    for (need_index, node_key, _, c) in rest {
        if c <= budget {
            budget -= c;
            kept.push((need_index, node_key));
        }
        if budget <= 0 {
            break;
        }
    }

    matches
        .into_iter()
        .map(|mut need| {
            need.matches.retain(|m| {
                kept.iter()
                    .any(|(i, k)| *i == need.need_index && *k == m.node_key)
            });
            need
        })
        .collect()
}
