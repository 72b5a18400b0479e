//! Fan-out dispatcher: routes published nodes to interested agents.
//!
//! Interest is decided by direct cosine between the cached embeddings of the
//! agent's needs and the node's description. Each agent has a bounded,
//! sequence-ordered queue consumed by a single worker task, so deliveries to
//! one agent are serialized and strictly ascending; across agents deliveries
//! are unordered.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use contex_core::{
    cosine_similarity, AgentRegistration, DataUpdate, DeliveryMode, PubSubPublisher,
    RegistrationRepository, Result,
};
use contex_inference::CachedEmbedder;

use crate::queue::DeliveryQueue;
use crate::webhook::WebhookSender;

/// One node from a publish, as seen by the dispatcher.
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    pub data_key: String,
    pub node_key: String,
    pub description: String,
    pub data: JsonValue,
    /// False when a republish left the stored embedding byte-identical; such
    /// nodes produce no deliveries.
    pub embedding_changed: bool,
}

/// Internal notification handed from the engine to the dispatcher after a
/// publish commits.
#[derive(Debug, Clone)]
pub struct PublishNotification {
    pub project_id: String,
    pub sequence: i64,
    pub nodes: Vec<NodeUpdate>,
}

struct AgentWorker {
    queue: Arc<DeliveryQueue>,
    handle: JoinHandle<()>,
}

/// Routes publish notifications to registered agents.
pub struct Dispatcher {
    registrations: Arc<dyn RegistrationRepository>,
    embedder: Arc<CachedEmbedder>,
    webhook: Arc<WebhookSender>,
    pubsub: Arc<dyn PubSubPublisher>,
    threshold: f32,
    queue_capacity: usize,
    workers: DashMap<String, AgentWorker>,
}

impl Dispatcher {
    pub fn new(
        registrations: Arc<dyn RegistrationRepository>,
        embedder: Arc<CachedEmbedder>,
        webhook: Arc<WebhookSender>,
        pubsub: Arc<dyn PubSubPublisher>,
        threshold: f32,
        queue_capacity: usize,
    ) -> Self {
        Self {
            registrations,
            embedder,
            webhook,
            pubsub,
            threshold,
            queue_capacity,
            workers: DashMap::new(),
        }
    }

    /// Fan a publish notification out to every interested registration.
    ///
    /// Embeddings for needs and descriptions come from the shared cache, so
    /// steady-state interest checks cost no model calls. Delivery itself is
    /// asynchronous; this returns once updates are enqueued.
    pub async fn dispatch(&self, notification: &PublishNotification) -> Result<()> {
        let registrations = self
            .registrations
            .list(Some(&notification.project_id))
            .await?;
        if registrations.is_empty() {
            trace!(
                subsystem = "dispatch",
                op = "fanout",
                project_id = %notification.project_id,
                "No registrations for project"
            );
            return Ok(());
        }

        let mut enqueued = 0usize;
        for node in &notification.nodes {
            if !node.embedding_changed {
                debug!(
                    subsystem = "dispatch",
                    op = "fanout",
                    node_key = %node.node_key,
                    "Embedding unchanged, skipping deliveries"
                );
                continue;
            }
            let node_embedding = self.embedder.embed(&node.description).await?;

            for registration in &registrations {
                let Some(matched_need) = self
                    .first_matching_need(registration, &node_embedding)
                    .await?
                else {
                    continue;
                };

                let update = DataUpdate::new(
                    notification.project_id.clone(),
                    registration.agent_id.clone(),
                    notification.sequence,
                    node.data_key.clone(),
                    node.node_key.clone(),
                    node.data.clone(),
                    matched_need,
                );
                self.enqueue(registration, update);
                enqueued += 1;
            }
        }

        debug!(
            subsystem = "dispatch",
            op = "fanout",
            project_id = %notification.project_id,
            sequence = notification.sequence,
            result_count = enqueued,
            "Fan-out complete"
        );
        Ok(())
    }

    /// The first of the agent's needs scoring at or above the threshold, if
    /// any. Needs are checked in registration order, so the reported
    /// `matched_need` is deterministic.
    async fn first_matching_need(
        &self,
        registration: &AgentRegistration,
        node_embedding: &[f32],
    ) -> Result<Option<String>> {
        for need in &registration.needs {
            let need_embedding = self.embedder.embed(need).await?;
            let similarity = cosine_similarity(&need_embedding, node_embedding);
            if similarity >= self.threshold {
                return Ok(Some(need.clone()));
            }
        }
        Ok(None)
    }

    fn enqueue(&self, registration: &AgentRegistration, update: DataUpdate) {
        let queue = self
            .workers
            .entry(registration.agent_id.clone())
            .or_insert_with(|| self.spawn_worker(registration))
            .queue
            .clone();
        if !queue.push(update) {
            warn!(
                subsystem = "dispatch",
                component = "queue",
                agent_id = %registration.agent_id,
                "Delivery queue overflow, oldest update dropped"
            );
        }
    }

    fn spawn_worker(&self, registration: &AgentRegistration) -> AgentWorker {
        let queue = Arc::new(DeliveryQueue::new(self.queue_capacity));
        let agent_id = registration.agent_id.clone();
        let delivery = registration.delivery.clone();
        let mut last_delivered = registration.last_seen_sequence;
        let registrations = self.registrations.clone();
        let webhook = self.webhook.clone();
        let pubsub = self.pubsub.clone();

        let worker_queue = queue.clone();
        let handle = tokio::spawn(async move {
            while let Some(update) = worker_queue.recv().await {
                // Enforce strictly ascending sequences per agent.
                if update.sequence <= last_delivered {
                    continue;
                }
                let sequence = update.sequence;
                let delivered =
                    Self::deliver(&webhook, &pubsub, &delivery, "data_update", &update).await;
                if delivered {
                    last_delivered = sequence;
                    if let Err(e) = registrations.advance_sequence(&agent_id, sequence).await {
                        warn!(
                            subsystem = "dispatch",
                            agent_id = %agent_id,
                            error = %e,
                            "Failed to advance last_seen_sequence"
                        );
                    }
                }
            }
            trace!(subsystem = "dispatch", agent_id = %agent_id, "Delivery worker stopped");
        });

        AgentWorker { queue, handle }
    }

    async fn deliver(
        webhook: &WebhookSender,
        pubsub: &Arc<dyn PubSubPublisher>,
        delivery: &DeliveryMode,
        event_type: &str,
        update: &DataUpdate,
    ) -> bool {
        let body = match serde_json::to_string(update) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    subsystem = "dispatch",
                    error = %e,
                    "Failed to serialize update, dropping"
                );
                return false;
            }
        };
        match delivery {
            DeliveryMode::PubSub { channel } => pubsub.publish(channel, &body).await.is_ok(),
            DeliveryMode::Webhook { url, hmac_secret } => webhook
                .send(url, event_type, &body, hmac_secret.as_deref())
                .await
                .is_delivered(),
        }
    }

    /// Deliver a payload to an agent immediately, outside the queue. Used for
    /// the initial snapshot and registration catch-up, before live updates
    /// begin flowing.
    pub async fn deliver_now(
        &self,
        registration: &AgentRegistration,
        event_type: &str,
        body: &str,
    ) -> bool {
        match &registration.delivery {
            DeliveryMode::PubSub { channel } => {
                self.pubsub.publish(channel, body).await.is_ok()
            }
            DeliveryMode::Webhook { url, hmac_secret } => self
                .webhook
                .send(url, event_type, body, hmac_secret.as_deref())
                .await
                .is_delivered(),
        }
    }

    /// Install (or replace) the delivery worker for a registration.
    ///
    /// Re-registration swaps delivery configuration, so any existing worker
    /// is retired; its queued updates drain to the old destination.
    pub fn register_agent(&self, registration: &AgentRegistration) {
        let worker = self.spawn_worker(registration);
        if let Some(previous) = self
            .workers
            .insert(registration.agent_id.clone(), worker)
        {
            previous.queue.close();
        }
        info!(
            subsystem = "dispatch",
            agent_id = %registration.agent_id,
            destination = registration.delivery.target(),
            "Delivery worker installed"
        );
    }

    /// Remove an agent's worker, dropping its pending updates.
    pub fn remove_agent(&self, agent_id: &str) {
        if let Some((_, worker)) = self.workers.remove(agent_id) {
            worker.queue.close();
            worker.handle.abort();
        }
    }

    /// Pending queued updates for an agent (0 if no worker).
    pub fn pending(&self, agent_id: &str) -> usize {
        self.workers
            .get(agent_id)
            .map(|w| w.queue.len())
            .unwrap_or(0)
    }

    /// Close all queues and wait for workers to drain in-flight deliveries,
    /// up to `grace` per worker.
    pub async fn shutdown(&self, grace: Duration) {
        let agent_ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        for agent_id in agent_ids {
            if let Some((_, worker)) = self.workers.remove(&agent_id) {
                worker.queue.close();
                let mut handle = worker.handle;
                if tokio::time::timeout(grace, &mut handle).await.is_err() {
                    warn!(
                        subsystem = "dispatch",
                        agent_id = %agent_id,
                        "Worker did not drain within grace period"
                    );
                    handle.abort();
                }
            }
        }
    }
}
