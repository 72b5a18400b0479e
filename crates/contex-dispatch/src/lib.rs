//! # contex-dispatch
//!
//! The notification pipeline for the Contex routing engine: fan-out of
//! published nodes to interested agents over per-destination circuit-broken
//! webhooks and best-effort pub/sub channels, with per-agent serialized
//! delivery queues and a deferred-dispatch outbox for degraded operation.

pub mod circuit;
pub mod dispatcher;
pub mod outbox;
pub mod pubsub;
pub mod queue;
pub mod retry;
pub mod webhook;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitRegistry, CircuitState};
pub use dispatcher::{Dispatcher, NodeUpdate, PublishNotification};
pub use outbox::{DeferredPublish, Outbox};
pub use pubsub::RedisPubSub;
pub use queue::DeliveryQueue;
pub use retry::RetryPolicy;
pub use webhook::{sign_payload, verify_signature, DeliveryResult, WebhookSender};
