//! Centralized default constants for the Contex routing engine.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// MATCHING
// =============================================================================

/// Minimum cosine similarity for a match to surface.
pub const SIMILARITY_THRESHOLD: f32 = 0.5;

/// Maximum matches returned per need or query.
pub const MAX_MATCHES: i64 = 10;

/// Truncation budget for snapshot payloads, in characters.
pub const MAX_CONTEXT_SIZE: usize = 51_200;

/// RRF rank constant used when fusing semantic and keyword lists.
pub const RRF_K: f32 = 60.0;

/// Keyword (BM25) weight in hybrid fusion.
pub const BM25_WEIGHT: f32 = 0.7;

/// Semantic (kNN) weight in hybrid fusion.
pub const KNN_WEIGHT: f32 = 0.3;

// =============================================================================
// EMBEDDING
// =============================================================================

/// LRU entries in the embedding cache.
pub const EMBEDDING_CACHE_SIZE: usize = 10_000;

/// Default embedding model name.
pub const EMBEDDING_MODEL: &str = "all-minilm";

/// Default embedding server URL (Ollama-compatible).
pub const EMBEDDING_URL: &str = "http://127.0.0.1:11434";

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// EVENT LOG
// =============================================================================

/// Maximum events returned by a single read.
pub const EVENT_READ_MAX_LIMIT: i64 = 1000;

/// Default page size for event reads.
pub const EVENT_READ_LIMIT: i64 = 100;

/// Days of event history retained when trimming is enabled.
pub const EVENT_RETENTION_DAYS: i64 = 30;

// =============================================================================
// DELIVERY
// =============================================================================

/// Total webhook delivery attempts per update (initial + retries).
pub const WEBHOOK_MAX_ATTEMPTS: u32 = 5;

/// Initial retry backoff in seconds.
pub const WEBHOOK_BACKOFF_BASE_SECS: f64 = 1.0;

/// Backoff cap in seconds.
pub const WEBHOOK_BACKOFF_CAP_SECS: f64 = 60.0;

/// Jitter applied to each backoff delay (fraction of the delay).
pub const WEBHOOK_BACKOFF_JITTER: f64 = 0.2;

/// Webhook HTTP request timeout in seconds.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Grace period for in-flight deliveries on cancellation, in seconds.
pub const DELIVERY_DRAIN_SECS: u64 = 30;

/// Consecutive failures before a destination circuit opens.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Seconds a circuit stays open before permitting a half-open probe.
pub const CIRCUIT_COOLDOWN_SECS: u64 = 60;

/// Bounded per-agent delivery queue capacity.
pub const DELIVERY_QUEUE_CAPACITY: usize = 1000;

/// Bounded outbox capacity for deferred dispatch while degraded.
pub const OUTBOX_CAPACITY: usize = 10_000;

// =============================================================================
// REGISTRY
// =============================================================================

/// Days without dispatch or acknowledgement before a registration expires.
pub const AGENT_IDLE_EXPIRY_DAYS: i64 = 7;

// =============================================================================
// ENGINE
// =============================================================================

/// Default deadline for public operations, in seconds.
pub const REQUEST_DEADLINE_SECS: u64 = 30;

/// Depth above which nested payload containers become their own nodes.
pub const NODE_DECOMPOSE_DEPTH: usize = 2;

/// Tokens of normalized text used for auto-generated descriptions.
pub const DESCRIPTION_TOKENS: usize = 32;

/// Consecutive probe failures before a component is marked unhealthy.
pub const HEALTH_FAILURE_THRESHOLD: u32 = 3;

/// Consecutive probe successes before a component recovers.
pub const HEALTH_SUCCESS_THRESHOLD: u32 = 2;

/// Interval between health probes, in seconds.
pub const HEALTH_PROBE_INTERVAL_SECS: u64 = 10;

// =============================================================================
// DATABASE
// =============================================================================

/// Maximum primary connections in the pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Overflow connections beyond the primary pool.
pub const DB_OVERFLOW_CONNECTIONS: u32 = 20;

/// Seconds to wait for a pooled connection.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;
