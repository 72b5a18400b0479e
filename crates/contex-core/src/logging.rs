//! Structured logging schema and field name constants for Contex.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation tools can query by standardized names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-item iteration, high-volume data (hits, deliveries) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "engine", "log", "index", "matcher", "dispatch", "registry"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "circuit", "webhook", "pubsub", "pool", "outbox"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "publish", "register", "append", "search", "deliver"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Project namespace being operated on.
pub const PROJECT_ID: &str = "project_id";

/// Agent registration id.
pub const AGENT_ID: &str = "agent_id";

/// Node key of a context node.
pub const NODE_KEY: &str = "node_key";

/// Event sequence number.
pub const SEQUENCE: &str = "sequence";

/// Delivery destination (channel name or webhook URL).
pub const DESTINATION: &str = "destination";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search or query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of nodes produced by decomposition.
pub const NODE_COUNT: &str = "node_count";

/// Delivery attempt number.
pub const ATTEMPT: &str = "attempt";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
