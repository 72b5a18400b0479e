//! # contex-engine
//!
//! The Contex façade: sequences publish → log → index → dispatch and
//! register → snapshot → subscribe, watches dependency health, and runs
//! background maintenance (event retention, idle-agent expiry, outbox
//! draining).

pub mod degradation;
pub mod engine;
pub mod export;
pub mod maintenance;

pub use degradation::{Component, DegradationController};
pub use engine::{ContextEngine, EngineDeps, PublishReceipt, PublishRequest};
pub use export::ProjectExport;
pub use maintenance::{spawn_health_loop, spawn_maintenance_loop};

/// Initialize tracing with an env-filter subscriber. Call once at startup.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}
