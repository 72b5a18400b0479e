//! Background loops: health probing and periodic maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use contex_core::defaults::HEALTH_PROBE_INTERVAL_SECS;

use crate::engine::ContextEngine;

/// Spawn the health probe loop. Probes every dependency on an interval,
/// feeding the degradation controller; outbox draining happens on recovery.
pub fn spawn_health_loop(engine: Arc<ContextEngine>) -> JoinHandle<()> {
    spawn_health_loop_with_interval(engine, Duration::from_secs(HEALTH_PROBE_INTERVAL_SECS))
}

pub fn spawn_health_loop_with_interval(
    engine: Arc<ContextEngine>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            engine.probe_once().await;
        }
    })
}

/// Spawn the maintenance loop: event retention trimming and idle-agent
/// expiry, once per `interval`.
pub fn spawn_maintenance_loop(engine: Arc<ContextEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.run_maintenance().await {
                warn!(subsystem = "engine", error = %e, "Maintenance pass failed");
            }
        }
    })
}
