//! Degradation controller: hysteretic dependency health tracking and the
//! process-wide service mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

use contex_core::defaults::{HEALTH_FAILURE_THRESHOLD, HEALTH_SUCCESS_THRESHOLD};
use contex_core::DegradationMode;

/// Dependencies observed by health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    EventLog,
    VectorIndex,
    Broker,
    Embedder,
}

#[derive(Debug)]
struct ComponentHealth {
    healthy: bool,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl Default for ComponentHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}

/// Tracks per-component health with hysteresis and derives the service mode.
///
/// A component is marked unhealthy after `HEALTH_FAILURE_THRESHOLD`
/// consecutive probe failures and healthy again after
/// `HEALTH_SUCCESS_THRESHOLD` consecutive successes, so single blips do not
/// flap the mode. Mode derivation: event log unhealthy → `Unavailable`;
/// index, broker, or embedder unhealthy → `Degraded`; otherwise `Normal`.
pub struct DegradationController {
    components: Mutex<HashMap<Component, ComponentHealth>>,
    mode: AtomicU8,
}

const MODE_NORMAL: u8 = 0;
const MODE_DEGRADED: u8 = 1;
const MODE_UNAVAILABLE: u8 = 2;

impl DegradationController {
    pub fn new() -> Self {
        Self {
            components: Mutex::new(HashMap::new()),
            mode: AtomicU8::new(MODE_NORMAL),
        }
    }

    /// Record a successful probe. Returns the (possibly changed) mode.
    pub fn record_success(&self, component: Component) -> DegradationMode {
        let mut components = self.components.lock().unwrap();
        let health = components.entry(component).or_default();
        health.consecutive_failures = 0;
        health.consecutive_successes += 1;
        if !health.healthy && health.consecutive_successes >= HEALTH_SUCCESS_THRESHOLD {
            health.healthy = true;
            info!(
                subsystem = "engine",
                component = ?component,
                "Component recovered"
            );
        }
        self.recompute(&components)
    }

    /// Record a failed probe. Returns the (possibly changed) mode.
    pub fn record_failure(&self, component: Component) -> DegradationMode {
        let mut components = self.components.lock().unwrap();
        let health = components.entry(component).or_default();
        health.consecutive_successes = 0;
        health.consecutive_failures += 1;
        if health.healthy && health.consecutive_failures >= HEALTH_FAILURE_THRESHOLD {
            health.healthy = false;
            warn!(
                subsystem = "engine",
                component = ?component,
                consecutive_failures = health.consecutive_failures,
                "Component marked unhealthy"
            );
        }
        self.recompute(&components)
    }

    fn recompute(&self, components: &HashMap<Component, ComponentHealth>) -> DegradationMode {
        let unhealthy = |c: Component| components.get(&c).map(|h| !h.healthy).unwrap_or(false);

        let mode = if unhealthy(Component::EventLog) {
            DegradationMode::Unavailable
        } else if unhealthy(Component::VectorIndex)
            || unhealthy(Component::Broker)
            || unhealthy(Component::Embedder)
        {
            DegradationMode::Degraded
        } else {
            DegradationMode::Normal
        };

        let raw = match mode {
            DegradationMode::Normal => MODE_NORMAL,
            DegradationMode::Degraded => MODE_DEGRADED,
            DegradationMode::Unavailable => MODE_UNAVAILABLE,
        };
        let previous = self.mode.swap(raw, Ordering::SeqCst);
        if previous != raw {
            warn!(
                subsystem = "engine",
                component = "degradation",
                from = previous,
                to = raw,
                "Degradation mode changed"
            );
        }
        mode
    }

    /// Current process-wide mode.
    pub fn mode(&self) -> DegradationMode {
        match self.mode.load(Ordering::SeqCst) {
            MODE_UNAVAILABLE => DegradationMode::Unavailable,
            MODE_DEGRADED => DegradationMode::Degraded,
            _ => DegradationMode::Normal,
        }
    }
}

impl Default for DegradationController {
    fn default() -> Self {
        Self::new()
    }
}
