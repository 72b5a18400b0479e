//! Per-destination circuit breakers for webhook delivery.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use contex_core::defaults::{CIRCUIT_COOLDOWN_SECS, CIRCUIT_FAILURE_THRESHOLD};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Deliveries flow.
    Closed,
    /// Deliveries short-circuited to failure.
    Open,
    /// One probe permitted.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures before CLOSED transitions to OPEN.
    pub failure_threshold: u32,
    /// Time OPEN before permitting a half-open probe.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: CIRCUIT_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(CIRCUIT_COOLDOWN_SECS),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while a half-open probe is in flight so exactly one is issued.
    probe_in_flight: bool,
    last_touched: Instant,
}

/// Circuit breaker for one delivery destination.
///
/// Transitions: CLOSED → OPEN after `failure_threshold` consecutive
/// failures; OPEN → HALF_OPEN after `cooldown`; HALF_OPEN → CLOSED on a
/// single success, HALF_OPEN → OPEN on failure.
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                last_touched: Instant::now(),
            }),
        }
    }

    /// Whether a delivery may proceed right now.
    ///
    /// In OPEN, flips to HALF_OPEN once the cooldown has elapsed and admits
    /// exactly one probe; concurrent callers are refused until the probe
    /// resolves.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.last_touched = Instant::now();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(
                        subsystem = "dispatch",
                        component = "circuit",
                        destination = %self.name,
                        "Circuit half-open, probing"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful delivery.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            info!(
                subsystem = "dispatch",
                component = "circuit",
                destination = %self.name,
                "Circuit closed (recovered)"
            );
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
    }

    /// Record a failed delivery.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;
        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                subsystem = "dispatch",
                component = "circuit",
                destination = %self.name,
                consecutive_failures = inner.consecutive_failures,
                "Circuit opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    fn idle_for(&self) -> Duration {
        self.inner.lock().unwrap().last_touched.elapsed()
    }
}

/// Concurrent registry of circuit breakers keyed by destination URL.
pub struct CircuitRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitConfig,
}

impl CircuitRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or create the breaker for a destination.
    pub fn get(&self, url: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(url.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(url.to_string(), self.config.clone()))
            })
            .clone()
    }

    /// Evict breakers untouched for longer than `max_idle`. Returns the
    /// number removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.breakers.len();
        self.breakers.retain(|_, b| b.idle_for() < max_idle);
        before - self.breakers.len()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
