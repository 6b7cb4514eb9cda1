//! Per-resource circuit breaker.
//!
//! Tracks failures per resource id. When failures reach the configured
//! threshold the circuit *opens* and the router skips the resource. After
//! the open timeout elapses, the next `is_open` check moves the circuit to
//! *half-open*, where a run of successes closes it again and a single
//! failure re-opens it immediately.
//!
//! No method on [`CircuitBreaker`] panics or returns an error: an unknown
//! id yields a freshly-created CLOSED entry, and lock poisoning is absorbed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Circuit breaker state for a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy. Requests allowed, failures accumulate.
    Closed,
    /// Tripped. Requests blocked until the open timeout expires.
    Open,
    /// Probing recovery. Successes accumulate toward re-closing.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds and windows governing every circuit.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures in CLOSED before the circuit opens.
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN before the circuit closes.
    pub success_threshold: u32,
    /// How long an open circuit blocks before probing recovery.
    pub open_timeout: Duration,
    /// Failures older than this are dropped before counting a new one.
    pub monitoring_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        let failure_threshold = std::env::var("ROUTER_CB_FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let success_threshold = std::env::var("ROUTER_CB_SUCCESS_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);

        let open_timeout = std::env::var("ROUTER_CB_OPEN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        let monitoring_window = std::env::var("ROUTER_CB_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(300));

        Self {
            failure_threshold,
            success_threshold,
            open_timeout,
            monitoring_window,
        }
    }
}

/// Read-only snapshot of a single circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub failure_rate: f64,
}

#[derive(Debug, Clone)]
struct CircuitEntry {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    total_requests: u64,
    failed_requests: u64,
}

impl CircuitEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure: None,
            last_state_change: now,
            total_requests: 0,
            failed_requests: 0,
        }
    }

    /// Move to `state`, zeroing the per-state counters. Request totals are
    /// zeroed on OPEN and CLOSED transitions so each state starts a fresh
    /// window; `last_failure` is preserved for the open-timeout clock.
    fn transition(&mut self, state: CircuitState, now: DateTime<Utc>) {
        self.state = state;
        self.last_state_change = now;
        self.failures = 0;
        self.successes = 0;
        if matches!(state, CircuitState::Open | CircuitState::Closed) {
            self.total_requests = 0;
            self.failed_requests = 0;
        }
    }

    /// Drop stale counts when the previous failure fell out of the window.
    fn clean_old_failures(&mut self, now: DateTime<Utc>, window: Duration) {
        let Some(last) = self.last_failure else { return };
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        if now.signed_duration_since(last) > window {
            self.failures = 0;
            self.successes = 0;
            self.total_requests = 0;
            self.failed_requests = 0;
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    fn metrics(&self) -> CircuitMetrics {
        CircuitMetrics {
            state: self.state,
            failures: self.failures,
            successes: self.successes,
            last_failure: self.last_failure,
            last_state_change: self.last_state_change,
            total_requests: self.total_requests,
            failed_requests: self.failed_requests,
            failure_rate: self.failure_rate(),
        }
    }
}

/// Shared reference to a CircuitBreaker
pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

/// Per-resource circuit breaker map. One entry per resource id, created
/// lazily on first access and kept for the process lifetime.
pub struct CircuitBreaker {
    entries: Mutex<HashMap<String, CircuitEntry>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Create with configuration read from the environment.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Create a shared reference to this breaker.
    pub fn shared(self) -> SharedCircuitBreaker {
        Arc::new(self)
    }

    /// The active configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    // Poisoning only means another caller panicked mid-update; the map is
    // still structurally valid, and no breaker method may panic.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether calls to this resource must be rejected.
    ///
    /// The only side effect is the OPEN → HALF_OPEN transition once the open
    /// timeout has elapsed; that call returns `false`.
    pub fn is_open(&self, id: &str) -> bool {
        let now = Utc::now();
        let mut entries = self.lock();
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| CircuitEntry::new(now));

        if entry.state != CircuitState::Open {
            return false;
        }

        let timeout = chrono::Duration::from_std(self.config.open_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let elapsed = entry
            .last_failure
            .map(|t| now.signed_duration_since(t) >= timeout)
            .unwrap_or(true);

        if elapsed {
            entry.transition(CircuitState::HalfOpen, now);
            info!(resource = id, "circuit half-open, probing recovery");
            false
        } else {
            true
        }
    }

    /// Record a successful call against this resource.
    pub fn record_success(&self, id: &str) {
        let now = Utc::now();
        let mut entries = self.lock();
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| CircuitEntry::new(now));

        entry.total_requests += 1;
        if entry.state == CircuitState::HalfOpen {
            entry.successes += 1;
            if entry.successes >= self.config.success_threshold {
                entry.transition(CircuitState::Closed, now);
                info!(resource = id, "circuit closed after recovery");
            }
        }
    }

    /// Record a failed call against this resource. May trip the circuit.
    pub fn record_failure(&self, id: &str) {
        let now = Utc::now();
        let mut entries = self.lock();
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| CircuitEntry::new(now));

        if entry.state == CircuitState::HalfOpen {
            // One failure while probing recovery re-opens immediately.
            entry.transition(CircuitState::Open, now);
            entry.last_failure = Some(now);
            warn!(resource = id, "circuit re-opened during recovery probe");
            return;
        }

        // A failure landing after the window keeps itself: counts reflect
        // only the current failure, not zero.
        entry.clean_old_failures(now, self.config.monitoring_window);

        entry.failures += 1;
        entry.failed_requests += 1;
        entry.total_requests += 1;
        entry.last_failure = Some(now);

        if entry.state == CircuitState::Closed && entry.failures >= self.config.failure_threshold {
            let failures = entry.failures;
            entry.transition(CircuitState::Open, now);
            warn!(resource = id, failures, "circuit opened");
        } else {
            debug!(resource = id, failures = entry.failures, "failure recorded");
        }
    }

    /// Current state for this resource.
    pub fn state(&self, id: &str) -> CircuitState {
        let now = Utc::now();
        let mut entries = self.lock();
        entries
            .entry(id.to_string())
            .or_insert_with(|| CircuitEntry::new(now))
            .state
    }

    /// Snapshot of counters and state for this resource.
    pub fn metrics(&self, id: &str) -> CircuitMetrics {
        let now = Utc::now();
        let mut entries = self.lock();
        entries
            .entry(id.to_string())
            .or_insert_with(|| CircuitEntry::new(now))
            .metrics()
    }

    /// Snapshot of every known circuit, keyed by resource id.
    pub fn all_states(&self) -> HashMap<String, CircuitMetrics> {
        let entries = self.lock();
        entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.metrics()))
            .collect()
    }

    /// Fraction of failed requests in the current window, in `[0, 1]`.
    /// Zero for unknown ids or ids with no recorded requests.
    pub fn failure_rate(&self, id: &str) -> f64 {
        let entries = self.lock();
        entries.get(id).map(|e| e.failure_rate()).unwrap_or(0.0)
    }

    /// Force CLOSED with zeroed counters. Safe for never-seen ids.
    pub fn reset(&self, id: &str) {
        let now = Utc::now();
        let mut entries = self.lock();
        entries.insert(id.to_string(), CircuitEntry::new(now));
        debug!(resource = id, "circuit reset");
    }

    /// Administrative override: open the circuit regardless of counters.
    pub fn force_open(&self, id: &str) {
        let now = Utc::now();
        let mut entries = self.lock();
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| CircuitEntry::new(now));
        entry.transition(CircuitState::Open, now);
        entry.last_failure = Some(now);
        warn!(resource = id, "circuit forced open");
    }

    /// Administrative override: close the circuit regardless of counters.
    pub fn force_close(&self, id: &str) {
        let now = Utc::now();
        let mut entries = self.lock();
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| CircuitEntry::new(now));
        entry.transition(CircuitState::Closed, now);
        info!(resource = id, "circuit forced closed");
    }

    /// Drop every circuit entry. Intended for test isolation.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_defaults()
    }
}
