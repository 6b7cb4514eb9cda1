//! Adaptive Resource Routing & Resilience Layer
//!
//! Routes inference requests across a pool of model-server backends, keeps
//! unhealthy backends out of the routing set automatically, and manages the
//! lifecycle of asynchronously queued work.
//!
//! # Components
//!
//! - [`breaker::CircuitBreaker`]: per-resource failure-isolation state
//!   machine (CLOSED / OPEN / HALF_OPEN) shared by all request contexts.
//! - [`health::HealthMonitor`]: timer-driven active probing with bounded
//!   parallelism, persisting each resource's status.
//! - [`router::ModelRouter`]: classifies a request, filters the pool by
//!   health and constraints, then scores and selects one resource.
//! - [`queue::QueueManager`]: introspection and lifecycle control over an
//!   external async job backend; in-flight work is never removed.
//! - [`aggregator::MonitoringAggregator`]: read-only composition of the
//!   above for dashboards and alerting.
//!
//! # Control flow
//!
//! ```text
//! caller ── select_model ──▶ ModelRouter ──▶ circuit + resource reads
//!   │                                            ▲
//!   ├── invoke chosen resource                   │ status writes
//!   └── record_success / record_failure ─▶ CircuitBreaker
//!                                                │
//! HealthMonitor ── timer ── probes ──────────────┘
//! ```
//!
//! The router holds no mutable state; the circuit map is the only state
//! written from many concurrent callers. Callers must tolerate a resource
//! going unhealthy right after selection; their own `record_failure` is
//! the safety net that takes it out of rotation.

pub mod aggregator;
pub mod breaker;
pub mod events;
pub mod health;
pub mod queue;
pub mod router;
pub mod state;
pub mod telemetry;

// Re-export key breaker types
pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState, SharedCircuitBreaker,
};

// Re-export key health types
pub use health::{HealthMonitor, HealthMonitorConfig, HealthSummary, ProbeResult, ResourceHealth};

// Re-export key router types
pub use router::{
    estimate_cost, ComplexityEstimator, KeywordClassifier, KeywordComplexityEstimator,
    ModelRouter, ModelSelection, PromptClassifier, RouterError, RouterResult,
};

// Re-export key queue types
pub use queue::{
    InMemoryJobBackend, Job, JobBackend, JobCounts, JobStatus, QueueError, QueueHealth,
    QueueManager, QueueResult, QueueStats, SharedJobBackend,
};

// Re-export key state types
pub use state::{
    Complexity, InMemoryPolicyStore, InMemoryResourceStore, PolicyRules, PolicyStore, PromptType,
    Resource, ResourceStatus, ResourceStore, RoutingPolicy, RoutingRequest, SharedPolicyStore,
    SharedResourceStore, StoreError, StoreResult,
};

// Re-export key event types
pub use events::{
    EventBus, LogRecord, LogSeverity, RouterEvent, SharedEventBus, SharedSystemLog, SystemLog,
    TracingLog,
};

// Re-export monitoring types
pub use aggregator::{MonitorError, MonitoringAggregator, MonitoringSnapshot};
