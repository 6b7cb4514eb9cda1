//! Read-only monitoring composition.
//!
//! Collapses circuit metrics, the health summary, and queue stats into one
//! snapshot for dashboards and alerting. Consumes only the public contracts
//! of the other components and never mutates anything.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breaker::{CircuitMetrics, SharedCircuitBreaker};
use crate::health::{HealthMonitor, HealthSummary};
use crate::queue::{QueueError, QueueHealth, QueueManager, QueueStats};

/// Error type for monitoring snapshots
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// One point-in-time view across the routing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub generated_at: DateTime<Utc>,
    /// Circuit metrics keyed by resource id.
    pub circuits: HashMap<String, CircuitMetrics>,
    pub health: HealthSummary,
    pub queue: QueueStats,
    pub queue_health: QueueHealth,
}

/// Thin composition of breaker, health monitor, and queue manager.
pub struct MonitoringAggregator {
    breaker: SharedCircuitBreaker,
    health: Arc<HealthMonitor>,
    queue: Arc<QueueManager>,
}

impl MonitoringAggregator {
    pub fn new(
        breaker: SharedCircuitBreaker,
        health: Arc<HealthMonitor>,
        queue: Arc<QueueManager>,
    ) -> Self {
        Self {
            breaker,
            health,
            queue,
        }
    }

    /// Assemble a snapshot from fresh reads of every component.
    pub async fn snapshot(&self) -> Result<MonitoringSnapshot, MonitorError> {
        Ok(MonitoringSnapshot {
            generated_at: Utc::now(),
            circuits: self.breaker.all_states(),
            health: self.health.health_summary().await,
            queue: self.queue.queue_stats().await?,
            queue_health: self.queue.health_status().await?,
        })
    }
}
