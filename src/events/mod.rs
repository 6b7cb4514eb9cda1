//! System log sink and event broadcast.
//!
//! Two side channels with no bearing on routing correctness: an append-only
//! [`SystemLog`] that receives status-transition and alert records, and an
//! [`EventBus`] on Tokio broadcast channels that dashboards can subscribe
//! to. The core works unchanged with zero subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::state::ResourceStatus;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Severity of a system log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

/// One append-only record in the system log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub severity: LogSeverity,
    /// Component that produced the record, e.g. "health_monitor".
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(severity: LogSeverity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            source: source.into(),
            message: message.into(),
            detail: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attach a structured detail blob.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Error type for log sink operations
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log sink unavailable: {0}")]
    Unavailable(String),
}

/// Shared reference to a system log sink
pub type SharedSystemLog = Arc<dyn SystemLog>;

/// Append-only sink for status transitions and alerts.
///
/// Implementations must not panic; failures surface as [`LogError`] and are
/// downgraded to warnings by callers.
pub trait SystemLog: Send + Sync {
    fn append(&self, record: LogRecord) -> Result<(), LogError>;
}

/// Default sink forwarding records to `tracing`.
#[derive(Debug, Default)]
pub struct TracingLog;

impl SystemLog for TracingLog {
    fn append(&self, record: LogRecord) -> Result<(), LogError> {
        match record.severity {
            LogSeverity::Info => info!(source = %record.source, detail = %record.detail, "{}", record.message),
            LogSeverity::Warning => warn!(source = %record.source, detail = %record.detail, "{}", record.message),
            LogSeverity::Error => error!(source = %record.source, detail = %record.detail, "{}", record.message),
        }
        Ok(())
    }
}

/// Event published on the broadcast bus for dashboard observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterEvent {
    ResourceStatusChanged {
        resource_id: String,
        from: ResourceStatus,
        to: ResourceStatus,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },
    QueuePaused {
        timestamp: DateTime<Utc>,
    },
    QueueResumed {
        timestamp: DateTime<Utc>,
    },
    JobRetried {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    JobRemoved {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
    JobsCleaned {
        removed: u64,
        timestamp: DateTime<Utc>,
    },
}

impl RouterEvent {
    /// Machine-readable event type tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ResourceStatusChanged { .. } => "resource_status_changed",
            Self::QueuePaused { .. } => "queue_paused",
            Self::QueueResumed { .. } => "queue_resumed",
            Self::JobRetried { .. } => "job_retried",
            Self::JobRemoved { .. } => "job_removed",
            Self::JobsCleaned { .. } => "jobs_cleaned",
        }
    }
}

/// Shared reference to an EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for router events. Publishing never fails: events with no
/// subscribers are simply dropped.
pub struct EventBus {
    sender: broadcast::Sender<RouterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this bus.
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RouterEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "event published"),
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.sender.subscribe()
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
