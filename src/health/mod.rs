//! Active health probing of backend resources.
//!
//! Runs on its own timer, independent of request traffic. Each cycle probes
//! every active resource with a bounded-parallel fan-out; each probe carries
//! its own deadline so one hung endpoint cannot stall the batch. The only
//! coupling to the router is the persisted `status` field this module
//! writes. Probe and transport errors never propagate: they become an
//! OFFLINE status with the error recorded in the resource's settings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::events::{LogRecord, LogSeverity, RouterEvent, SharedEventBus, SharedSystemLog};
use crate::state::{Resource, ResourceStatus, SharedResourceStore};

/// Timing and fan-out configuration for the health monitor.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Delay between probe cycles.
    pub interval: Duration,
    /// Per-probe deadline.
    pub probe_timeout: Duration,
    /// Maximum probes in flight at once.
    pub max_concurrency: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        let interval = std::env::var("ROUTER_HEALTH_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(30));

        let probe_timeout = std::env::var("ROUTER_HEALTH_PROBE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(5));

        let max_concurrency = std::env::var("ROUTER_HEALTH_MAX_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8);

        Self {
            interval,
            probe_timeout,
            max_concurrency,
        }
    }
}

/// Outcome of probing a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub resource_id: String,
    pub status: ResourceStatus,
    /// Wall-clock elapsed, recorded for every outcome.
    pub latency_ms: u64,
    /// Status code, error text, or model listing depending on outcome.
    pub detail: serde_json::Value,
    /// Model names reported by providers that expose a listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
}

/// Per-resource row in the health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHealth {
    pub id: String,
    pub name: String,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Aggregate health counts for dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub degraded: usize,
    pub unknown: usize,
    pub resources: Vec<ResourceHealth>,
}

/// Periodic prober keeping persisted resource status current.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    store: SharedResourceStore,
    log: SharedSystemLog,
    events: Option<SharedEventBus>,
    client: reqwest::Client,
}

impl HealthMonitor {
    /// Create a monitor over the given store and log sink.
    ///
    /// Fails only if the HTTP client cannot be constructed.
    pub fn new(
        config: HealthMonitorConfig,
        store: SharedResourceStore,
        log: SharedSystemLog,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .connect_timeout(config.probe_timeout)
            .build()?;
        Ok(Self {
            config,
            store,
            log,
            events: None,
            client,
        })
    }

    /// Attach an event bus for status-transition notifications.
    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Create a shared reference to this monitor.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Probe every active resource once. Timer entrypoint.
    ///
    /// Returns the probe results for callers that want them; persistence and
    /// transition logging have already happened by the time this returns.
    pub async fn perform_health_checks(&self) -> Vec<ProbeResult> {
        let resources = match self.store.list_active().await {
            Ok(resources) => resources,
            Err(e) => {
                warn!("health check skipped, resource listing failed: {}", e);
                return Vec::new();
            }
        };

        let probes = resources.into_iter().map(|resource| async move {
            let probe = self
                .check_server_health(&resource.id, &resource.provider, &resource.url)
                .await;
            (resource, probe)
        });

        let outcomes: Vec<(Resource, ProbeResult)> = stream::iter(probes)
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (resource, probe) in outcomes {
            self.apply_probe(&resource, &probe).await;
            results.push(probe);
        }
        results
    }

    /// Probe one endpoint, bounded by the configured deadline.
    pub async fn check_server_health(
        &self,
        id: &str,
        provider: &str,
        url: &str,
    ) -> ProbeResult {
        let probe_url = probe_url(provider, url);
        let started = Instant::now();

        let (status, detail, models) = match self.client.get(&probe_url).send().await {
            Ok(response) if response.status().is_success() => {
                let models = parse_model_listing(provider, response).await;
                let detail = match &models {
                    Some(names) => serde_json::json!({
                        "models": names.len(),
                        "model_names": names,
                    }),
                    None => serde_json::json!({}),
                };
                (ResourceStatus::Online, detail, models)
            }
            Ok(response) => {
                let code = response.status().as_u16();
                (
                    ResourceStatus::Degraded,
                    serde_json::json!({ "status_code": code }),
                    None,
                )
            }
            Err(e) if e.is_timeout() => (
                ResourceStatus::Offline,
                serde_json::json!({
                    "error": format!("probe timed out after {:?}", self.config.probe_timeout),
                }),
                None,
            ),
            Err(e) => (
                ResourceStatus::Offline,
                serde_json::json!({ "error": e.to_string() }),
                None,
            ),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(resource = id, %status, latency_ms, "probe completed");

        ProbeResult {
            resource_id: id.to_string(),
            status,
            latency_ms,
            detail,
            models,
        }
    }

    /// Persist a probe outcome; on a status transition, append a log record
    /// and notify observers.
    async fn apply_probe(&self, resource: &Resource, probe: &ProbeResult) {
        if probe.status != resource.status {
            let severity = if probe.status == ResourceStatus::Offline {
                LogSeverity::Error
            } else {
                LogSeverity::Info
            };
            let record = LogRecord::new(
                severity,
                "health_monitor",
                format!(
                    "resource {} transitioned {} -> {}",
                    resource.id, resource.status, probe.status
                ),
            )
            .with_detail(probe.detail.clone());

            if let Err(e) = self.log.append(record) {
                warn!(resource = %resource.id, "failed to append transition record: {}", e);
            }

            if let Some(bus) = &self.events {
                bus.publish(RouterEvent::ResourceStatusChanged {
                    resource_id: resource.id.clone(),
                    from: resource.status,
                    to: probe.status,
                    latency_ms: probe.latency_ms,
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        if let Err(e) = self
            .store
            .update_status(&resource.id, probe.status, probe.latency_ms, probe.detail.clone())
            .await
        {
            warn!(resource = %resource.id, "failed to persist probe outcome: {}", e);
        }
    }

    /// Aggregate counts and per-resource latency for dashboards.
    pub async fn health_summary(&self) -> HealthSummary {
        let resources = match self.store.list().await {
            Ok(resources) => resources,
            Err(e) => {
                warn!("health summary unavailable, resource listing failed: {}", e);
                return HealthSummary::default();
            }
        };

        let mut summary = HealthSummary {
            total: resources.len(),
            ..Default::default()
        };
        for resource in resources {
            match resource.status {
                ResourceStatus::Online => summary.online += 1,
                ResourceStatus::Offline => summary.offline += 1,
                ResourceStatus::Degraded => summary.degraded += 1,
                ResourceStatus::Unknown => summary.unknown += 1,
            }
            summary.resources.push(ResourceHealth {
                latency_ms: resource.settings.get("latency_ms").and_then(|v| v.as_u64()),
                id: resource.id,
                name: resource.name,
                status: resource.status,
            });
        }
        summary
    }

    /// Probe on the configured interval until the task is dropped.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.perform_health_checks().await;
        }
    }
}

/// Liveness path per provider kind. Providers with a model listing are
/// probed through it so the listing can be recorded.
fn probe_url(provider: &str, base: &str) -> String {
    let base = base.trim_end_matches('/');
    match provider.to_ascii_lowercase().as_str() {
        "ollama" => format!("{base}/api/tags"),
        "openai" | "vllm" | "openai-compatible" => format!("{base}/v1/models"),
        _ => format!("{base}/health"),
    }
}

/// Extract model names from a successful listing response, if the provider
/// exposes one. Body parse failures degrade to "no listing", not an error.
async fn parse_model_listing(provider: &str, response: reqwest::Response) -> Option<Vec<String>> {
    let body: serde_json::Value = match provider.to_ascii_lowercase().as_str() {
        "ollama" | "openai" | "vllm" | "openai-compatible" => response.json().await.ok()?,
        _ => return None,
    };

    let entries = body
        .get("models")
        .or_else(|| body.get("data"))?
        .as_array()?;

    let names = entries
        .iter()
        .filter_map(|m| {
            m.get("name")
                .or_else(|| m.get("id"))
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .collect();
    Some(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LogError, SystemLog};
    use crate::state::{InMemoryResourceStore, ResourceStore};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingLog {
        records: Mutex<Vec<LogRecord>>,
    }

    impl SystemLog for RecordingLog {
        fn append(&self, record: LogRecord) -> Result<(), LogError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn test_config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_millis(500),
            max_concurrency: 4,
        }
    }

    async fn serve_once(listener: TcpListener, status_line: &'static str, body: &'static str) {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    }

    fn monitor_with(
        store: SharedResourceStore,
        log: Arc<RecordingLog>,
    ) -> HealthMonitor {
        HealthMonitor::new(test_config(), store, log).unwrap()
    }

    #[test]
    fn test_probe_url_per_provider() {
        assert_eq!(
            probe_url("ollama", "http://host:11434/"),
            "http://host:11434/api/tags"
        );
        assert_eq!(
            probe_url("vllm", "http://host:8000"),
            "http://host:8000/v1/models"
        );
        assert_eq!(
            probe_url("custom", "http://host:9000"),
            "http://host:9000/health"
        );
    }

    #[tokio::test]
    async fn test_probe_online_records_models() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(
            listener,
            "200 OK",
            r#"{"models":[{"name":"qwen-coder"},{"name":"llama3"}]}"#,
        ));

        let store = InMemoryResourceStore::new().shared();
        let log = Arc::new(RecordingLog::default());
        let monitor = monitor_with(store, log);

        let probe = monitor
            .check_server_health("r1", "ollama", &format!("http://{addr}"))
            .await;
        assert_eq!(probe.status, ResourceStatus::Online);
        assert_eq!(probe.models.as_deref().map(|m| m.len()), Some(2));
        assert_eq!(probe.detail["models"], 2);
    }

    #[tokio::test]
    async fn test_probe_http_error_is_degraded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, "503 Service Unavailable", "{}"));

        let store = InMemoryResourceStore::new().shared();
        let log = Arc::new(RecordingLog::default());
        let monitor = monitor_with(store, log);

        let probe = monitor
            .check_server_health("r1", "custom", &format!("http://{addr}"))
            .await;
        assert_eq!(probe.status, ResourceStatus::Degraded);
        assert_eq!(probe.detail["status_code"], 503);
    }

    #[tokio::test]
    async fn test_probe_connection_refused_is_offline() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = InMemoryResourceStore::new().shared();
        let log = Arc::new(RecordingLog::default());
        let monitor = monitor_with(store, log);

        let probe = monitor
            .check_server_health("r1", "custom", &format!("http://{addr}"))
            .await;
        assert_eq!(probe.status, ResourceStatus::Offline);
        assert!(probe.detail["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_hung_endpoint_hits_deadline() {
        // Accepts but never responds; the probe must come back at the
        // configured deadline, not hang.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            }
        });

        let store = InMemoryResourceStore::new().shared();
        let log = Arc::new(RecordingLog::default());
        let monitor = monitor_with(store, log);

        let started = Instant::now();
        let probe = monitor
            .check_server_health("r1", "custom", &format!("http://{addr}"))
            .await;
        assert_eq!(probe.status, ResourceStatus::Offline);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transition_logged_and_persisted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = Arc::new(InMemoryResourceStore::new());
        let mut resource = Resource::new("r1", "m1", "custom", format!("http://{addr}"));
        resource.status = ResourceStatus::Online;
        store.insert(resource);

        let log = Arc::new(RecordingLog::default());
        let monitor = monitor_with(store.clone() as SharedResourceStore, log.clone());

        monitor.perform_health_checks().await;

        let updated = store.get("r1").await.unwrap().unwrap();
        assert_eq!(updated.status, ResourceStatus::Offline);
        assert!(updated.last_health_check.is_some());

        let records = log.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, LogSeverity::Error);
        assert!(records[0].message.contains("ONLINE -> OFFLINE"));
    }

    #[tokio::test]
    async fn test_steady_state_not_relogged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = Arc::new(InMemoryResourceStore::new());
        let mut resource = Resource::new("r1", "m1", "custom", format!("http://{addr}"));
        resource.status = ResourceStatus::Offline;
        store.insert(resource);

        let log = Arc::new(RecordingLog::default());
        let monitor = monitor_with(store.clone() as SharedResourceStore, log.clone());

        monitor.perform_health_checks().await;
        assert!(log.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_summary_counts() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut online = Resource::new("a", "m1", "ollama", "http://a");
        online.status = ResourceStatus::Online;
        online.settings = serde_json::json!({ "latency_ms": 12 });
        store.insert(online);
        let mut offline = Resource::new("b", "m2", "ollama", "http://b");
        offline.status = ResourceStatus::Offline;
        store.insert(offline);

        let log = Arc::new(RecordingLog::default());
        let monitor = monitor_with(store as SharedResourceStore, log);

        let summary = monitor.health_summary().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.online, 1);
        assert_eq!(summary.offline, 1);
        let a = summary.resources.iter().find(|r| r.id == "a").unwrap();
        assert_eq!(a.latency_ms, Some(12));
    }
}
