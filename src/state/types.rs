//! Core domain types: resources, routing policies, and routing requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Liveness status of a backend resource, as persisted by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceStatus {
    /// Probe succeeded, resource serves requests.
    Online,
    /// Probe timed out or the transport failed.
    Offline,
    /// Resource answered with a non-success HTTP status.
    Degraded,
    /// Never probed.
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "ONLINE"),
            Self::Offline => write!(f, "OFFLINE"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A backend compute endpoint capable of serving inference requests.
///
/// Owned and mutated by the admin layer; the core reads these records and
/// only ever writes back `status`, `last_health_check`, and probe details
/// inside `settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    /// Model name served by this endpoint.
    pub name: String,
    /// Provider kind, e.g. "ollama", "openai", "vllm".
    pub provider: String,
    pub url: String,
    pub is_active: bool,
    pub routing_weight: f64,
    /// Requests per minute the endpoint accepts, if limited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Free-form blob holding the last probe latency and details.
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl Resource {
    /// Create an active resource with UNKNOWN status and defaults.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider: provider.into(),
            url: url.into(),
            is_active: true,
            routing_weight: 1.0,
            rate_limit: None,
            status: ResourceStatus::Unknown,
            last_health_check: None,
            settings: serde_json::Value::Null,
        }
    }

    /// Per-token cost override from the settings blob, if the admin set one.
    pub fn cost_per_token(&self) -> Option<f64> {
        self.settings.get("cost_per_token").and_then(|v| v.as_f64())
    }
}

/// Category of work a prompt asks for, used to look up model preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    Code,
    Refactor,
    Explain,
    Review,
    Fix,
    Test,
}

impl std::fmt::Display for PromptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Refactor => write!(f, "refactor"),
            Self::Explain => write!(f, "explain"),
            Self::Review => write!(f, "review"),
            Self::Fix => write!(f, "fix"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Estimated complexity of a request, driving its token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Token budget assumed when estimating request cost.
    pub fn token_budget(&self) -> u32 {
        match self {
            Self::Low => 500,
            Self::Medium => 1_500,
            Self::High => 4_000,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Scoring weights and preferences governing resource selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRules {
    pub cost_weight: f64,
    pub performance_weight: f64,
    pub availability_weight: f64,
    /// Preferred model-name substrings per prompt type. An empty or missing
    /// list means every model is considered preferred for that type.
    #[serde(default)]
    pub model_preferences: HashMap<PromptType, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost_per_request: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
    /// Additive score for preference matches. Falls back to the crate
    /// default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preference_bonus: Option<f64>,
}

/// A named routing policy. Exactly one active policy is authoritative per
/// request unless explicitly overridden by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: PolicyRules,
    /// Tie-break for "most applicable policy"; highest wins.
    pub priority: i32,
    pub is_active: bool,
}

impl RoutingPolicy {
    /// Hard-coded fallback used when no active policy exists.
    pub fn default_policy() -> Self {
        let mut model_preferences = HashMap::new();
        model_preferences.insert(
            PromptType::Code,
            vec!["coder".to_string(), "codestral".to_string()],
        );
        model_preferences.insert(PromptType::Fix, vec!["coder".to_string()]);
        model_preferences.insert(
            PromptType::Explain,
            vec!["instruct".to_string(), "chat".to_string()],
        );
        model_preferences.insert(PromptType::Review, vec!["instruct".to_string()]);

        Self {
            id: "default".to_string(),
            name: "default".to_string(),
            description: "Built-in balanced policy".to_string(),
            rules: PolicyRules {
                cost_weight: 0.3,
                performance_weight: 0.4,
                availability_weight: 0.3,
                model_preferences,
                max_cost_per_request: None,
                preferred_provider: None,
                preference_bonus: None,
            },
            priority: 0,
            is_active: true,
        }
    }
}

/// An ephemeral routing request. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRequest {
    /// Raw prompt content, used for classification when the caller did not
    /// supply an explicit prompt type or complexity.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_type: Option<PromptType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
}

impl RoutingRequest {
    /// Create a request from raw prompt content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// With an explicit prompt type, skipping classification.
    pub fn with_prompt_type(mut self, prompt_type: PromptType) -> Self {
        self.prompt_type = Some(prompt_type);
        self
    }

    /// With an explicit complexity, skipping estimation.
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }

    /// With a hard cost ceiling.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// With a hard provider constraint.
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_defaults() {
        let r = Resource::new("r1", "qwen-coder", "ollama", "http://localhost:11434");
        assert!(r.is_active);
        assert_eq!(r.status, ResourceStatus::Unknown);
        assert!(r.last_health_check.is_none());
        assert!(r.cost_per_token().is_none());
    }

    #[test]
    fn test_cost_per_token_from_settings() {
        let mut r = Resource::new("r1", "m", "ollama", "http://x");
        r.settings = serde_json::json!({ "cost_per_token": 0.00001 });
        assert_eq!(r.cost_per_token(), Some(0.00001));
    }

    #[test]
    fn test_status_serde_uppercase() {
        let json = serde_json::to_string(&ResourceStatus::Degraded).unwrap();
        assert_eq!(json, "\"DEGRADED\"");
        let back: ResourceStatus = serde_json::from_str("\"OFFLINE\"").unwrap();
        assert_eq!(back, ResourceStatus::Offline);
    }

    #[test]
    fn test_token_budgets() {
        assert_eq!(Complexity::Low.token_budget(), 500);
        assert_eq!(Complexity::Medium.token_budget(), 1_500);
        assert_eq!(Complexity::High.token_budget(), 4_000);
    }

    #[test]
    fn test_default_policy_weights() {
        let p = RoutingPolicy::default_policy();
        assert!(p.is_active);
        assert!((p.rules.cost_weight - 0.3).abs() < f64::EPSILON);
        assert!((p.rules.performance_weight - 0.4).abs() < f64::EPSILON);
        assert!((p.rules.availability_weight - 0.3).abs() < f64::EPSILON);
        assert!(p.rules.model_preferences.contains_key(&PromptType::Code));
    }

    #[test]
    fn test_request_builder() {
        let req = RoutingRequest::new("implement a parser")
            .with_complexity(Complexity::High)
            .with_max_cost(0.05)
            .with_preferred_provider("ollama");
        assert_eq!(req.complexity, Some(Complexity::High));
        assert_eq!(req.max_cost, Some(0.05));
        assert_eq!(req.preferred_provider.as_deref(), Some("ollama"));
    }
}
