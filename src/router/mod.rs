//! Request routing across the resource pool.
//!
//! Selection pipeline: classify the prompt, load the governing policy,
//! gather healthy candidates (circuit-open resources excluded), apply hard
//! constraints (provider, cost ceiling), then score the rest with a soft
//! preference bonus. Model preference is never a filter: a non-preferred
//! but healthy resource stays eligible, so a provider outage cannot starve
//! the pool. Ties are broken deterministically by resource id.
//!
//! The router holds no mutable state. Every selection is a pure function of
//! a fresh read of resources, policy, and circuit state, so concurrent
//! callers never contend on anything but the breaker map.

pub mod classifier;

pub use classifier::{
    ComplexityEstimator, KeywordClassifier, KeywordComplexityEstimator, PromptClassifier,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::breaker::{CircuitState, SharedCircuitBreaker};
use crate::state::{
    Complexity, PromptType, Resource, ResourceStatus, RoutingPolicy, RoutingRequest,
    SharedPolicyStore, SharedResourceStore, StoreError,
};

/// Default per-token rate when a resource carries no override.
pub const DEFAULT_COST_PER_TOKEN: f64 = 0.000002;

/// Additive score for preference matches when the policy sets none.
pub const DEFAULT_PREFERENCE_BONUS: f64 = 0.2;

/// Error type for routing decisions
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The availability filter produced zero candidates.
    #[error("no healthy resource available")]
    NoHealthyResource,

    /// Hard constraints eliminated every remaining candidate.
    #[error("no suitable resource matches the request constraints")]
    NoSuitableResource,

    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for routing decisions
pub type RouterResult<T> = Result<T, RouterError>;

/// The outcome of a routing decision. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    pub resource_id: String,
    pub resource_name: String,
    pub model: String,
    pub provider: String,
    /// Human-readable account of why this resource won.
    pub reason: String,
    pub estimated_cost: f64,
    pub prompt_type: PromptType,
    pub complexity: Complexity,
}

/// Estimated request cost on a resource: the complexity token budget times
/// the resource's per-token rate (or the fixed default).
pub fn estimate_cost(resource: &Resource, complexity: Complexity) -> f64 {
    let rate = resource.cost_per_token().unwrap_or(DEFAULT_COST_PER_TOKEN);
    complexity.token_budget() as f64 * rate
}

/// Multi-criteria weighted router over the resource pool.
pub struct ModelRouter {
    resources: SharedResourceStore,
    policies: SharedPolicyStore,
    breaker: SharedCircuitBreaker,
    classifier: Box<dyn PromptClassifier>,
    estimator: Box<dyn ComplexityEstimator>,
}

impl ModelRouter {
    /// Create a router with the default keyword heuristics.
    pub fn new(
        resources: SharedResourceStore,
        policies: SharedPolicyStore,
        breaker: SharedCircuitBreaker,
    ) -> Self {
        Self {
            resources,
            policies,
            breaker,
            classifier: Box::new(KeywordClassifier),
            estimator: Box::new(KeywordComplexityEstimator),
        }
    }

    /// Swap the prompt classification strategy.
    pub fn with_classifier(mut self, classifier: impl PromptClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Swap the complexity estimation strategy.
    pub fn with_estimator(mut self, estimator: impl ComplexityEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Select the best eligible resource under the governing active policy.
    pub async fn select_model(&self, request: &RoutingRequest) -> RouterResult<ModelSelection> {
        let policy = self.active_policy().await?;
        self.select_with_policy(&policy, request).await
    }

    /// Identical selection under an explicitly named policy.
    pub async fn override_with_policy(
        &self,
        policy_id: &str,
        request: &RoutingRequest,
    ) -> RouterResult<ModelSelection> {
        let policy = self
            .policies
            .get(policy_id)
            .await?
            .ok_or_else(|| RouterError::PolicyNotFound(policy_id.to_string()))?;
        self.select_with_policy(&policy, request).await
    }

    /// The active policy with the highest priority, or the built-in default
    /// when none exists.
    async fn active_policy(&self) -> RouterResult<RoutingPolicy> {
        let mut policies = self.policies.active_policies().await?;
        policies.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(policies
            .into_iter()
            .next()
            .unwrap_or_else(RoutingPolicy::default_policy))
    }

    async fn select_with_policy(
        &self,
        policy: &RoutingPolicy,
        request: &RoutingRequest,
    ) -> RouterResult<ModelSelection> {
        let prompt_type = request
            .prompt_type
            .unwrap_or_else(|| self.classifier.classify(&request.content));
        let complexity = request
            .complexity
            .unwrap_or_else(|| self.estimator.estimate(&request.content));

        // Availability filter: active, reachable, circuit not open.
        let candidates: Vec<Resource> = self
            .resources
            .list_active()
            .await?
            .into_iter()
            .filter(|r| matches!(r.status, ResourceStatus::Online | ResourceStatus::Degraded))
            .filter(|r| !self.breaker.is_open(&r.id))
            .collect();
        if candidates.is_empty() {
            return Err(RouterError::NoHealthyResource);
        }

        // Hard constraints exclude a candidate entirely.
        let preferred_provider = request
            .preferred_provider
            .as_deref()
            .or(policy.rules.preferred_provider.as_deref());
        let max_cost = request.max_cost.or(policy.rules.max_cost_per_request);

        let mut constrained: Vec<(Resource, f64)> = candidates
            .into_iter()
            .map(|r| {
                let cost = estimate_cost(&r, complexity);
                (r, cost)
            })
            .filter(|(r, _)| {
                preferred_provider
                    .map(|p| r.provider.eq_ignore_ascii_case(p))
                    .unwrap_or(true)
            })
            .filter(|(_, cost)| max_cost.map(|m| *cost <= m).unwrap_or(true))
            .collect();
        if constrained.is_empty() {
            return Err(RouterError::NoSuitableResource);
        }

        if constrained.len() == 1 {
            let (resource, cost) = constrained.remove(0);
            debug!(resource = %resource.id, "single eligible resource, skipping scoring");
            return Ok(selection(
                resource,
                cost,
                prompt_type,
                complexity,
                "only eligible resource".to_string(),
            ));
        }

        let preferences = policy.rules.model_preferences.get(&prompt_type);
        let bonus = policy
            .rules
            .preference_bonus
            .unwrap_or(DEFAULT_PREFERENCE_BONUS);
        let max_cost_among = constrained.iter().map(|(_, c)| *c).fold(0.0_f64, f64::max);

        let mut best: Option<(f64, Resource, f64, String)> = None;
        for (resource, cost) in constrained {
            let availability = 1.0 - self.breaker.failure_rate(&resource.id);
            let cost_score = if max_cost_among <= 0.0 {
                1.0
            } else {
                1.0 - cost / max_cost_among
            };
            let performance = match self.breaker.state(&resource.id) {
                CircuitState::Closed => 1.0,
                CircuitState::HalfOpen => 0.7,
                CircuitState::Open => 0.5,
            };
            let preferred = is_preferred(preferences.map(|p| p.as_slice()), &resource.name);

            let mut total = cost_score * policy.rules.cost_weight
                + performance * policy.rules.performance_weight
                + availability * policy.rules.availability_weight;
            if preferred {
                total += bonus;
            }

            debug!(
                resource = %resource.id,
                total, cost_score, performance, availability, preferred,
                "candidate scored"
            );

            let reason = format!(
                "best weighted score {:.3} (cost {:.2}, performance {:.2}, availability {:.2}{})",
                total,
                cost_score,
                performance,
                availability,
                if preferred { ", preferred" } else { "" }
            );

            let replace = match &best {
                None => true,
                Some((best_total, best_resource, _, _)) => {
                    total > *best_total || (total == *best_total && resource.id < best_resource.id)
                }
            };
            if replace {
                best = Some((total, resource, cost, reason));
            }
        }

        match best {
            Some((_, resource, cost, reason)) => {
                Ok(selection(resource, cost, prompt_type, complexity, reason))
            }
            // Unreachable: constrained held at least two entries.
            None => Err(RouterError::NoSuitableResource),
        }
    }
}

fn selection(
    resource: Resource,
    estimated_cost: f64,
    prompt_type: PromptType,
    complexity: Complexity,
    reason: String,
) -> ModelSelection {
    ModelSelection {
        resource_id: resource.id,
        model: resource.name.clone(),
        resource_name: resource.name,
        provider: resource.provider,
        reason,
        estimated_cost,
        prompt_type,
        complexity,
    }
}

/// Preference is a scoring bonus, not a filter. An empty or missing list
/// means everything is preferred for this prompt type.
fn is_preferred(preferences: Option<&[String]>, model_name: &str) -> bool {
    match preferences {
        None => true,
        Some(list) if list.is_empty() => true,
        Some(list) => {
            let model = model_name.to_lowercase();
            list.iter().any(|p| model.contains(&p.to_lowercase()))
        }
    }
}
