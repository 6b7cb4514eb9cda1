//! Store contracts for resources and routing policies.
//!
//! The admin layer owns both record types; the core reads them through these
//! traits. `update_status` is the single write path, used only by the health
//! monitor. In-memory implementations are provided for tests and for
//! embedding without an external database.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::types::{Resource, ResourceStatus, RoutingPolicy};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a resource store
pub type SharedResourceStore = Arc<dyn ResourceStore>;

/// Shared reference to a policy store
pub type SharedPolicyStore = Arc<dyn PolicyStore>;

/// Read access to resource records, plus the health monitor's status write.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// All resource records.
    async fn list(&self) -> StoreResult<Vec<Resource>>;

    /// Resources with `is_active = true`.
    async fn list_active(&self) -> StoreResult<Vec<Resource>> {
        Ok(self.list().await?.into_iter().filter(|r| r.is_active).collect())
    }

    /// A single resource by id.
    async fn get(&self, id: &str) -> StoreResult<Option<Resource>>;

    /// Persist the outcome of a health probe: new status, measured latency,
    /// and a free-form detail blob merged into the resource's settings.
    async fn update_status(
        &self,
        id: &str,
        status: ResourceStatus,
        latency_ms: u64,
        detail: serde_json::Value,
    ) -> StoreResult<()>;
}

/// Read-only access to routing policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All policies with `is_active = true`.
    async fn active_policies(&self) -> StoreResult<Vec<RoutingPolicy>>;

    /// A single policy by id, active or not.
    async fn get(&self, id: &str) -> StoreResult<Option<RoutingPolicy>>;
}

/// In-memory resource store backed by a RwLock'd map.
#[derive(Default)]
pub struct InMemoryResourceStore {
    resources: RwLock<HashMap<String, Resource>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a resource record.
    pub fn insert(&self, resource: Resource) {
        let mut map = self.resources.write().unwrap_or_else(|e| e.into_inner());
        map.insert(resource.id.clone(), resource);
    }

    /// Remove a resource record.
    pub fn remove(&self, id: &str) -> bool {
        let mut map = self.resources.write().unwrap_or_else(|e| e.into_inner());
        map.remove(id).is_some()
    }

    /// Create a shared trait-object reference to this store.
    pub fn shared(self) -> SharedResourceStore {
        Arc::new(self)
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn list(&self) -> StoreResult<Vec<Resource>> {
        let map = self.resources.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Resource>> {
        let map = self.resources.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &str,
        status: ResourceStatus,
        latency_ms: u64,
        detail: serde_json::Value,
    ) -> StoreResult<()> {
        let mut map = self.resources.write().map_err(|_| StoreError::LockPoisoned)?;
        let resource = map.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        resource.status = status;
        resource.last_health_check = Some(Utc::now());

        if !resource.settings.is_object() {
            resource.settings = serde_json::json!({});
        }
        if let Some(obj) = resource.settings.as_object_mut() {
            obj.insert("latency_ms".to_string(), serde_json::json!(latency_ms));
            obj.insert("last_probe".to_string(), detail);
        }
        Ok(())
    }
}

/// In-memory policy store.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<String, RoutingPolicy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a policy.
    pub fn insert(&self, policy: RoutingPolicy) {
        let mut map = self.policies.write().unwrap_or_else(|e| e.into_inner());
        map.insert(policy.id.clone(), policy);
    }

    /// Create a shared trait-object reference to this store.
    pub fn shared(self) -> SharedPolicyStore {
        Arc::new(self)
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn active_policies(&self) -> StoreResult<Vec<RoutingPolicy>> {
        let map = self.policies.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.values().filter(|p| p.is_active).cloned().collect())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<RoutingPolicy>> {
        let map = self.policies.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.get(id).cloned())
    }
}
