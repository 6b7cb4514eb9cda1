//! Shared domain types and store contracts.
//!
//! The routing core is read-mostly: resources and policies are owned by the
//! admin layer and consumed here through the [`store`] contracts. The only
//! field the core ever writes back is a resource's health status.

pub mod store;
pub mod types;

pub use store::{
    InMemoryPolicyStore, InMemoryResourceStore, PolicyStore, ResourceStore, SharedPolicyStore,
    SharedResourceStore, StoreError, StoreResult,
};
pub use types::{
    Complexity, PolicyRules, PromptType, Resource, ResourceStatus, RoutingPolicy, RoutingRequest,
};
