//! Provider capability consumed by the engine.
//!
//! The engine never talks to a cloud API directly. Everything it needs
//! from the target environment goes through the [`Provider`] trait: create
//! a resource from a property bag, read one by physical id, update it in
//! place, or delete it. Implementations live outside this crate.

mod retry;
mod simulation;

pub use retry::RetryPolicy;
pub use simulation::SimulationProvider;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::descriptor::{PropertyValue, ResourceKind};
use crate::error::ProviderError;

/// Result type for provider operations.
///
/// Provider errors carry their own retry classification, so they are not
/// wrapped in the crate-wide error type until the executor records them.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Outputs reported by the provider for a resource, keyed by field name.
pub type ProviderOutputs = BTreeMap<String, String>;

/// Result of a successful create call.
#[derive(Debug, Clone)]
pub struct CreatedResource {
    /// Provider-assigned physical identifier.
    pub physical_id: String,
    /// Output fields (e.g. `arn`, `dns_name`).
    pub outputs: ProviderOutputs,
}

/// Result of a successful read call.
#[derive(Debug, Clone)]
pub struct ObservedResource {
    /// Properties as they exist in the environment.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Output fields (e.g. `arn`, `dns_name`).
    pub outputs: ProviderOutputs,
}

/// Capability for performing create/read/update/delete against the target
/// environment for the resource kinds the engine declares.
///
/// Implementations must classify failures: [`ProviderError::Transient`]
/// errors are retried with backoff, everything else aborts the affected
/// step.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name (e.g. "aws").
    fn name(&self) -> &str;

    /// Creates a physical resource from a resolved property bag.
    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> ProviderResult<CreatedResource>;

    /// Reads a physical resource's live properties and outputs.
    async fn read(&self, kind: ResourceKind, physical_id: &str)
        -> ProviderResult<ObservedResource>;

    /// Updates a physical resource in place.
    async fn update(
        &self,
        kind: ResourceKind,
        physical_id: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> ProviderResult<ProviderOutputs>;

    /// Deletes a physical resource.
    async fn delete(&self, kind: ResourceKind, physical_id: &str) -> ProviderResult<()>;
}
