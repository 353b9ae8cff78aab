//! In-memory simulation provider.
//!
//! Backs the CLI when no real provider is linked (and several tests):
//! resources live in a process-local table, ids and outputs are
//! synthesized deterministically from the declaration. Useful for trying
//! out descriptors and plans without touching a cloud account.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

use crate::descriptor::{PropertyValue, ResourceKind};
use crate::error::ProviderError;

use super::{CreatedResource, ObservedResource, Provider, ProviderOutputs, ProviderResult};

/// Simulated physical environment.
#[derive(Debug, Default)]
pub struct SimulationProvider {
    /// Physical resources by id.
    resources: Mutex<HashMap<String, SimulatedResource>>,
}

#[derive(Debug, Clone)]
struct SimulatedResource {
    #[allow(dead_code)]
    kind: ResourceKind,
    properties: BTreeMap<String, PropertyValue>,
    outputs: ProviderOutputs,
}

impl SimulationProvider {
    /// Creates an empty simulated environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesizes the output map for a resource.
    fn synthesize_outputs(
        kind: ResourceKind,
        physical_id: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> ProviderOutputs {
        let mut outputs = ProviderOutputs::new();
        outputs.insert(String::from("id"), physical_id.to_string());
        outputs.insert(
            String::from("arn"),
            format!("arn:sim:{kind}:{physical_id}"),
        );

        let display_name = properties
            .get("name")
            .or_else(|| properties.get("family"))
            .and_then(PropertyValue::as_str)
            .unwrap_or(physical_id);
        outputs.insert(String::from("name"), display_name.to_string());

        if kind == ResourceKind::LoadBalancer {
            outputs.insert(
                String::from("dns_name"),
                format!("{display_name}.elb.sim.local"),
            );
        }

        outputs
    }

    fn lock(&self) -> ProviderResult<std::sync::MutexGuard<'_, HashMap<String, SimulatedResource>>> {
        self.resources
            .lock()
            .map_err(|_| ProviderError::failed("simulation state poisoned"))
    }
}

#[async_trait]
impl Provider for SimulationProvider {
    fn name(&self) -> &str {
        "simulation"
    }

    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> ProviderResult<CreatedResource> {
        let suffix = &Uuid::new_v4().to_string()[..7];
        let physical_id = format!("sim-{kind}-{name}-{suffix}");
        let outputs = Self::synthesize_outputs(kind, &physical_id, properties);

        self.lock()?.insert(
            physical_id.clone(),
            SimulatedResource {
                kind,
                properties: properties.clone(),
                outputs: outputs.clone(),
            },
        );

        Ok(CreatedResource {
            physical_id,
            outputs,
        })
    }

    async fn read(
        &self,
        kind: ResourceKind,
        physical_id: &str,
    ) -> ProviderResult<ObservedResource> {
        if let Some(resource) = self.lock()?.get(physical_id) {
            return Ok(ObservedResource {
                properties: resource.properties.clone(),
                outputs: resource.outputs.clone(),
            });
        }

        // Ids the simulation has never seen stand in for pre-existing
        // infrastructure being adopted; synthesize their outputs.
        Ok(ObservedResource {
            properties: BTreeMap::new(),
            outputs: Self::synthesize_outputs(kind, physical_id, &BTreeMap::new()),
        })
    }

    async fn update(
        &self,
        kind: ResourceKind,
        physical_id: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> ProviderResult<ProviderOutputs> {
        let mut resources = self.lock()?;
        let Some(resource) = resources.get_mut(physical_id) else {
            return Err(ProviderError::NotFound {
                physical_id: physical_id.to_string(),
            });
        };

        resource.properties = properties.clone();
        resource.outputs = Self::synthesize_outputs(kind, physical_id, properties);
        Ok(resource.outputs.clone())
    }

    async fn delete(&self, _kind: ResourceKind, physical_id: &str) -> ProviderResult<()> {
        if self.lock()?.remove(physical_id).is_none() {
            return Err(ProviderError::NotFound {
                physical_id: physical_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(yaml: &str) -> BTreeMap<String, PropertyValue> {
        serde_yaml::from_str(yaml).expect("test properties should parse")
    }

    #[tokio::test]
    async fn test_create_then_read_roundtrip() {
        let provider = SimulationProvider::new();
        let created = provider
            .create(ResourceKind::Cluster, "cluster", &props("name: voting-app\n"))
            .await
            .unwrap();

        assert!(created.physical_id.starts_with("sim-cluster-cluster-"));
        assert_eq!(created.outputs.get("name").map(String::as_str), Some("voting-app"));

        let observed = provider
            .read(ResourceKind::Cluster, &created.physical_id)
            .await
            .unwrap();
        assert_eq!(observed.outputs, created.outputs);
    }

    #[tokio::test]
    async fn test_read_unknown_id_synthesizes_adoption_outputs() {
        let provider = SimulationProvider::new();
        let observed = provider
            .read(ResourceKind::LoadBalancer, "lb-preexisting")
            .await
            .unwrap();

        assert_eq!(
            observed.outputs.get("arn").map(String::as_str),
            Some("arn:sim:load-balancer:lb-preexisting")
        );
        assert!(observed.properties.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_resource_is_not_found() {
        let provider = SimulationProvider::new();
        let result = provider
            .update(ResourceKind::Service, "ghost", &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(ProviderError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let provider = SimulationProvider::new();
        let created = provider
            .create(ResourceKind::LogGroup, "logs", &props("name: lg\n"))
            .await
            .unwrap();

        provider
            .delete(ResourceKind::LogGroup, &created.physical_id)
            .await
            .unwrap();
        let result = provider
            .delete(ResourceKind::LogGroup, &created.physical_id)
            .await;
        assert!(matches!(result, Err(ProviderError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_load_balancer_gets_dns_name() {
        let provider = SimulationProvider::new();
        let created = provider
            .create(
                ResourceKind::LoadBalancer,
                "frontend-lb",
                &props("name: voting-app-frontend\n"),
            )
            .await
            .unwrap();

        assert_eq!(
            created.outputs.get("dns_name").map(String::as_str),
            Some("voting-app-frontend.elb.sim.local")
        );
    }
}
