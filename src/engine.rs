//! Reconciliation orchestration.
//!
//! The engine ties the pieces together: load the descriptor's recorded
//! state, build the dependency graph, diff, plan, execute, and persist
//! run outputs. It also offers a read-only drift check against the live
//! environment and a destroy path honoring the protection invariant.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::descriptor::{Descriptor, PropertyValue, SpecHasher};
use crate::error::{ProviderError, Result};
use crate::graph::ResourceGraph;
use crate::planner::{resolve_properties, ApplyReport, DiffEngine, Plan, PlanExecutor};
use crate::provider::{Provider, RetryPolicy};
use crate::state::{EngineState, RunHistoryEntry, RunOperation, StateStore};

/// Reconciliation engine for one descriptor against one state store.
pub struct Engine<'a, S: StateStore> {
    /// Desired state.
    descriptor: &'a Descriptor,
    /// State store.
    store: &'a S,
    /// Provider performing physical operations.
    provider: Arc<dyn Provider>,
    /// Descriptor hasher.
    hasher: SpecHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Worker pool bound for the executor.
    parallelism: usize,
    /// Retry policy for provider calls.
    retry: RetryPolicy,
    /// Cancellation flag shared with the executor.
    cancel: Arc<AtomicBool>,
}

/// Result of a full reconciliation run.
#[derive(Debug)]
pub struct RunReport {
    /// Per-step execution report.
    pub apply: ApplyReport,
    /// Resolved exports after the run.
    pub exports: BTreeMap<String, String>,
}

/// Report of a drift check.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Resources whose live properties differ from the recorded snapshot.
    pub drifted: Vec<ResourceDrift>,
    /// Declared resources with no record yet.
    pub unmanaged: Vec<String>,
    /// Recorded resources absent from the descriptor.
    pub orphaned: Vec<String>,
    /// Number of records checked.
    pub checked: usize,
}

/// Drift found on a single resource.
#[derive(Debug, serde::Serialize)]
pub struct ResourceDrift {
    /// Logical name.
    pub name: String,
    /// Drifted field names; empty if the physical resource is gone.
    pub fields: Vec<String>,
    /// True if the physical resource no longer exists.
    pub missing: bool,
}

/// Result of destroying managed resources.
#[derive(Debug)]
pub struct DestroyReport {
    /// Resources deleted, in deletion order.
    pub deleted: Vec<String>,
    /// Protected resources that were left untouched.
    pub skipped_protected: Vec<String>,
    /// Resources whose deletion failed, with the error message.
    pub failed: Vec<(String, String)>,
}

impl<'a, S: StateStore> Engine<'a, S> {
    /// Creates a new engine.
    #[must_use]
    pub fn new(descriptor: &'a Descriptor, store: &'a S, provider: Arc<dyn Provider>) -> Self {
        Self {
            descriptor,
            store,
            provider,
            hasher: SpecHasher::new(),
            diff_engine: DiffEngine::new(),
            parallelism: 4,
            retry: RetryPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Overrides the executor's worker pool bound.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Installs a cancellation flag checked between steps.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Computes the plan for the current descriptor and recorded state.
    ///
    /// # Errors
    ///
    /// Fails on reference cycles, unknown references, state store errors,
    /// or a required destructive action on a protected resource.
    pub async fn plan(&self) -> Result<Plan> {
        info!(
            "Planning {}/{}",
            self.descriptor.project.name, self.descriptor.project.environment
        );

        let graph = ResourceGraph::build(&self.descriptor.resources)?;
        let state = self.store.load().await?;
        let diff = self
            .diff_engine
            .compute(self.descriptor, &graph, state.as_ref());

        info!(
            "Diff: {} create, {} import, {} update, {} replace, {} delete, {} unchanged",
            diff.creates, diff.imports, diff.updates, diff.replaces, diff.deletes, diff.unchanged
        );

        let descriptor_hash = self.hasher.hash_descriptor(self.descriptor);
        Plan::from_diff(&diff, self.descriptor, &graph, &descriptor_hash)
    }

    /// Applies a plan and persists the resulting state and exports.
    ///
    /// Successful partial progress is persisted even when other steps
    /// fail; the report carries every step's outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only for run-fatal conditions (state store I/O);
    /// step failures are reported in the [`RunReport`].
    pub async fn apply(&self, plan: &Plan) -> Result<RunReport> {
        let mut state = self.store.load().await?.unwrap_or_else(|| {
            EngineState::new(
                &self.descriptor.project.name,
                &self.descriptor.project.environment,
            )
        });

        let executor = PlanExecutor::new(Arc::clone(&self.provider))
            .with_parallelism(self.parallelism)
            .with_retry_policy(self.retry.clone())
            .with_cancel_flag(Arc::clone(&self.cancel));

        let report = executor.apply(plan, &mut state, self.store).await?;

        let exports = self.resolve_exports(&state);
        state.exports.clone_from(&exports);
        state.descriptor_hash.clone_from(&plan.descriptor_hash);

        let touched: Vec<String> = report
            .results
            .iter()
            .filter(|r| r.status != crate::planner::StepStatus::NoOp)
            .map(|r| r.name.clone())
            .collect();
        let entry = if report.success {
            RunHistoryEntry::new(RunOperation::Apply, &plan.descriptor_hash, touched)
        } else {
            RunHistoryEntry::failed(
                RunOperation::Apply,
                &plan.descriptor_hash,
                touched,
                &report.to_string(),
            )
        };
        state.add_history(entry);

        self.store.save(&state).await?;

        Ok(RunReport {
            apply: report,
            exports,
        })
    }

    /// Resolves the descriptor's exports against recorded outputs.
    ///
    /// Exports referencing resources that did not reach `Ready` are
    /// omitted with a warning rather than failing the run.
    fn resolve_exports(&self, state: &EngineState) -> BTreeMap<String, String> {
        let mut exports = BTreeMap::new();

        let (resolved, unresolved) =
            resolve_properties(&self.descriptor.exports, Some(state));
        for reference in &unresolved {
            warn!("Export references unresolved output {}", reference.expression());
        }

        for (name, value) in resolved {
            if value.contains_reference() {
                continue;
            }
            exports.insert(name, value.render());
        }

        exports
    }

    /// Checks for drift between recorded snapshots and the live
    /// environment, without applying anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store or a provider read fails
    /// non-transiently (missing resources are drift, not errors).
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!(
            "Checking drift for {}/{}",
            self.descriptor.project.name, self.descriptor.project.environment
        );

        let state = self.store.load().await?;
        let mut drifted = Vec::new();
        let mut checked = 0usize;

        if let Some(state) = &state {
            for name in state.record_names() {
                let Some(record) = state.get_record(name) else {
                    continue;
                };
                if !record.is_ready() {
                    continue;
                }
                checked += 1;

                let observed = self
                    .retry
                    .run(&format!("read '{name}'"), || {
                        self.provider.read(record.kind, &record.physical_id)
                    })
                    .await;

                match observed {
                    Ok(live) => {
                        let fields = drifted_fields(&record.last_applied, &live.properties);
                        if !fields.is_empty() {
                            debug!("Resource {name} drifted: {fields:?}");
                            drifted.push(ResourceDrift {
                                name: name.to_string(),
                                fields,
                                missing: false,
                            });
                        }
                    }
                    Err(ProviderError::NotFound { .. }) => {
                        debug!("Resource {name} is gone from the environment");
                        drifted.push(ResourceDrift {
                            name: name.to_string(),
                            fields: vec![],
                            missing: true,
                        });
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let unmanaged = self
            .descriptor
            .resources
            .iter()
            .filter(|r| {
                state
                    .as_ref()
                    .is_none_or(|s| s.get_record(&r.name).is_none())
            })
            .map(|r| r.name.clone())
            .collect();

        let orphaned = state
            .as_ref()
            .map(|s| {
                s.record_names()
                    .into_iter()
                    .filter(|name| self.descriptor.get(name).is_none())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(DriftReport {
            drifted,
            unmanaged,
            orphaned,
            checked,
        })
    }

    /// Deletes every managed resource except protected ones, which are
    /// reported and left untouched. Progress is persisted per deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store fails; per-resource provider
    /// failures are collected in the report.
    pub async fn destroy(&self) -> Result<DestroyReport> {
        let Some(mut state) = self.store.load().await? else {
            return Ok(DestroyReport {
                deleted: vec![],
                skipped_protected: vec![],
                failed: vec![],
            });
        };

        let mut report = DestroyReport {
            deleted: vec![],
            skipped_protected: vec![],
            failed: vec![],
        };

        // Dependents first: reverse topological order for declared
        // resources, then whatever remains recorded.
        let mut order: Vec<String> = Vec::new();
        if let Ok(graph) = ResourceGraph::build(&self.descriptor.resources) {
            order.extend(graph.topo_order().iter().rev().cloned());
        }
        for name in state.record_names() {
            if !order.iter().any(|n| n == name) {
                order.push(name.to_string());
            }
        }

        for name in order {
            let Some(record) = state.get_record(&name) else {
                continue;
            };

            if record.protect {
                info!("Skipping protected resource '{name}'");
                report.skipped_protected.push(name);
                continue;
            }

            let kind = record.kind;
            let physical_id = record.physical_id.clone();
            let outcome = self
                .retry
                .run(&format!("delete '{name}'"), || {
                    self.provider.delete(kind, &physical_id)
                })
                .await;

            match outcome {
                Ok(()) | Err(ProviderError::NotFound { .. }) => {
                    state.remove_record(&name);
                    self.store.save(&state).await?;
                    info!("Deleted '{name}' ({physical_id})");
                    report.deleted.push(name);
                }
                Err(err) => {
                    warn!("Failed to delete '{name}': {err}");
                    report.failed.push((name, err.to_string()));
                }
            }
        }

        let descriptor_hash = self.hasher.hash_descriptor(self.descriptor);
        state.add_history(RunHistoryEntry::new(
            RunOperation::Destroy,
            &descriptor_hash,
            report.deleted.clone(),
        ));
        state.exports.clear();
        self.store.save(&state).await?;

        Ok(report)
    }
}

/// Returns the fields whose recorded snapshot differs from the live bag.
///
/// Only fields the engine applied are compared; provider-side extras are
/// not drift.
fn drifted_fields(
    recorded: &BTreeMap<String, PropertyValue>,
    live: &BTreeMap<String, PropertyValue>,
) -> Vec<String> {
    recorded
        .iter()
        .filter(|(field, value)| live.get(*field) != Some(value))
        .map(|(field, _)| field.clone())
        .collect()
}

impl DriftReport {
    /// Returns true if nothing drifted and nothing is unmanaged/orphaned.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.drifted.is_empty() && self.unmanaged.is_empty() && self.orphaned.is_empty()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            return write!(f, "No drift detected - state is converged");
        }

        if !self.drifted.is_empty() {
            writeln!(f, "Drifted resources:")?;
            for drift in &self.drifted {
                if drift.missing {
                    writeln!(f, "  - {} (missing from environment)", drift.name)?;
                } else {
                    writeln!(f, "  - {} ({})", drift.name, drift.fields.join(", "))?;
                }
            }
        }
        if !self.unmanaged.is_empty() {
            writeln!(f, "Declared but not yet managed:")?;
            for name in &self.unmanaged {
                writeln!(f, "  - {name}")?;
            }
        }
        if !self.orphaned.is_empty() {
            writeln!(f, "Recorded but no longer declared:")?;
            for name in &self.orphaned {
                writeln!(f, "  - {name}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apply)?;
        if !self.exports.is_empty() {
            writeln!(f, "\nOutputs:")?;
            for (name, value) in &self.exports {
                writeln!(f, "  {name} = {value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorParser;
    use crate::provider::{CreatedResource, MockProvider, ObservedResource, ProviderOutputs};
    use crate::state::LocalStateStore;
    use tempfile::TempDir;

    const TWO_TIER: &str = r"
project:
  name: voting-app
  environment: prod
resources:
  - name: cluster
    kind: cluster
    properties:
      name: voting-app-cluster
  - name: frontend-service
    kind: service
    properties:
      name: voting-app-frontend
      cluster_arn: ${cluster.arn}
exports:
  cluster_arn: ${cluster.arn}
";

    fn descriptor(yaml: &str) -> Descriptor {
        DescriptorParser::new().parse_yaml(yaml, None).unwrap()
    }

    fn test_store() -> (LocalStateStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        (store, dir)
    }

    fn creating_provider() -> MockProvider {
        let mut mock = MockProvider::new();
        mock.expect_create().returning(|_kind, name, _props| {
            let mut outputs = ProviderOutputs::new();
            if name == "cluster" {
                outputs.insert(String::from("arn"), String::from("arn:cluster:c-1"));
            }
            Ok(CreatedResource {
                physical_id: format!("id-{name}"),
                outputs,
            })
        });
        mock
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let desc = descriptor(TWO_TIER);
        let (store, _dir) = test_store();

        // First run creates everything.
        {
            let provider: Arc<dyn Provider> = Arc::new(creating_provider());
            let engine = Engine::new(&desc, &store, provider);
            let plan = engine.plan().await.unwrap();
            assert_eq!(plan.step_count(), 2);
            let report = engine.apply(&plan).await.unwrap();
            assert!(report.apply.success);
        }

        // Second run over the persisted state is all no-op.
        {
            let provider: Arc<dyn Provider> = Arc::new(MockProvider::new());
            let engine = Engine::new(&desc, &store, provider);
            let plan = engine.plan().await.unwrap();
            assert!(plan.is_converged());
            let report = engine.apply(&plan).await.unwrap();
            assert!(report.apply.success);
            assert_eq!(report.apply.noop, 2);
        }
    }

    #[tokio::test]
    async fn test_exports_resolved_and_persisted() {
        let desc = descriptor(TWO_TIER);
        let (store, _dir) = test_store();

        let provider: Arc<dyn Provider> = Arc::new(creating_provider());
        let engine = Engine::new(&desc, &store, provider);
        let plan = engine.plan().await.unwrap();
        let report = engine.apply(&plan).await.unwrap();

        assert_eq!(
            report.exports.get("cluster_arn").map(String::as_str),
            Some("arn:cluster:c-1")
        );

        let state = store.load().await.unwrap().unwrap();
        assert_eq!(
            state.exports.get("cluster_arn").map(String::as_str),
            Some("arn:cluster:c-1")
        );
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].success);
    }

    #[tokio::test]
    async fn test_drift_reports_changed_fields_and_missing_resources() {
        let desc = descriptor(TWO_TIER);
        let (store, _dir) = test_store();

        {
            let provider: Arc<dyn Provider> = Arc::new(creating_provider());
            let engine = Engine::new(&desc, &store, provider);
            let plan = engine.plan().await.unwrap();
            engine.apply(&plan).await.unwrap();
        }

        let mut mock = MockProvider::new();
        mock.expect_read().returning(|kind, _physical_id| {
            if kind == crate::descriptor::ResourceKind::Cluster {
                // Someone renamed the cluster out-of-band.
                Ok(ObservedResource {
                    properties: serde_yaml::from_str("name: renamed-by-hand\n").unwrap(),
                    outputs: ProviderOutputs::new(),
                })
            } else {
                Err(ProviderError::NotFound {
                    physical_id: String::from("id-frontend-service"),
                })
            }
        });

        let provider: Arc<dyn Provider> = Arc::new(mock);
        let engine = Engine::new(&desc, &store, provider);
        let drift = engine.check_drift().await.unwrap();

        assert!(!drift.is_converged());
        assert_eq!(drift.checked, 2);
        let cluster = drift.drifted.iter().find(|d| d.name == "cluster").unwrap();
        assert_eq!(cluster.fields, vec![String::from("name")]);
        let service = drift
            .drifted
            .iter()
            .find(|d| d.name == "frontend-service")
            .unwrap();
        assert!(service.missing);
    }

    #[tokio::test]
    async fn test_destroy_skips_protected_records() {
        let desc = descriptor(TWO_TIER);
        let (store, _dir) = test_store();

        {
            let provider: Arc<dyn Provider> = Arc::new(creating_provider());
            let engine = Engine::new(&desc, &store, provider);
            let plan = engine.plan().await.unwrap();
            engine.apply(&plan).await.unwrap();
        }

        // Protect the cluster record out-of-band.
        {
            let mut state = store.load().await.unwrap().unwrap();
            state.get_record_mut("cluster").unwrap().protect = true;
            store.save(&state).await.unwrap();
        }

        let mut mock = MockProvider::new();
        mock.expect_delete().times(1).returning(|_kind, physical_id| {
            assert_eq!(physical_id, "id-frontend-service");
            Ok(())
        });

        let provider: Arc<dyn Provider> = Arc::new(mock);
        let engine = Engine::new(&desc, &store, provider);
        let report = engine.destroy().await.unwrap();

        assert_eq!(report.deleted, vec![String::from("frontend-service")]);
        assert_eq!(report.skipped_protected, vec![String::from("cluster")]);
        assert!(report.failed.is_empty());

        let state = store.load().await.unwrap().unwrap();
        assert!(state.get_record("cluster").is_some());
        assert!(state.get_record("frontend-service").is_none());
    }
}
