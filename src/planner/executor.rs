//! Plan executor.
//!
//! Runs a plan under a bounded worker pool: independent steps execute
//! concurrently, dependent steps wait for their prerequisites' results,
//! transient provider failures retry with backoff, and a failed step
//! blocks its dependency sub-graph without stopping independent branches.
//! The scheduler loop is the single writer of the engine state and
//! persists it after every terminal step.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::descriptor::{PropertyValue, ResourceKind, SpecHasher};
use crate::error::{ApplyError, GroundworkError, PlanError, ProviderError, Result};
use crate::provider::{Provider, ProviderOutputs, RetryPolicy};
use crate::state::{EngineState, PhysicalRecord, RecordStatus, StateStore};

use super::diff::resolve_properties;
use super::plan::{Plan, PlanStep, StepAction};

/// Default number of steps allowed in flight at once.
const DEFAULT_PARALLELISM: usize = 4;

/// Executor for plans.
pub struct PlanExecutor {
    /// Provider performing the physical operations.
    provider: Arc<dyn Provider>,
    /// Retry policy for transient provider failures.
    retry: RetryPolicy,
    /// Worker pool bound.
    parallelism: usize,
    /// Cooperative cancellation flag, checked between steps.
    cancel: Arc<AtomicBool>,
}

/// Terminal status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The step's provider calls completed and the record was persisted.
    Succeeded,
    /// Nothing to do; the resource was already converged.
    NoOp,
    /// The step failed and its record (if any) was marked failed.
    Failed,
    /// A dependency failed, so the step was never attempted.
    Blocked,
    /// The run was cancelled before the step was attempted.
    Skipped,
}

/// Result of executing a single step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Step index within the plan.
    pub index: usize,
    /// Logical resource name.
    pub name: String,
    /// Action the step carried.
    pub action: StepAction,
    /// Terminal status.
    pub status: StepStatus,
    /// Physical identifier involved, when known.
    pub physical_id: Option<String>,
    /// Error message (Failed/Blocked/Skipped).
    pub error: Option<String>,
}

/// Result of executing an entire plan.
#[derive(Debug)]
pub struct ApplyReport {
    /// Per-step results, indexed like the plan.
    pub results: Vec<StepResult>,
    /// Number of succeeded steps.
    pub succeeded: usize,
    /// Number of no-op steps.
    pub noop: usize,
    /// Number of failed steps.
    pub failed: usize,
    /// Number of blocked steps.
    pub blocked: usize,
    /// Number of steps skipped due to cancellation.
    pub skipped: usize,
    /// True if the run was cancelled.
    pub cancelled: bool,
    /// True if every step succeeded or was a no-op.
    pub success: bool,
}

/// Owned inputs for one in-flight step task.
struct StepTask {
    index: usize,
    name: String,
    kind: ResourceKind,
    action: StepAction,
    physical_id: Option<String>,
    import_id: Option<String>,
    properties: BTreeMap<String, PropertyValue>,
}

/// What a successful step produced.
enum StepSuccess {
    Created {
        physical_id: String,
        outputs: ProviderOutputs,
    },
    Imported {
        physical_id: String,
        outputs: ProviderOutputs,
    },
    Updated {
        outputs: ProviderOutputs,
    },
    Replaced {
        physical_id: String,
        outputs: ProviderOutputs,
    },
    Deleted,
    Noop,
}

/// Message sent back from a step task to the scheduler.
struct StepOutcome {
    index: usize,
    result: std::result::Result<StepSuccess, String>,
}

impl PlanExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the worker pool bound (minimum 1).
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Installs a cancellation flag checked between steps. In-flight
    /// provider calls are allowed to finish and are recorded before the
    /// run reports cancelled.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Applies a plan, mutating `state` and persisting it through `store`
    /// after every terminal step.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store fails to persist a record;
    /// step-level failures are reported in the [`ApplyReport`] instead.
    pub async fn apply(
        &self,
        plan: &Plan,
        state: &mut EngineState,
        store: &dyn StateStore,
    ) -> Result<ApplyReport> {
        let n = plan.steps.len();
        info!(
            "Applying plan: {n} steps, parallelism {}",
            self.parallelism
        );

        let mut results: Vec<Option<StepResult>> = (0..n).map(|_| None).collect();
        let mut remaining: Vec<usize> = plan.steps.iter().map(|s| s.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for step in &plan.steps {
            for &dep in &step.depends_on {
                dependents[dep].push(step.index);
            }
        }

        let mut ready: VecDeque<usize> = plan
            .steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.index)
            .collect();
        let mut resolved_props: HashMap<usize, BTreeMap<String, PropertyValue>> = HashMap::new();
        let mut tasks: JoinSet<StepOutcome> = JoinSet::new();
        let mut fatal: Option<GroundworkError> = None;

        loop {
            // Spawn as many ready steps as the pool allows. NoOps and
            // immediate refusals settle inline without a worker.
            while fatal.is_none()
                && !self.cancel.load(Ordering::SeqCst)
                && tasks.len() < self.parallelism
            {
                let Some(index) = ready.pop_front() else {
                    break;
                };
                let step = &plan.steps[index];

                if step.action == StepAction::NoOp {
                    debug!("Step {index} ({}) is a no-op", step.name);
                    // The stored record mirrors the last-applied protect
                    // flag even when nothing else changed.
                    if let Some(record) = state.get_record_mut(&step.name)
                        && record.protect != step.protect
                    {
                        record.protect = step.protect;
                        if let Err(save_err) = store.save(state).await {
                            fatal = Some(save_err);
                            break;
                        }
                    }
                    results[index] = Some(step_result(step, StepStatus::NoOp, None, None));
                    unlock_dependents(index, &dependents, &mut remaining, &results, &mut ready);
                    continue;
                }

                if let Some(refusal) = refuse_step(step, state) {
                    warn!("Step {index} ({}) refused: {refusal}", step.name);
                    results[index] =
                        Some(step_result(step, StepStatus::Failed, None, Some(refusal)));
                    block_dependents(index, &step.name, plan, &dependents, &mut results);
                    continue;
                }

                let (resolved, unresolved) = resolve_properties(&step.desired, Some(state));
                if step.action != StepAction::Delete && !unresolved.is_empty() {
                    let message = GroundworkError::Apply(ApplyError::UnresolvedReference {
                        resource: step.name.clone(),
                        reference: unresolved[0].expression(),
                    })
                    .to_string();
                    warn!("Step {index} ({}) failed: {message}", step.name);
                    results[index] =
                        Some(step_result(step, StepStatus::Failed, None, Some(message)));
                    block_dependents(index, &step.name, plan, &dependents, &mut results);
                    continue;
                }

                let physical_id = state.get_record(&step.name).map(|r| r.physical_id.clone());
                resolved_props.insert(index, resolved.clone());

                info!("Executing step {index}: {}", step.description());
                let task = StepTask {
                    index,
                    name: step.name.clone(),
                    kind: step.kind,
                    action: step.action,
                    physical_id,
                    import_id: step.import_id.clone(),
                    properties: resolved,
                };
                let provider = Arc::clone(&self.provider);
                let retry = self.retry.clone();
                tasks.spawn(async move { run_step(provider, retry, task).await });
            }

            if tasks.is_empty() {
                break;
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    fatal = Some(GroundworkError::internal(format!(
                        "step task panicked: {join_err}"
                    )));
                    continue;
                }
            };

            let index = outcome.index;
            let step = &plan.steps[index];

            match outcome.result {
                Ok(success) => {
                    let resolved = resolved_props.remove(&index).unwrap_or_default();
                    let physical_id = record_success(state, step, resolved, &success);

                    // Per-step persistence: an unrecorded physical change
                    // risks drift, so a store failure is fatal for the run.
                    if let Err(save_err) = store.save(state).await {
                        error!("Failed to persist state after step {index}: {save_err}");
                        fatal = Some(save_err);
                        results[index] =
                            Some(step_result(step, StepStatus::Succeeded, physical_id, None));
                        continue;
                    }

                    info!("Step {index} ({}) succeeded", step.name);
                    results[index] =
                        Some(step_result(step, StepStatus::Succeeded, physical_id, None));
                    unlock_dependents(index, &dependents, &mut remaining, &results, &mut ready);
                }
                Err(message) => {
                    error!("Step {index} ({}) failed: {message}", step.name);
                    if let Some(record) = state.get_record_mut(&step.name) {
                        record.set_status(RecordStatus::Failed);
                        if let Err(save_err) = store.save(state).await {
                            fatal = Some(save_err);
                        }
                    }
                    results[index] =
                        Some(step_result(step, StepStatus::Failed, None, Some(message)));
                    block_dependents(index, &step.name, plan, &dependents, &mut results);
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        let cancelled = self.cancel.load(Ordering::SeqCst);
        let final_results: Vec<StepResult> = results
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let step = &plan.steps[index];
                    if cancelled {
                        step_result(
                            step,
                            StepStatus::Skipped,
                            None,
                            Some(String::from("Skipped: run cancelled")),
                        )
                    } else {
                        step_result(
                            step,
                            StepStatus::Blocked,
                            None,
                            Some(String::from("Blocked: dependency did not complete")),
                        )
                    }
                })
            })
            .collect();

        let count = |status: StepStatus| {
            final_results.iter().filter(|r| r.status == status).count()
        };
        let report = ApplyReport {
            succeeded: count(StepStatus::Succeeded),
            noop: count(StepStatus::NoOp),
            failed: count(StepStatus::Failed),
            blocked: count(StepStatus::Blocked),
            skipped: count(StepStatus::Skipped),
            cancelled,
            success: final_results
                .iter()
                .all(|r| matches!(r.status, StepStatus::Succeeded | StepStatus::NoOp)),
            results: final_results,
        };

        info!("{report}");
        Ok(report)
    }

}

/// Second enforcement layer of the protection invariant, plus sanity
/// checks a malformed plan could violate. Returns a refusal message.
fn refuse_step(step: &PlanStep, state: &EngineState) -> Option<String> {
    let record = state.get_record(&step.name);

    if matches!(step.action, StepAction::Replace | StepAction::Delete)
        && record.is_some_and(|r| r.protect)
    {
        let action = step.action.to_string();
        return Some(
            GroundworkError::Plan(PlanError::ProtectedResource {
                name: step.name.clone(),
                action,
            })
            .to_string(),
        );
    }

    if matches!(
        step.action,
        StepAction::Update | StepAction::Replace | StepAction::Delete
    ) && record.is_none()
    {
        return Some(format!(
            "No recorded physical id for '{}'; cannot {}",
            step.name, step.action
        ));
    }

    if step.action == StepAction::Import && step.import_id.is_none() {
        return Some(format!(
            "Import step for '{}' carries no import_id",
            step.name
        ));
    }

    None
}

/// Builds a [`StepResult`] for a step.
fn step_result(
    step: &PlanStep,
    status: StepStatus,
    physical_id: Option<String>,
    error: Option<String>,
) -> StepResult {
    StepResult {
        index: step.index,
        name: step.name.clone(),
        action: step.action,
        status,
        physical_id,
        error,
    }
}

/// Marks every transitive dependent of a failed step as blocked.
fn block_dependents(
    from: usize,
    from_name: &str,
    plan: &Plan,
    dependents: &[Vec<usize>],
    results: &mut [Option<StepResult>],
) {
    let mut queue: VecDeque<usize> = dependents[from].iter().copied().collect();

    while let Some(index) = queue.pop_front() {
        if results[index].is_some() {
            continue;
        }
        let step = &plan.steps[index];
        warn!("Step {index} ({}) blocked by failed '{from_name}'", step.name);
        results[index] = Some(step_result(
            step,
            StepStatus::Blocked,
            None,
            Some(format!("Blocked by failed dependency '{from_name}'")),
        ));
        queue.extend(dependents[index].iter().copied());
    }
}

/// Decrements dependents' prerequisite counts and queues the ones that
/// became ready.
fn unlock_dependents(
    from: usize,
    dependents: &[Vec<usize>],
    remaining: &mut [usize],
    results: &[Option<StepResult>],
    ready: &mut VecDeque<usize>,
) {
    for &index in &dependents[from] {
        remaining[index] = remaining[index].saturating_sub(1);
        if remaining[index] == 0 && results[index].is_none() {
            ready.push_back(index);
        }
    }
}

/// Updates the in-memory state for a successful step and returns the
/// physical id involved, when any.
fn record_success(
    state: &mut EngineState,
    step: &PlanStep,
    resolved: BTreeMap<String, PropertyValue>,
    success: &StepSuccess,
) -> Option<String> {
    let hasher = SpecHasher::new();

    match success {
        StepSuccess::Created {
            physical_id,
            outputs,
        }
        | StepSuccess::Replaced {
            physical_id,
            outputs,
        } => {
            let mut record = PhysicalRecord::new(&step.name, step.kind, physical_id);
            record.properties_hash = hasher.hash_properties(&resolved);
            record.last_applied = resolved;
            record.outputs = outputs.clone();
            record.protect = step.protect;
            record.set_status(RecordStatus::Ready);
            state.set_record(record);
            Some(physical_id.clone())
        }
        StepSuccess::Imported {
            physical_id,
            outputs,
        } => {
            let mut record = PhysicalRecord::new(&step.name, step.kind, physical_id);
            record.properties_hash = hasher.hash_properties(&resolved);
            record.last_applied = resolved;
            record.outputs = outputs.clone();
            record.protect = step.protect;
            record.imported = true;
            record.set_status(RecordStatus::Ready);
            state.set_record(record);
            Some(physical_id.clone())
        }
        StepSuccess::Updated { outputs } => {
            if let Some(record) = state.get_record_mut(&step.name) {
                record.properties_hash = hasher.hash_properties(&resolved);
                record.last_applied = resolved;
                record.outputs = outputs.clone();
                record.protect = step.protect;
                record.set_status(RecordStatus::Ready);
                Some(record.physical_id.clone())
            } else {
                warn!("Updated '{}' has no record to refresh", step.name);
                None
            }
        }
        StepSuccess::Deleted => {
            let removed = state.remove_record(&step.name);
            removed.map(|r| r.physical_id)
        }
        StepSuccess::Noop => None,
    }
}

/// Runs one step's provider calls off the scheduler loop.
async fn run_step(
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    task: StepTask,
) -> StepOutcome {
    let result = execute_action(provider.as_ref(), &retry, &task)
        .await
        .map_err(|e| e.to_string());
    StepOutcome {
        index: task.index,
        result,
    }
}

async fn execute_action(
    provider: &dyn Provider,
    retry: &RetryPolicy,
    task: &StepTask,
) -> std::result::Result<StepSuccess, ProviderError> {
    let physical_id = task.physical_id.as_deref().unwrap_or_default();

    match task.action {
        StepAction::Create => {
            let created = retry
                .run(&format!("create '{}'", task.name), || {
                    provider.create(task.kind, &task.name, &task.properties)
                })
                .await?;
            Ok(StepSuccess::Created {
                physical_id: created.physical_id,
                outputs: created.outputs,
            })
        }
        StepAction::Import => {
            // Adoption accepts the physical resource as-is: one read for
            // its outputs, never a create.
            let import_id = task.import_id.as_deref().unwrap_or_default();
            let observed = retry
                .run(&format!("read '{}'", task.name), || {
                    provider.read(task.kind, import_id)
                })
                .await?;
            Ok(StepSuccess::Imported {
                physical_id: import_id.to_string(),
                outputs: observed.outputs,
            })
        }
        StepAction::Update => {
            let outputs = retry
                .run(&format!("update '{}'", task.name), || {
                    provider.update(task.kind, physical_id, &task.properties)
                })
                .await?;
            Ok(StepSuccess::Updated { outputs })
        }
        StepAction::Replace => {
            match retry
                .run(&format!("delete '{}'", task.name), || {
                    provider.delete(task.kind, physical_id)
                })
                .await
            {
                Ok(()) => {}
                Err(ProviderError::NotFound { .. }) => {
                    debug!("'{}' already gone before replacement", task.name);
                }
                Err(err) => return Err(err),
            }

            let created = retry
                .run(&format!("create '{}'", task.name), || {
                    provider.create(task.kind, &task.name, &task.properties)
                })
                .await?;
            Ok(StepSuccess::Replaced {
                physical_id: created.physical_id,
                outputs: created.outputs,
            })
        }
        StepAction::Delete => {
            match retry
                .run(&format!("delete '{}'", task.name), || {
                    provider.delete(task.kind, physical_id)
                })
                .await
            {
                Ok(()) => Ok(StepSuccess::Deleted),
                Err(ProviderError::NotFound { .. }) => {
                    debug!("'{}' was already deleted", task.name);
                    Ok(StepSuccess::Deleted)
                }
                Err(err) => Err(err),
            }
        }
        StepAction::NoOp => Ok(StepSuccess::Noop),
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::NoOp => "no-op",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Applied {} steps: {} succeeded, {} no-op, {} failed, {} blocked, {} skipped",
            self.results.len(),
            self.succeeded,
            self.noop,
            self.failed,
            self.blocked,
            self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Descriptor, DescriptorParser, SpecHasher};
    use crate::graph::ResourceGraph;
    use crate::planner::diff::DiffEngine;
    use crate::provider::{CreatedResource, MockProvider, ObservedResource};
    use crate::state::LocalStateStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const THREE_TIER: &str = r"
project:
  name: voting-app
resources:
  - name: task-role
    kind: role
    properties:
      name: voting-app-task-role
      assume_role_policy: ecs-tasks
  - name: cluster
    kind: cluster
    properties:
      name: voting-app-cluster
  - name: frontend-service
    kind: service
    properties:
      name: voting-app-frontend
      cluster_arn: ${cluster.arn}
";

    fn descriptor(yaml: &str) -> Descriptor {
        DescriptorParser::new().parse_yaml(yaml, None).unwrap()
    }

    fn plan_for(desc: &Descriptor, state: Option<&EngineState>) -> Plan {
        let graph = ResourceGraph::build(&desc.resources).unwrap();
        let diff = DiffEngine::new().compute(desc, &graph, state);
        let hash = SpecHasher::new().hash_descriptor(desc);
        Plan::from_diff(&diff, desc, &graph, &hash).unwrap()
    }

    fn test_store() -> (LocalStateStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        (store, dir)
    }

    fn outputs(pairs: &[(&str, &str)]) -> ProviderOutputs {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_in_dependency_order_and_resolve_references() {
        let desc = descriptor(THREE_TIER);
        let plan = plan_for(&desc, None);
        let (store, _dir) = test_store();
        let mut state = EngineState::new("voting-app", "dev");

        let created_order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let order_log = Arc::clone(&created_order);

        let mut mock = MockProvider::new();
        mock.expect_create().times(3).returning(move |_kind, name, props| {
            order_log.lock().unwrap().push(name.to_string());
            if name == "frontend-service" {
                // Reference must already be substituted with the
                // dependency's recorded output.
                assert_eq!(
                    props.get("cluster_arn").and_then(PropertyValue::as_str),
                    Some("arn:cluster:c-1")
                );
            }
            let outs = if name == "cluster" {
                outputs(&[("arn", "arn:cluster:c-1")])
            } else {
                ProviderOutputs::new()
            };
            Ok(CreatedResource {
                physical_id: format!("id-{name}"),
                outputs: outs,
            })
        });

        let executor = PlanExecutor::new(Arc::new(mock)).with_parallelism(2);
        let report = executor.apply(&plan, &mut state, &store).await.unwrap();

        assert!(report.success);
        assert_eq!(report.succeeded, 3);

        let order = created_order.lock().unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("cluster") < pos("frontend-service"));

        // Records are persisted and ready.
        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.get_record("frontend-service").unwrap().is_ready());
        assert_eq!(
            loaded.get_record("cluster").unwrap().output("arn"),
            Some("arn:cluster:c-1")
        );
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_subgraph_not_independent_branches() {
        let desc = descriptor(THREE_TIER);
        let plan = plan_for(&desc, None);
        let (store, _dir) = test_store();
        let mut state = EngineState::new("voting-app", "dev");

        let mut mock = MockProvider::new();
        mock.expect_create().returning(|_kind, name, _props| {
            if name == "cluster" {
                Err(ProviderError::failed("validation: bad cluster name"))
            } else {
                Ok(CreatedResource {
                    physical_id: format!("id-{name}"),
                    outputs: ProviderOutputs::new(),
                })
            }
        });

        let executor = PlanExecutor::new(Arc::new(mock));
        let report = executor.apply(&plan, &mut state, &store).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.failed, 1);
        assert_eq!(report.blocked, 1);
        assert_eq!(report.succeeded, 1);

        let by_name = |n: &str| report.results.iter().find(|r| r.name == n).unwrap();
        assert_eq!(by_name("cluster").status, StepStatus::Failed);
        assert_eq!(by_name("frontend-service").status, StepStatus::Blocked);
        assert_eq!(by_name("task-role").status, StepStatus::Succeeded);

        // The blocked step never touched the state store.
        assert!(state.get_record("frontend-service").is_none());
    }

    #[tokio::test]
    async fn test_import_adopts_without_create() {
        let desc = descriptor(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    import_id: cluster-b3a046f
    protect: true
    properties:
      name: voting-app-cluster
",
        );
        let plan = plan_for(&desc, None);
        let (store, _dir) = test_store();
        let mut state = EngineState::new("p", "dev");

        let mut mock = MockProvider::new();
        mock.expect_create().times(0);
        mock.expect_read()
            .times(1)
            .returning(|_kind, physical_id| {
                assert_eq!(physical_id, "cluster-b3a046f");
                Ok(ObservedResource {
                    properties: BTreeMap::new(),
                    outputs: outputs(&[("arn", "arn:cluster:b3a046f")]),
                })
            });

        let executor = PlanExecutor::new(Arc::new(mock));
        let report = executor.apply(&plan, &mut state, &store).await.unwrap();

        assert!(report.success);
        let record = state.get_record("cluster").unwrap();
        assert_eq!(record.physical_id, "cluster-b3a046f");
        assert!(record.imported);
        assert!(record.protect);
        assert_eq!(record.output("arn"), Some("arn:cluster:b3a046f"));
    }

    #[tokio::test]
    async fn test_executor_refuses_protected_delete_from_malformed_plan() {
        let (store, _dir) = test_store();
        let mut state = EngineState::new("p", "dev");
        let mut record = PhysicalRecord::new("cluster", ResourceKind::Cluster, "c-1");
        record.protect = true;
        record.set_status(RecordStatus::Ready);
        state.set_record(record);

        // Hand-built malformed plan: a delete for a protected record.
        let plan = Plan {
            created_at: chrono::Utc::now(),
            descriptor_hash: String::from("deadbeef"),
            steps: vec![PlanStep {
                index: 0,
                action: StepAction::Delete,
                name: String::from("cluster"),
                kind: ResourceKind::Cluster,
                protect: false,
                import_id: None,
                desired: BTreeMap::new(),
                details: vec![],
                depends_on: vec![],
                reason: String::from("malformed"),
            }],
        };

        let mut mock = MockProvider::new();
        mock.expect_delete().times(0);

        let executor = PlanExecutor::new(Arc::new(mock));
        let report = executor.apply(&plan, &mut state, &store).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.failed, 1);
        // The record is untouched.
        let record = state.get_record("cluster").unwrap();
        assert!(record.is_ready());
        assert_eq!(record.physical_id, "c-1");
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let desc = descriptor(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    properties:
      name: c
",
        );
        let plan = plan_for(&desc, None);
        let (store, _dir) = test_store();
        let mut state = EngineState::new("p", "dev");

        let attempts = Arc::new(Mutex::new(0u32));
        let attempts_in_mock = Arc::clone(&attempts);

        let mut mock = MockProvider::new();
        mock.expect_create().times(3).returning(move |_k, _n, _p| {
            let mut guard = attempts_in_mock.lock().unwrap();
            *guard += 1;
            if *guard < 3 {
                Err(ProviderError::transient("throttled"))
            } else {
                Ok(CreatedResource {
                    physical_id: String::from("c-1"),
                    outputs: ProviderOutputs::new(),
                })
            }
        });

        let retry = RetryPolicy::default()
            .with_max_attempts(3)
            .with_initial_delay(std::time::Duration::from_millis(1));
        let executor = PlanExecutor::new(Arc::new(mock)).with_retry_policy(retry);
        let report = executor.apply(&plan, &mut state, &store).await.unwrap();

        assert!(report.success);
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_noop_plan_makes_no_provider_calls() {
        let desc = descriptor(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    properties:
      name: c
",
        );

        let mut state = EngineState::new("p", "dev");
        let mut record = PhysicalRecord::new("cluster", ResourceKind::Cluster, "c-1");
        record.last_applied = serde_yaml::from_str("name: c\n").unwrap();
        record.set_status(RecordStatus::Ready);
        state.set_record(record);

        let plan = plan_for(&desc, Some(&state));
        assert!(plan.is_converged());

        let (store, _dir) = test_store();
        let mock = MockProvider::new(); // no expectations: any call panics

        let executor = PlanExecutor::new(Arc::new(mock));
        let report = executor.apply(&plan, &mut state, &store).await.unwrap();

        assert!(report.success);
        assert_eq!(report.noop, 1);
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test]
    async fn test_noop_syncs_protect_flag() {
        let desc = descriptor(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    protect: true
    properties:
      name: c
",
        );

        let mut state = EngineState::new("p", "dev");
        let mut record = PhysicalRecord::new("cluster", ResourceKind::Cluster, "c-1");
        record.last_applied = serde_yaml::from_str("name: c\n").unwrap();
        record.set_status(RecordStatus::Ready);
        state.set_record(record);

        let plan = plan_for(&desc, Some(&state));
        assert!(plan.is_converged());

        let (store, _dir) = test_store();
        let executor = PlanExecutor::new(Arc::new(MockProvider::new()));
        let report = executor.apply(&plan, &mut state, &store).await.unwrap();

        assert!(report.success);
        assert!(state.get_record("cluster").unwrap().protect);
        // The flag change was persisted despite the no-op.
        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.get_record("cluster").unwrap().protect);
    }

    #[tokio::test]
    async fn test_cancellation_skips_unstarted_steps() {
        let desc = descriptor(THREE_TIER);
        let plan = plan_for(&desc, None);
        let (store, _dir) = test_store();
        let mut state = EngineState::new("voting-app", "dev");

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_in_mock = Arc::clone(&cancel);

        let mut mock = MockProvider::new();
        mock.expect_create().returning(move |_kind, _name, _props| {
            // Cancel as soon as the first step runs; in-flight calls
            // finish, nothing new starts.
            cancel_in_mock.store(true, Ordering::SeqCst);
            Ok(CreatedResource {
                physical_id: String::from("id"),
                outputs: outputs(&[("arn", "arn:x")]),
            })
        });

        let executor = PlanExecutor::new(Arc::new(mock))
            .with_parallelism(1)
            .with_cancel_flag(cancel);
        let report = executor.apply(&plan, &mut state, &store).await.unwrap();

        assert!(report.cancelled);
        assert!(!report.success);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 2);
        // The completed step was still recorded.
        assert_eq!(store.load().await.unwrap().unwrap().records.len(), 1);
    }
}
