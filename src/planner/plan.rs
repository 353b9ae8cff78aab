//! Plan types and construction.
//!
//! This module turns a diff into an executable plan: an ordered list of
//! steps, one per resource, with explicit dependency edges and the
//! protection invariant enforced up front.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::descriptor::{Descriptor, PropertyValue, ResourceKind};
use crate::error::{GroundworkError, PlanError, Result};
use crate::graph::ResourceGraph;

use super::diff::{DiffDetail, DiffResult, DiffType};

/// A complete plan for one reconciliation run.
#[derive(Debug)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Descriptor hash this plan is based on.
    pub descriptor_hash: String,
    /// Planned steps in emission order. Step indices are stable and used
    /// as dependency handles.
    pub steps: Vec<PlanStep>,
}

/// A single planned step.
#[derive(Debug, Clone)]
pub struct PlanStep {
    /// Step index within the plan.
    pub index: usize,
    /// Action to perform.
    pub action: StepAction,
    /// Logical resource name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Protect flag at planning time.
    pub protect: bool,
    /// Physical id to adopt (Import only).
    pub import_id: Option<String>,
    /// Desired properties, unresolved; the executor substitutes references
    /// once dependencies are terminal.
    pub desired: BTreeMap<String, PropertyValue>,
    /// Field-level diff (Update/Replace), or the full bag (Create).
    pub details: Vec<DiffDetail>,
    /// Indices of steps that must reach a terminal status first.
    pub depends_on: Vec<usize>,
    /// Reason for this step.
    pub reason: String,
}

/// Actions a step can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Create a new physical resource.
    Create,
    /// Adopt an existing physical resource without creating it.
    Import,
    /// Update the physical resource in place.
    Update,
    /// Delete and recreate the physical resource.
    Replace,
    /// Nothing to do.
    NoOp,
    /// Delete the physical resource.
    Delete,
}

impl Plan {
    /// Builds a plan from a diff result.
    ///
    /// Steps are emitted in an order consistent with the reference graph:
    /// orphan deletions first (they have no edges in the desired set),
    /// then every declared resource in topological order, each step
    /// depending on the steps of the resources it references.
    ///
    /// # Errors
    ///
    /// Fails fast with [`PlanError::ProtectedResource`] if the diff
    /// requires a replace or delete on a protected resource; the planner
    /// never silently downgrades a destructive action.
    pub fn from_diff(
        diff: &DiffResult,
        descriptor: &Descriptor,
        graph: &ResourceGraph,
        descriptor_hash: &str,
    ) -> Result<Self> {
        // Protection invariant, first enforcement layer.
        for resource_diff in &diff.diffs {
            let action = match resource_diff.diff_type {
                DiffType::Replace => "replace",
                DiffType::Delete => "delete",
                _ => continue,
            };
            if resource_diff.protect {
                return Err(GroundworkError::Plan(PlanError::ProtectedResource {
                    name: resource_diff.name.clone(),
                    action: action.to_string(),
                }));
            }
        }

        let mut steps = Vec::new();

        // Orphan deletions carry no reference edges in the desired set and
        // are mutually independent.
        for resource_diff in &diff.diffs {
            if resource_diff.diff_type != DiffType::Delete {
                continue;
            }
            steps.push(PlanStep {
                index: steps.len(),
                action: StepAction::Delete,
                name: resource_diff.name.clone(),
                kind: resource_diff.kind,
                protect: resource_diff.protect,
                import_id: None,
                desired: BTreeMap::new(),
                details: resource_diff.details.clone(),
                depends_on: vec![],
                reason: String::from("Resource removed from descriptor"),
            });
        }

        // Declared resources, already in topological order in the diff.
        let mut index_by_name: HashMap<&str, usize> = HashMap::new();
        for resource_diff in &diff.diffs {
            let action = match resource_diff.diff_type {
                DiffType::Create => StepAction::Create,
                DiffType::Import => StepAction::Import,
                DiffType::Update => StepAction::Update,
                DiffType::Replace => StepAction::Replace,
                DiffType::NoChange => StepAction::NoOp,
                DiffType::Delete => continue,
            };

            let desired = descriptor
                .get(&resource_diff.name)
                .map(|spec| spec.properties.clone())
                .unwrap_or_default();

            let mut depends_on = Vec::new();
            for dependency in graph.dependencies_of(&resource_diff.name) {
                let Some(dep_index) = index_by_name.get(dependency) else {
                    return Err(GroundworkError::Plan(PlanError::MissingDependency {
                        name: resource_diff.name.clone(),
                        dependency: dependency.to_string(),
                    }));
                };
                depends_on.push(*dep_index);
            }

            let index = steps.len();
            index_by_name.insert(resource_diff.name.as_str(), index);

            steps.push(PlanStep {
                index,
                action,
                name: resource_diff.name.clone(),
                kind: resource_diff.kind,
                protect: resource_diff.protect,
                import_id: resource_diff.import_id.clone(),
                desired,
                details: resource_diff.details.clone(),
                depends_on,
                reason: reason_for(action, resource_diff),
            });
        }

        Ok(Self {
            created_at: Utc::now(),
            descriptor_hash: descriptor_hash.to_string(),
            steps,
        })
    }

    /// Returns true if the plan requires no provider calls.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.steps.iter().all(|s| s.action == StepAction::NoOp)
    }

    /// Returns the number of steps.
    #[must_use]
    pub const fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Returns the number of steps with the given action.
    #[must_use]
    pub fn count(&self, action: StepAction) -> usize {
        self.steps.iter().filter(|s| s.action == action).count()
    }

    /// Returns steps that can start immediately (no dependencies).
    #[must_use]
    pub fn ready_steps(&self) -> Vec<&PlanStep> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .collect()
    }

    /// Returns the steps that depend on a given step index.
    #[must_use]
    pub fn dependents_of(&self, index: usize) -> Vec<&PlanStep> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.contains(&index))
            .collect()
    }
}

fn reason_for(action: StepAction, diff: &super::diff::ResourceDiff) -> String {
    match action {
        StepAction::Create => String::from("Resource declared in descriptor"),
        StepAction::Import => format!(
            "Adopting existing resource {}",
            diff.import_id.as_deref().unwrap_or("?")
        ),
        StepAction::Update | StepAction::Replace => {
            let fields: Vec<&str> = diff.details.iter().map(|d| d.field.as_str()).collect();
            format!("Changed: {}", fields.join(", "))
        }
        StepAction::NoOp => String::from("Up to date"),
        StepAction::Delete => String::from("Resource removed from descriptor"),
    }
}

impl PlanStep {
    /// Returns a human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            StepAction::Create => format!("Create {} '{}'", self.kind, self.name),
            StepAction::Import => format!(
                "Import {} '{}' from {}",
                self.kind,
                self.name,
                self.import_id.as_deref().unwrap_or("?")
            ),
            StepAction::Update => format!("Update {} '{}'", self.kind, self.name),
            StepAction::Replace => format!("Replace {} '{}'", self.kind, self.name),
            StepAction::NoOp => format!("No change for {} '{}'", self.kind, self.name),
            StepAction::Delete => format!("Delete {} '{}'", self.kind, self.name),
        }
    }
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Import => "import",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::NoOp => "noop",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.name)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} steps):", self.steps.len())?;
        for step in &self.steps {
            writeln!(f, "  {}. {step}", step.index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorParser, SpecHasher};
    use crate::planner::diff::DiffEngine;
    use crate::state::{EngineState, PhysicalRecord, RecordStatus};

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

    fn plan_for(yaml: &str, state: Option<&EngineState>) -> Result<Plan> {
        let descriptor = DescriptorParser::new().parse_yaml(yaml, None).unwrap();
        let graph = ResourceGraph::build(&descriptor.resources).unwrap();
        let diff = DiffEngine::new().compute(&descriptor, &graph, state);
        let hash = SpecHasher::new().hash_descriptor(&descriptor);
        Plan::from_diff(&diff, &descriptor, &graph, &hash)
    }

    #[test]
    fn test_one_step_per_resource() {
        let plan = plan_for(THREE_TIER, None).unwrap();

        assert_eq!(plan.step_count(), 3);
        assert_eq!(plan.count(StepAction::Create), 3);

        let mut names: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["cluster", "frontend-service", "task-role"]);
    }

    #[test]
    fn test_step_dependencies_follow_references() {
        let plan = plan_for(THREE_TIER, None).unwrap();

        let service = plan
            .steps
            .iter()
            .find(|s| s.name == "frontend-service")
            .unwrap();
        let cluster = plan.steps.iter().find(|s| s.name == "cluster").unwrap();
        let role = plan.steps.iter().find(|s| s.name == "task-role").unwrap();

        assert_eq!(service.depends_on, vec![cluster.index]);
        assert!(cluster.depends_on.is_empty());
        assert!(role.depends_on.is_empty());
        // A step never precedes a step it references.
        assert!(cluster.index < service.index);
    }

    #[test]
    fn test_protected_replace_fails_fast() {
        let mut state = EngineState::new("p", "dev");
        let mut record = PhysicalRecord::new("cluster", crate::descriptor::ResourceKind::Cluster, "c-1");
        record.last_applied = serde_yaml::from_str("name: old-name\n").unwrap();
        record.protect = true;
        record.set_status(RecordStatus::Ready);
        state.set_record(record);

        let result = plan_for(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    protect: true
    properties:
      name: new-name
",
            Some(&state),
        );

        match result.unwrap_err() {
            GroundworkError::Plan(PlanError::ProtectedResource { name, action }) => {
                assert_eq!(name, "cluster");
                assert_eq!(action, "replace");
            }
            other => panic!("expected protected-resource error, got {other}"),
        }
    }

    #[test]
    fn test_protected_delete_fails_fast() {
        let mut state = EngineState::new("p", "dev");
        let mut record = PhysicalRecord::new("orphan", crate::descriptor::ResourceKind::Service, "s-1");
        record.protect = true;
        record.set_status(RecordStatus::Ready);
        state.set_record(record);

        let result = plan_for("project:\n  name: p\nresources: []\n", Some(&state));

        match result.unwrap_err() {
            GroundworkError::Plan(PlanError::ProtectedResource { name, action }) => {
                assert_eq!(name, "orphan");
                assert_eq!(action, "delete");
            }
            other => panic!("expected protected-resource error, got {other}"),
        }
    }

    #[test]
    fn test_orphan_deletes_come_first() {
        let mut state = EngineState::new("p", "dev");
        let mut record = PhysicalRecord::new("orphan", crate::descriptor::ResourceKind::LogGroup, "lg-1");
        record.set_status(RecordStatus::Ready);
        state.set_record(record);

        let plan = plan_for(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    properties:
      name: c
",
            Some(&state),
        )
        .unwrap();

        assert_eq!(plan.steps[0].action, StepAction::Delete);
        assert_eq!(plan.steps[0].name, "orphan");
        assert_eq!(plan.steps[1].action, StepAction::Create);
    }

    #[test]
    fn test_import_step_carries_physical_id() {
        let plan = plan_for(
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
            None,
        )
        .unwrap();

        assert_eq!(plan.count(StepAction::Import), 1);
        assert_eq!(plan.steps[0].import_id.as_deref(), Some("cluster-b3a046f"));
    }

    #[test]
    fn test_converged_plan() {
        let mut state = EngineState::new("p", "dev");
        let mut record = PhysicalRecord::new("cluster", crate::descriptor::ResourceKind::Cluster, "c-1");
        record.last_applied = serde_yaml::from_str("name: c\n").unwrap();
        record.set_status(RecordStatus::Ready);
        state.set_record(record);

        let plan = plan_for(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    properties:
      name: c
",
            Some(&state),
        )
        .unwrap();

        assert!(plan.is_converged());
        assert_eq!(plan.count(StepAction::NoOp), 1);
    }
}
