//! Diff engine for comparing desired vs recorded state.
//!
//! This module resolves references against recorded outputs and computes
//! the per-resource difference between the descriptor and the state
//! store's physical records.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::descriptor::{Descriptor, PropertyValue, Reference, ResourceKind, SpecHasher};
use crate::graph::ResourceGraph;
use crate::state::EngineState;

/// Engine for computing diffs between desired and recorded states.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Property snapshot hasher.
    hasher: SpecHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Field-level details about the difference.
    pub details: Vec<DiffDetail>,
    /// Desired properties with references substituted where the target is
    /// already ready; unresolved references remain in place.
    pub resolved: BTreeMap<String, PropertyValue>,
    /// Protect flag: desired for declared resources, stored for orphans.
    pub protect: bool,
    /// Adopt hint, when declared.
    pub import_id: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be adopted from an existing physical id.
    Import,
    /// Resource changed in fields that update in place.
    Update,
    /// Resource changed in fields that force recreation.
    Replace,
    /// Resource is unchanged.
    NoChange,
    /// Resource is recorded but absent from the descriptor.
    Delete,
}

/// Detail about a specific differing field.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Old value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
    /// True if a change to this field forces replacement.
    pub forces_replacement: bool,
}

/// Complete diff result, in plan emission order.
#[derive(Debug)]
pub struct DiffResult {
    /// Per-resource diffs: declared resources in topological order,
    /// followed by orphaned records.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to adopt.
    pub imports: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of orphaned records to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: SpecHasher::new(),
        }
    }

    /// Computes the diff between the descriptor and the recorded state.
    ///
    /// Declared resources are visited in the graph's topological order so
    /// the resulting diffs can be emitted as plan steps directly.
    #[must_use]
    pub fn compute(
        &self,
        descriptor: &Descriptor,
        graph: &ResourceGraph,
        state: Option<&EngineState>,
    ) -> DiffResult {
        let mut diffs = Vec::new();

        for name in graph.topo_order() {
            let Some(spec) = descriptor.get(name) else {
                continue;
            };

            let (resolved, _unresolved) = resolve_properties(&spec.properties, state);
            let record = state.and_then(|s| s.get_record(name));

            let diff = match record {
                None => {
                    if let Some(import_id) = &spec.import_id {
                        debug!("Resource {name} will be adopted from {import_id}");
                        ResourceDiff {
                            name: spec.name.clone(),
                            kind: spec.kind,
                            diff_type: DiffType::Import,
                            details: vec![DiffDetail {
                                field: String::from("physical_id"),
                                old_value: None,
                                new_value: Some(import_id.clone()),
                                forces_replacement: false,
                            }],
                            resolved,
                            protect: spec.protect,
                            import_id: Some(import_id.clone()),
                        }
                    } else {
                        debug!("Resource {name} needs to be created");
                        ResourceDiff {
                            name: spec.name.clone(),
                            kind: spec.kind,
                            diff_type: DiffType::Create,
                            details: field_diff(&BTreeMap::new(), &resolved, spec.kind),
                            resolved,
                            protect: spec.protect,
                            import_id: None,
                        }
                    }
                }
                Some(record) => {
                    let details = field_diff(&record.last_applied, &resolved, spec.kind);

                    if details.is_empty() {
                        debug!("Resource {name} is up to date");
                        ResourceDiff {
                            name: spec.name.clone(),
                            kind: spec.kind,
                            diff_type: DiffType::NoChange,
                            details,
                            resolved,
                            protect: spec.protect,
                            import_id: spec.import_id.clone(),
                        }
                    } else {
                        let diff_type = if details.iter().any(|d| d.forces_replacement) {
                            DiffType::Replace
                        } else {
                            DiffType::Update
                        };
                        debug!("Resource {name} needs {diff_type:?}");
                        ResourceDiff {
                            name: spec.name.clone(),
                            kind: spec.kind,
                            diff_type,
                            details,
                            resolved,
                            protect: spec.protect,
                            import_id: spec.import_id.clone(),
                        }
                    }
                }
            };

            diffs.push(diff);
        }

        // Records whose logical name is absent from the descriptor are
        // orphans and get deleted.
        if let Some(state) = state {
            for name in state.record_names() {
                if descriptor.get(name).is_some() {
                    continue;
                }
                let Some(record) = state.get_record(name) else {
                    continue;
                };
                debug!("Found orphaned record: {name}");
                diffs.push(ResourceDiff {
                    name: record.name.clone(),
                    kind: record.kind,
                    diff_type: DiffType::Delete,
                    details: vec![DiffDetail {
                        field: String::from("physical_id"),
                        old_value: Some(record.physical_id.clone()),
                        new_value: None,
                        forces_replacement: false,
                    }],
                    resolved: BTreeMap::new(),
                    protect: record.protect,
                    import_id: None,
                });
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();

        DiffResult {
            creates: count(DiffType::Create),
            imports: count(DiffType::Import),
            updates: count(DiffType::Update),
            replaces: count(DiffType::Replace),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        }
    }

    /// Computes the snapshot hash of a resolved property bag.
    #[must_use]
    pub fn snapshot_hash(&self, properties: &BTreeMap<String, PropertyValue>) -> String {
        self.hasher.hash_properties(properties)
    }
}

/// Substitutes references with the recorded outputs of their targets.
///
/// A reference whose target record is not ready, or has no such output,
/// is left in place and reported in the unresolved list; the executor
/// resolves it after the dependency's step result is known.
#[must_use]
pub fn resolve_properties(
    properties: &BTreeMap<String, PropertyValue>,
    state: Option<&EngineState>,
) -> (BTreeMap<String, PropertyValue>, Vec<Reference>) {
    let mut unresolved = Vec::new();
    let resolved = properties
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, state, &mut unresolved)))
        .collect();
    (resolved, unresolved)
}

fn resolve_value(
    value: &PropertyValue,
    state: Option<&EngineState>,
    unresolved: &mut Vec<Reference>,
) -> PropertyValue {
    match value {
        PropertyValue::Reference(reference) => {
            let output = state
                .and_then(|s| s.get_record(&reference.resource))
                .filter(|record| record.is_ready())
                .and_then(|record| record.output(&reference.output));

            output.map_or_else(
                || {
                    unresolved.push(reference.clone());
                    PropertyValue::Reference(reference.clone())
                },
                |v| PropertyValue::String(v.to_string()),
            )
        }
        PropertyValue::List(items) => PropertyValue::List(
            items
                .iter()
                .map(|item| resolve_value(item, state, unresolved))
                .collect(),
        ),
        PropertyValue::Map(map) => PropertyValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, state, unresolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Computes field-level differences between two property bags.
///
/// Unresolved references always compare unequal to a recorded literal, so
/// a dependency being created or replaced this run conservatively marks
/// its dependents changed.
fn field_diff(
    old: &BTreeMap<String, PropertyValue>,
    new: &BTreeMap<String, PropertyValue>,
    kind: ResourceKind,
) -> Vec<DiffDetail> {
    let mut details = Vec::new();
    let fields: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    for field in fields {
        let old_value = old.get(field.as_str());
        let new_value = new.get(field.as_str());

        if old_value == new_value {
            continue;
        }

        details.push(DiffDetail {
            field: field.to_string(),
            old_value: old_value.map(PropertyValue::render),
            new_value: new_value.map(PropertyValue::render),
            forces_replacement: kind.field_requires_replacement(field),
        });
    }

    details
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0
            || self.imports > 0
            || self.updates > 0
            || self.replaces > 0
            || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.imports + self.updates + self.replaces + self.deletes
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Import => "import",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::NoChange => "no change",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorParser;
    use crate::state::{PhysicalRecord, RecordStatus};

    const TWO_TIER: &str = r"
project:
  name: voting-app
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
      desired_count: 1
";

    fn descriptor(yaml: &str) -> Descriptor {
        DescriptorParser::new()
            .parse_yaml(yaml, None)
            .expect("test descriptor should parse")
    }

    fn ready_record(
        name: &str,
        kind: ResourceKind,
        physical_id: &str,
        last_applied: BTreeMap<String, PropertyValue>,
        outputs: &[(&str, &str)],
    ) -> PhysicalRecord {
        let mut record = PhysicalRecord::new(name, kind, physical_id);
        record.last_applied = last_applied;
        record.properties_hash = SpecHasher::new().hash_properties(&record.last_applied);
        for (k, v) in outputs {
            record.outputs.insert((*k).to_string(), (*v).to_string());
        }
        record.set_status(RecordStatus::Ready);
        record
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let desc = descriptor(TWO_TIER);
        let graph = ResourceGraph::build(&desc.resources).unwrap();

        let diff = DiffEngine::new().compute(&desc, &graph, None);

        assert_eq!(diff.creates, 2);
        assert_eq!(diff.total_changes(), 2);
        assert_eq!(diff.diffs.len(), 2);
        // Topological order: cluster before the service referencing it.
        assert_eq!(diff.diffs[0].name, "cluster");
        assert_eq!(diff.diffs[1].name, "frontend-service");
    }

    #[test]
    fn test_converged_state_is_all_noop() {
        let desc = descriptor(TWO_TIER);
        let graph = ResourceGraph::build(&desc.resources).unwrap();

        let mut state = EngineState::new("voting-app", "dev");
        let cluster_props = desc.get("cluster").unwrap().properties.clone();
        state.set_record(ready_record(
            "cluster",
            ResourceKind::Cluster,
            "c-1",
            cluster_props,
            &[("arn", "arn:cluster:c-1"), ("name", "voting-app-cluster")],
        ));

        // The service's recorded snapshot holds the resolved reference.
        let (service_resolved, unresolved) = resolve_properties(
            &desc.get("frontend-service").unwrap().properties,
            Some(&state),
        );
        assert!(unresolved.is_empty());
        state.set_record(ready_record(
            "frontend-service",
            ResourceKind::Service,
            "s-1",
            service_resolved,
            &[],
        ));

        let diff = DiffEngine::new().compute(&desc, &graph, Some(&state));
        assert!(!diff.has_changes());
        assert_eq!(diff.unchanged, 2);
    }

    #[test]
    fn test_update_vs_replace_classification() {
        let desc = descriptor(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    properties:
      name: renamed-cluster
      settings: new
",
        );
        let graph = ResourceGraph::build(&desc.resources).unwrap();

        let mut state = EngineState::new("p", "dev");
        let old: BTreeMap<String, PropertyValue> =
            serde_yaml::from_str("name: old-cluster\nsettings: old\n").unwrap();
        state.set_record(ready_record("cluster", ResourceKind::Cluster, "c-1", old, &[]));

        let diff = DiffEngine::new().compute(&desc, &graph, Some(&state));
        // "name" forces replacement for clusters.
        assert_eq!(diff.replaces, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Replace);
        assert!(diff.diffs[0]
            .details
            .iter()
            .any(|d| d.field == "name" && d.forces_replacement));
    }

    #[test]
    fn test_in_place_update() {
        let desc = descriptor(
            r"
project:
  name: p
resources:
  - name: logs
    kind: log-group
    properties:
      name: app-logs
      retention_days: 14
",
        );
        let graph = ResourceGraph::build(&desc.resources).unwrap();

        let mut state = EngineState::new("p", "dev");
        let old: BTreeMap<String, PropertyValue> =
            serde_yaml::from_str("name: app-logs\nretention_days: 7\n").unwrap();
        state.set_record(ready_record("logs", ResourceKind::LogGroup, "lg-1", old, &[]));

        let diff = DiffEngine::new().compute(&desc, &graph, Some(&state));
        assert_eq!(diff.updates, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Update);
        let detail = &diff.diffs[0].details[0];
        assert_eq!(detail.field, "retention_days");
        assert_eq!(detail.old_value.as_deref(), Some("7"));
        assert_eq!(detail.new_value.as_deref(), Some("14"));
    }

    #[test]
    fn test_import_hint_produces_import() {
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
        let graph = ResourceGraph::build(&desc.resources).unwrap();

        let diff = DiffEngine::new().compute(&desc, &graph, None);
        assert_eq!(diff.imports, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Import);
        assert_eq!(diff.diffs[0].import_id.as_deref(), Some("cluster-b3a046f"));
    }

    #[test]
    fn test_orphaned_record_is_deleted() {
        let desc = descriptor(
            r"
project:
  name: p
resources: []
",
        );
        let graph = ResourceGraph::build(&desc.resources).unwrap();

        let mut state = EngineState::new("p", "dev");
        state.set_record(ready_record(
            "old-service",
            ResourceKind::Service,
            "s-9",
            BTreeMap::new(),
            &[],
        ));

        let diff = DiffEngine::new().compute(&desc, &graph, Some(&state));
        assert_eq!(diff.deletes, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Delete);
        assert_eq!(diff.diffs[0].name, "old-service");
    }

    #[test]
    fn test_unresolved_reference_counts_as_change() {
        let desc = descriptor(TWO_TIER);
        let graph = ResourceGraph::build(&desc.resources).unwrap();

        // The service is recorded, but the cluster it references is brand
        // new this run, so the reference cannot resolve yet.
        let mut state = EngineState::new("p", "dev");
        let old: BTreeMap<String, PropertyValue> = serde_yaml::from_str(
            "name: voting-app-frontend\ncluster_arn: arn:cluster:old\ndesired_count: 1\n",
        )
        .unwrap();
        state.set_record(ready_record(
            "frontend-service",
            ResourceKind::Service,
            "s-1",
            old,
            &[],
        ));

        let diff = DiffEngine::new().compute(&desc, &graph, Some(&state));
        let service = diff
            .diffs
            .iter()
            .find(|d| d.name == "frontend-service")
            .unwrap();
        // cluster_arn forces replacement for services.
        assert_eq!(service.diff_type, DiffType::Replace);
    }
}
