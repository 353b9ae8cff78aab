//! Dependency graph construction over a descriptor's reference edges.
//!
//! Every `${resource.output}` reference in a property bag is a directed
//! edge from the referencing resource to its target. The builder turns the
//! full resource set into a DAG, rejects cycles with the offending path,
//! and exposes the topological order the planner emits steps in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::descriptor::ResourceSpec;
use crate::error::{GraphError, GroundworkError, Result};

/// A directed acyclic graph over logical resource names.
///
/// Building the graph is a pure function of the resource set; it performs
/// no I/O and records no state.
#[derive(Debug)]
pub struct ResourceGraph {
    /// For each resource, the names it references (its dependencies).
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// For each resource, the names that reference it.
    dependents: BTreeMap<String, BTreeSet<String>>,
    /// Topological order: every resource appears after all its dependencies.
    order: Vec<String>,
}

/// Three-color marker used during the depth-first cycle scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Not yet visited.
    Unvisited,
    /// On the current DFS path.
    InProgress,
    /// Fully explored.
    Done,
}

impl ResourceGraph {
    /// Builds the dependency graph for a resource set.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownReference`] if a reference targets an
    /// undeclared name, or [`GraphError::Cycle`] with the full cycle path
    /// if the references do not form a DAG.
    pub fn build(resources: &[ResourceSpec]) -> Result<Self> {
        let declared: BTreeSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for resource in resources {
            dependencies.entry(resource.name.clone()).or_default();
            dependents.entry(resource.name.clone()).or_default();
        }

        for resource in resources {
            for (field, reference) in resource.references() {
                if !declared.contains(reference.resource.as_str()) {
                    return Err(GroundworkError::Graph(GraphError::UnknownReference {
                        from: resource.name.clone(),
                        field,
                        target: reference.resource.clone(),
                    }));
                }

                dependencies
                    .entry(resource.name.clone())
                    .or_default()
                    .insert(reference.resource.clone());
                dependents
                    .entry(reference.resource.clone())
                    .or_default()
                    .insert(resource.name.clone());
            }
        }

        let order = toposort(resources, &dependencies)?;

        Ok(Self {
            dependencies,
            dependents,
            order,
        })
    }

    /// Returns the resources in topological order (dependencies first).
    #[must_use]
    pub fn topo_order(&self) -> &[String] {
        &self.order
    }

    /// Returns the direct dependencies of a resource.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.dependencies
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the direct dependents of a resource.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.dependents
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the number of resources in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Depth-first topological sort with three-color cycle detection.
///
/// Resources are visited in author order so the emitted order is stable
/// for a given descriptor.
fn toposort(
    resources: &[ResourceSpec],
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = resources
        .iter()
        .map(|r| (r.name.as_str(), Mark::Unvisited))
        .collect();
    let mut order = Vec::with_capacity(resources.len());
    let mut path = Vec::new();

    for resource in resources {
        if marks[resource.name.as_str()] == Mark::Unvisited {
            visit(
                resource.name.as_str(),
                dependencies,
                &mut marks,
                &mut path,
                &mut order,
            )?;
        }
    }

    Ok(order)
}

fn visit<'a>(
    name: &'a str,
    dependencies: &'a BTreeMap<String, BTreeSet<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<()> {
    marks.insert(name, Mark::InProgress);
    path.push(name);

    if let Some(deps) = dependencies.get(name) {
        for dep in deps {
            match marks.get(dep.as_str()).copied().unwrap_or(Mark::Unvisited) {
                Mark::Done => {}
                Mark::InProgress => {
                    // Reconstruct the cycle from where the path first
                    // entered it, closing the loop on the repeated name.
                    let start = path
                        .iter()
                        .position(|n| *n == dep.as_str())
                        .unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(ToString::to_string).collect();
                    cycle.push(dep.clone());
                    return Err(GroundworkError::Graph(GraphError::Cycle { path: cycle }));
                }
                Mark::Unvisited => {
                    visit(dep.as_str(), dependencies, marks, path, order)?;
                }
            }
        }
    }

    path.pop();
    marks.insert(name, Mark::Done);
    order.push(name.to_string());
    Ok(())
}
