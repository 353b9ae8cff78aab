// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Groundwork
//!
//! A declarative, dependency-aware reconciliation engine for cloud resources.
//!
//! ## Overview
//!
//! Groundwork reconciles a user-authored description of infrastructure
//! against a persisted record of what actually exists, allowing you to:
//!
//! - Describe roles, clusters, services, load balancers and the like as
//!   logical resources in a YAML descriptor file
//! - Wire resources together with `${resource.output}` references that form
//!   an explicit dependency graph
//! - Adopt infrastructure that already exists in the target account via
//!   `import_id`, without recreating it
//! - Mark resources `protect: true` so no plan may replace or delete them
//!
//! ## Architecture
//!
//! The engine is built around **desired state reconciliation**:
//!
//! 1. **Desired State**: Defined in `groundwork.infra.yaml`
//! 2. **Recorded State**: Physical records persisted in the state store
//! 3. **Planner**: Diffs the two into an ordered plan of steps
//! 4. **Executor**: Applies the plan in dependency order via a [`Provider`]
//!
//! ## Modules
//!
//! - [`descriptor`]: Descriptor parsing and validation
//! - [`graph`]: Dependency graph construction and cycle detection
//! - [`state`]: State storage backends (local, S3)
//! - [`provider`]: Provider capability trait and retry policy
//! - [`planner`]: Diff computation, plan construction, plan execution
//! - [`engine`]: Reconciliation orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: voting-app
//!   environment: prod
//!
//! resources:
//!   - name: cluster
//!     kind: cluster
//!     properties:
//!       name: voting-app-cluster
//!   - name: frontend-service
//!     kind: service
//!     properties:
//!       cluster_arn: ${cluster.arn}
//!       desired_count: 1
//!
//! exports:
//!   cluster_name: ${cluster.name}
//! ```
//!
//! [`Provider`]: provider::Provider

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use descriptor::{
    Descriptor, DescriptorParser, DescriptorValidator, PropertyValue, Reference, ResourceKind,
    ResourceSpec, SpecHasher,
};
pub use engine::{DriftReport, Engine, RunReport};
pub use error::{GroundworkError, Result};
pub use graph::ResourceGraph;
pub use planner::{DiffEngine, Plan, PlanExecutor, StepAction};
pub use provider::{CreatedResource, ObservedResource, Provider, RetryPolicy};
pub use state::{EngineState, LocalStateStore, PhysicalRecord, S3StateStore, StateStore};
