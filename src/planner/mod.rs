//! Planning and execution: diff computation, plan construction, and the
//! dependency-ordered executor.

mod diff;
mod executor;
mod plan;

pub use diff::{resolve_properties, DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ApplyReport, PlanExecutor, StepResult, StepStatus};
pub use plan::{Plan, PlanStep, StepAction};
