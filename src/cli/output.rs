//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans,
//! reports, and state to the user in text or JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::engine::{DriftReport, RunReport};
use crate::planner::{Plan, StepAction, StepStatus};
use crate::state::EngineState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Step result row for table display.
#[derive(Tabled)]
struct StepResultRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_converged() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        let _ = write!(output, "\nPlan\n");
        let _ = write!(
            output,
            "   Descriptor hash: {}\n\n",
            &plan.descriptor_hash[..8.min(plan.descriptor_hash.len())]
        );

        let rows: Vec<PlanStepRow> = plan
            .steps
            .iter()
            .filter(|s| s.action != StepAction::NoOp)
            .map(|s| PlanStepRow {
                index: s.index + 1,
                action: Self::format_step_action(s.action),
                resource: s.name.clone(),
                kind: s.kind.to_string(),
                reason: Self::truncate(&s.reason, 40),
            })
            .collect();

        if !rows.is_empty() {
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to import, {} to update, {} to replace, {} to delete\n",
            plan.count(StepAction::Create).to_string().green(),
            plan.count(StepAction::Import).to_string().cyan(),
            plan.count(StepAction::Update).to_string().yellow(),
            plan.count(StepAction::Replace).to_string().yellow(),
            plan.count(StepAction::Delete).to_string().red()
        );

        output
    }

    /// Formats a run report (apply results plus exports).
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ReportJson::from(report)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &RunReport) -> String {
        let headline = if report.apply.cancelled {
            format!("{} Apply cancelled", "⚠".yellow())
        } else if report.apply.success {
            format!("{} Apply successful", "✓".green())
        } else {
            format!("{} Apply failed", "✗".red())
        };

        let mut output = format!("{headline}\n\n");

        let rows: Vec<StepResultRow> = report
            .apply
            .results
            .iter()
            .map(|r| StepResultRow {
                index: r.index + 1,
                resource: r.name.clone(),
                action: r.action.to_string(),
                status: Self::format_step_status(r.status),
                detail: r
                    .error
                    .as_deref()
                    .or(r.physical_id.as_deref())
                    .map(|s| Self::truncate(s, 48))
                    .unwrap_or_default(),
            })
            .collect();

        if !rows.is_empty() {
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        let _ = write!(
            output,
            "\n{} succeeded, {} no-op, {} failed, {} blocked, {} skipped\n",
            report.apply.succeeded.to_string().green(),
            report.apply.noop,
            report.apply.failed.to_string().red(),
            report.apply.blocked.to_string().yellow(),
            report.apply.skipped
        );

        if !report.exports.is_empty() {
            output.push_str("\nOutputs:\n");
            for (name, value) in &report.exports {
                let _ = writeln!(output, "   {name} = {value}");
            }
        }

        output
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!("{} No drift detected - state is converged.\n", "✓".green())
                } else {
                    format!("{} {report}\n", "⚠".yellow())
                }
            }
        }
    }

    /// Formats resolved exports.
    #[must_use]
    pub fn format_outputs(&self, exports: &std::collections::BTreeMap<String, String>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(exports).unwrap_or_default(),
            OutputFormat::Text => {
                if exports.is_empty() {
                    return String::from("No outputs recorded. Run 'groundwork apply' first.\n");
                }
                let mut output = String::new();
                for (name, value) in exports {
                    let _ = writeln!(output, "{name} = {value}");
                }
                output
            }
        }
    }

    /// Formats engine state.
    #[must_use]
    pub fn format_state(&self, state: &EngineState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(
                    output,
                    "   Descriptor hash: {}",
                    &state.descriptor_hash[..8.min(state.descriptor_hash.len())]
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Records: {}", state.records.len());

                for name in state.record_names() {
                    if let Some(record) = state.get_record(name) {
                        let flags = match (record.protect, record.imported) {
                            (true, true) => " [protected, imported]",
                            (true, false) => " [protected]",
                            (false, true) => " [imported]",
                            (false, false) => "",
                        };
                        let _ = writeln!(
                            output,
                            "     {} {} ({}) -> {}{flags}",
                            record.status,
                            record.name,
                            record.kind,
                            Self::truncate(&record.physical_id, 32)
                        );
                    }
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a step action with color.
    fn format_step_action(action: StepAction) -> String {
        match action {
            StepAction::Create => "+create".green().to_string(),
            StepAction::Import => "=import".cyan().to_string(),
            StepAction::Update => "~update".yellow().to_string(),
            StepAction::Replace => "±replace".yellow().to_string(),
            StepAction::Delete => "-delete".red().to_string(),
            StepAction::NoOp => "noop".dimmed().to_string(),
        }
    }

    /// Formats a step status with color.
    fn format_step_status(status: StepStatus) -> String {
        match status {
            StepStatus::Succeeded => "succeeded".green().to_string(),
            StepStatus::NoOp => "no-op".dimmed().to_string(),
            StepStatus::Failed => "failed".red().to_string(),
            StepStatus::Blocked => "blocked".yellow().to_string(),
            StepStatus::Skipped => "skipped".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            s.to_string()
        } else {
            format!("{}...", &s[..max_len - 3])
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    descriptor_hash: String,
    step_count: usize,
    creates: usize,
    imports: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    steps: Vec<StepJson>,
}

#[derive(serde::Serialize)]
struct StepJson {
    action: String,
    resource: String,
    kind: String,
    depends_on: Vec<usize>,
    reason: String,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            descriptor_hash: plan.descriptor_hash.clone(),
            step_count: plan.step_count(),
            creates: plan.count(StepAction::Create),
            imports: plan.count(StepAction::Import),
            updates: plan.count(StepAction::Update),
            replaces: plan.count(StepAction::Replace),
            deletes: plan.count(StepAction::Delete),
            steps: plan
                .steps
                .iter()
                .map(|s| StepJson {
                    action: s.action.to_string(),
                    resource: s.name.clone(),
                    kind: s.kind.to_string(),
                    depends_on: s.depends_on.clone(),
                    reason: s.reason.clone(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct ReportJson {
    success: bool,
    cancelled: bool,
    succeeded: usize,
    noop: usize,
    failed: usize,
    blocked: usize,
    skipped: usize,
    steps: Vec<StepResultJson>,
    outputs: std::collections::BTreeMap<String, String>,
}

#[derive(serde::Serialize)]
struct StepResultJson {
    resource: String,
    action: String,
    status: String,
    physical_id: Option<String>,
    error: Option<String>,
}

impl From<&RunReport> for ReportJson {
    fn from(report: &RunReport) -> Self {
        Self {
            success: report.apply.success,
            cancelled: report.apply.cancelled,
            succeeded: report.apply.succeeded,
            noop: report.apply.noop,
            failed: report.apply.failed,
            blocked: report.apply.blocked,
            skipped: report.apply.skipped,
            steps: report
                .apply
                .results
                .iter()
                .map(|r| StepResultJson {
                    resource: r.name.clone(),
                    action: r.action.to_string(),
                    status: r.status.to_string(),
                    physical_id: r.physical_id.clone(),
                    error: r.error.clone(),
                })
                .collect(),
            outputs: report.exports.clone(),
        }
    }
}
