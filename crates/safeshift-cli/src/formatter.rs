//! Output formatters for run reports.

use clap::ValueEnum;
use comfy_table::Table;
use safeshift_core::migration::{
    LedgerEntry, MigrationPlan, PlanResult, RevertResult, StepEstimate, StepReport,
};

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting run reports.
pub trait Formatter {
    /// Format the outcome of applying a plan.
    fn format_plan_result(&self, result: &PlanResult) -> String;

    /// Format the outcome of a revert.
    fn format_revert_result(&self, result: &RevertResult) -> String;

    /// Format a dry-run estimate.
    fn format_estimates(&self, plan: &MigrationPlan, estimates: &[StepEstimate]) -> String;

    /// Format the ledger state of a plan.
    fn format_status(&self, plan: &MigrationPlan, entries: &[LedgerEntry]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_plan_result(&self, result: &PlanResult) -> String {
        let mut output = reports_table(&result.reports).to_string();
        output.push('\n');
        output.push_str(&outcome_line(
            &result.plan,
            "applied",
            result.failed_step.as_deref(),
            result.failure_reason.as_deref(),
            result.cancelled_step.as_deref(),
        ));
        output
    }

    fn format_revert_result(&self, result: &RevertResult) -> String {
        let mut output = if result.reports.is_empty() {
            "Nothing to revert".to_string()
        } else {
            reports_table(&result.reports).to_string()
        };
        output.push('\n');
        output.push_str(&outcome_line(
            &result.plan,
            "reverted",
            result.failed_step.as_deref(),
            result.failure_reason.as_deref(),
            result.cancelled_step.as_deref(),
        ));
        output
    }

    fn format_estimates(&self, plan: &MigrationPlan, estimates: &[StepEstimate]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Step", "Lock", "Applied", "Batch size", "Rows", "Batches", "Note"]);

        for estimate in estimates {
            table.add_row(vec![
                estimate.name.clone(),
                estimate.lock_class.to_string(),
                yes_no(estimate.applied),
                optional(estimate.batch_size),
                optional(estimate.remaining_rows),
                optional(estimate.estimated_batches),
                estimate.note.clone().unwrap_or_default(),
            ]);
        }

        format!("Dry run for plan '{}'\n{}", plan.name, table)
    }

    fn format_status(&self, plan: &MigrationPlan, entries: &[LedgerEntry]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Step", "Lock", "Status", "Rows", "Completed at"]);

        for step in &plan.steps {
            let entry = entries.iter().find(|e| e.step == step.name);
            let status = match entry {
                Some(e) if e.fingerprint != step.fingerprint() => "completed (changed)",
                Some(_) => "completed",
                None => "pending",
            };
            table.add_row(vec![
                step.name.clone(),
                step.lock_class().to_string(),
                status.to_string(),
                entry.map(|e| e.rows_affected.to_string()).unwrap_or_default(),
                entry.map(|e| e.completed_at.clone()).unwrap_or_default(),
            ]);
        }

        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_plan_result(&self, result: &PlanResult) -> String {
        serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_revert_result(&self, result: &RevertResult) -> String {
        serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_estimates(&self, plan: &MigrationPlan, estimates: &[StepEstimate]) -> String {
        serde_json::to_string_pretty(&serde_json::json!({
            "plan": plan.name,
            "steps": estimates,
        }))
        .unwrap_or_else(|_| "{}".to_string())
    }

    fn format_status(&self, plan: &MigrationPlan, entries: &[LedgerEntry]) -> String {
        let pending: Vec<&str> = plan
            .steps
            .iter()
            .filter(|s| !entries.iter().any(|e| e.step == s.name))
            .map(|s| s.name.as_str())
            .collect();

        serde_json::to_string_pretty(&serde_json::json!({
            "plan": plan.name,
            "completed": entries,
            "pending": pending,
        }))
        .unwrap_or_else(|_| "{}".to_string())
    }
}

fn reports_table(reports: &[StepReport]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Step", "Lock", "Status", "Batches", "Rows", "Elapsed"]);

    for report in reports {
        table.add_row(vec![
            report.name.clone(),
            report.lock_class.to_string(),
            report.status.to_string(),
            report.batches.to_string(),
            report.rows_affected.to_string(),
            format!("{:.2}s", report.elapsed_ms as f64 / 1000.0),
        ]);
    }

    table
}

fn outcome_line(
    plan: &str,
    verb: &str,
    failed_step: Option<&str>,
    failure_reason: Option<&str>,
    cancelled_step: Option<&str>,
) -> String {
    match (failed_step, cancelled_step) {
        (Some(step), _) => format!(
            "Plan '{}' stopped at step '{}': {}",
            plan,
            step,
            failure_reason.unwrap_or("unknown error")
        ),
        (None, Some(step)) => format!(
            "Plan '{}' cancelled during step '{}'; re-run to resume",
            plan, step
        ),
        (None, None) => format!("Plan '{}' {}", plan, verb),
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn yes_no(value: bool) -> String {
    let text = if value { "yes" } else { "no" };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use safeshift_core::migration::{LockClass, MigrationStep, ReverseAction, ScanAction};

    fn plan() -> MigrationPlan {
        MigrationPlan::new("status")
            .with_step(MigrationStep::instant(
                "add_status",
                "ALTER TABLE large_record ADD COLUMN status TEXT",
                ReverseAction::Statement("ALTER TABLE large_record DROP COLUMN status".into()),
            ))
            .with_step(MigrationStep::scan(
                "backfill_status",
                ScanAction::new(
                    "large_record",
                    "status IS NULL",
                    "UPDATE large_record SET status = 'active' WHERE id IN ({ids})",
                ),
                ReverseAction::Noop,
            ))
    }

    fn estimates() -> Vec<StepEstimate> {
        vec![StepEstimate {
            name: "backfill_status".to_string(),
            lock_class: LockClass::Scan,
            applied: false,
            batch_size: Some(10_000),
            remaining_rows: Some(25_000),
            estimated_batches: Some(3),
            note: None,
        }]
    }

    #[test]
    fn test_table_estimates() {
        let output = TableFormatter.format_estimates(&plan(), &estimates());
        assert!(output.starts_with("Dry run for plan 'status'"));
        assert!(output.contains("backfill_status"));
        assert!(output.contains("25000"));
    }

    #[test]
    fn test_json_estimates() {
        let output = JsonFormatter.format_estimates(&plan(), &estimates());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["plan"], "status");
        assert_eq!(value["steps"][0]["estimated_batches"], 3);
    }

    #[test]
    fn test_status_marks_pending_steps() {
        let plan = plan();
        let entries = vec![LedgerEntry::now("status", "add_status", plan.steps[0].fingerprint(), 0)];

        let table = TableFormatter.format_status(&plan, &entries);
        assert!(table.contains("completed"));
        assert!(table.contains("pending"));

        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_status(&plan, &entries)).unwrap();
        assert_eq!(json["pending"], serde_json::json!(["backfill_status"]));
        assert_eq!(json["completed"][0]["step"], "add_status");
    }

    #[test]
    fn test_outcome_line() {
        assert_eq!(outcome_line("p", "applied", None, None, None), "Plan 'p' applied");
        assert!(outcome_line("p", "applied", None, None, Some("backfill")).contains("re-run"));
        assert!(
            outcome_line("p", "applied", Some("backfill"), Some("batch 2 failed"), None)
                .ends_with("batch 2 failed")
        );
    }
}
