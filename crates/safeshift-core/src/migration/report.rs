//! Results returned by the executor.

use serde::Serialize;

use super::error::{ErrorKind, MigrationError};
use super::step::{LockClass, StepStatus};

/// Process exit code for a fully applied plan.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code when a step failed.
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code when the run was cancelled.
pub const EXIT_CANCELLED: i32 = 130;

/// Outcome of one step in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Step name.
    pub name: String,
    /// Lock class of the step.
    pub lock_class: LockClass,
    /// Final status in this run.
    pub status: StepStatus,
    /// Batches executed in this run.
    pub batches: u64,
    /// Rows affected in this run.
    pub rows_affected: u64,
    /// Wall time in this run, milliseconds.
    pub elapsed_ms: u64,
}

impl StepReport {
    pub(crate) fn new(name: &str, lock_class: LockClass, status: StepStatus) -> Self {
        Self {
            name: name.to_string(),
            lock_class,
            status,
            batches: 0,
            rows_affected: 0,
            elapsed_ms: 0,
        }
    }
}

/// Outcome of [`MigrationExecutor::apply`](super::MigrationExecutor::apply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanResult {
    /// Plan name.
    pub plan: String,
    /// Steps completed in this run.
    pub completed_steps: Vec<String>,
    /// Steps skipped because an earlier run completed them.
    pub skipped_steps: Vec<String>,
    /// The step that failed, if any.
    pub failed_step: Option<String>,
    /// Category of the failure.
    pub failure_kind: Option<ErrorKind>,
    /// Failure message.
    pub failure_reason: Option<String>,
    /// The step interrupted by cancellation, if any.
    pub cancelled_step: Option<String>,
    /// Per-step reports, in plan order, for every step that was reached.
    pub reports: Vec<StepReport>,
}

impl PlanResult {
    pub(crate) fn new(plan: &str) -> Self {
        Self {
            plan: plan.to_string(),
            completed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            failed_step: None,
            failure_kind: None,
            failure_reason: None,
            cancelled_step: None,
            reports: Vec::new(),
        }
    }

    pub(crate) fn fail(&mut self, step: &str, error: &MigrationError) {
        self.failed_step = Some(step.to_string());
        self.failure_kind = Some(error.kind());
        self.failure_reason = Some(error.to_string());
    }

    /// True when every step of the plan is completed (now or earlier).
    pub fn is_success(&self) -> bool {
        self.failed_step.is_none() && self.cancelled_step.is_none()
    }

    /// Rows affected across all steps of this run.
    pub fn total_rows(&self) -> u64 {
        self.reports.iter().map(|r| r.rows_affected).sum()
    }

    /// Process exit code for this result.
    pub fn exit_code(&self) -> i32 {
        if self.failed_step.is_some() {
            EXIT_FAILURE
        } else if self.cancelled_step.is_some() {
            EXIT_CANCELLED
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Outcome of [`MigrationExecutor::revert`](super::MigrationExecutor::revert).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevertResult {
    /// Plan name.
    pub plan: String,
    /// Steps reverted, in the order they were undone.
    pub reverted_steps: Vec<String>,
    /// The step whose reverse action failed, if any.
    pub failed_step: Option<String>,
    /// Category of the failure.
    pub failure_kind: Option<ErrorKind>,
    /// Failure message.
    pub failure_reason: Option<String>,
    /// The step interrupted by cancellation, if any.
    pub cancelled_step: Option<String>,
    /// Per-step reports, in the order they were undone.
    pub reports: Vec<StepReport>,
}

impl RevertResult {
    pub(crate) fn new(plan: &str) -> Self {
        Self {
            plan: plan.to_string(),
            reverted_steps: Vec::new(),
            failed_step: None,
            failure_kind: None,
            failure_reason: None,
            cancelled_step: None,
            reports: Vec::new(),
        }
    }

    pub(crate) fn fail(&mut self, step: &str, error: &MigrationError) {
        self.failed_step = Some(step.to_string());
        self.failure_kind = Some(error.kind());
        self.failure_reason = Some(error.to_string());
    }

    /// True when every requested step was reverted.
    pub fn is_success(&self) -> bool {
        self.failed_step.is_none() && self.cancelled_step.is_none()
    }

    /// Process exit code for this result.
    pub fn exit_code(&self) -> i32 {
        if self.failed_step.is_some() {
            EXIT_FAILURE
        } else if self.cancelled_step.is_some() {
            EXIT_CANCELLED
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Dry-run estimate for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepEstimate {
    /// Step name.
    pub name: String,
    /// Lock class of the step.
    pub lock_class: LockClass,
    /// Whether the ledger shows the step as completed.
    pub applied: bool,
    /// Effective batch size (scan steps).
    pub batch_size: Option<usize>,
    /// Rows still matching the predicate (scan steps).
    pub remaining_rows: Option<u64>,
    /// Batches needed for the remaining rows (scan steps).
    pub estimated_batches: Option<u64>,
    /// Why an estimate is missing, e.g. a column added by an earlier step.
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_result_exit_codes() {
        let mut result = PlanResult::new("plan");
        assert!(result.is_success());
        assert_eq!(result.exit_code(), EXIT_SUCCESS);

        result.cancelled_step = Some("backfill".into());
        assert!(!result.is_success());
        assert_eq!(result.exit_code(), EXIT_CANCELLED);

        let err = MigrationError::invalid_plan("boom");
        result.fail("backfill", &err);
        assert_eq!(result.exit_code(), EXIT_FAILURE);
        assert_eq!(result.failure_kind, Some(ErrorKind::InvalidPlan));
    }

    #[test]
    fn test_plan_result_serializes() {
        let mut result = PlanResult::new("plan");
        let mut report = StepReport::new("backfill", LockClass::Scan, StepStatus::Completed);
        report.rows_affected = 25;
        report.batches = 3;
        result.reports.push(report);
        result.completed_steps.push("backfill".into());

        assert_eq!(result.total_rows(), 25);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["reports"][0]["status"], "completed");
        assert_eq!(json["reports"][0]["lock_class"], "scan");
        assert!(json["failed_step"].is_null());
    }
}
