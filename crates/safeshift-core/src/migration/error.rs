//! Migration-specific error types.

use serde::Serialize;
use thiserror::Error;

/// Broad category of a migration failure, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The selection query of a scan step failed.
    Predicate,
    /// A batch (or an instant statement) failed to apply.
    Mutation,
    /// A scan step stopped making progress.
    StuckProgress,
    /// A reverse action failed during revert.
    ReverseAction,
    /// The plan is malformed or cannot be applied as requested.
    InvalidPlan,
    /// Bookkeeping against the database failed outside of a batch.
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Predicate => write!(f, "predicate_error"),
            ErrorKind::Mutation => write!(f, "mutation_error"),
            ErrorKind::StuckProgress => write!(f, "stuck_progress_error"),
            ErrorKind::ReverseAction => write!(f, "reverse_action_error"),
            ErrorKind::InvalidPlan => write!(f, "invalid_plan"),
            ErrorKind::Storage => write!(f, "storage_error"),
        }
    }
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The selection query failed; no batch was applied.
    #[error("step '{step}': selection query failed: {source}")]
    Predicate {
        /// The step being executed.
        step: String,
        /// The underlying database error.
        #[source]
        source: crate::error::Error,
    },

    /// A mutation statement failed. Earlier batches stay committed.
    #[error("step '{step}': batch {batch} failed: {source}")]
    Mutation {
        /// The step being executed.
        step: String,
        /// One-based batch number (instant steps run a single batch).
        batch: u64,
        /// The underlying database error.
        #[source]
        source: crate::error::Error,
    },

    /// The cursor keeps selecting rows the mutation does not resolve.
    #[error("step '{step}': no progress at batch {batch} ({selected} rows selected, {affected} affected)")]
    StuckProgress {
        /// The step being executed.
        step: String,
        /// One-based batch number at which progress stalled.
        batch: u64,
        /// Rows returned by the cursor.
        selected: usize,
        /// Rows reported changed by the mutation.
        affected: u64,
    },

    /// A reverse action failed; reversal halted at this step.
    #[error("reverse action for step '{step}' failed: {source}")]
    ReverseAction {
        /// The step being reverted.
        step: String,
        /// What went wrong while running the reverse action.
        #[source]
        source: Box<MigrationError>,
    },

    /// The plan is malformed or the request is inconsistent with it.
    #[error("invalid plan: {message}")]
    InvalidPlan {
        /// Description of the problem.
        message: String,
    },

    /// A named step does not exist in the plan.
    #[error("step not found: {step}")]
    StepNotFound {
        /// The requested step name.
        step: String,
    },

    /// Ledger or connection error outside of a batch.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

impl MigrationError {
    /// Build an [`MigrationError::InvalidPlan`].
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        MigrationError::InvalidPlan {
            message: message.into(),
        }
    }

    /// The reporting category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::Predicate { .. } => ErrorKind::Predicate,
            MigrationError::Mutation { .. } => ErrorKind::Mutation,
            MigrationError::StuckProgress { .. } => ErrorKind::StuckProgress,
            MigrationError::ReverseAction { .. } => ErrorKind::ReverseAction,
            MigrationError::InvalidPlan { .. } | MigrationError::StepNotFound { .. } => {
                ErrorKind::InvalidPlan
            }
            MigrationError::Storage(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let err = MigrationError::StuckProgress {
            step: "backfill".to_string(),
            batch: 1,
            selected: 10,
            affected: 0,
        };
        assert_eq!(err.kind(), ErrorKind::StuckProgress);
        assert_eq!(err.kind().to_string(), "stuck_progress_error");

        let wrapped = MigrationError::ReverseAction {
            step: "backfill".to_string(),
            source: Box::new(err),
        };
        assert_eq!(wrapped.kind(), ErrorKind::ReverseAction);
    }

    #[test]
    fn test_error_display() {
        let err = MigrationError::StuckProgress {
            step: "backfill_email".to_string(),
            batch: 3,
            selected: 10,
            affected: 0,
        };
        let message = err.to_string();
        assert!(message.contains("backfill_email"));
        assert!(message.contains("batch 3"));
    }
}
