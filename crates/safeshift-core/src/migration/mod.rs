//! Online schema-evolution engine.
//!
//! A [`MigrationPlan`] is an ordered list of [`MigrationStep`]s. Each step
//! is either *instant* (one statement, e.g. `ADD COLUMN` or `NOT VALID`
//! constraints) or a *scan* over a table, executed as many short
//! transactions:
//!
//! ```text
//! loop {
//!     ids = SELECT key FROM table WHERE predicate ORDER BY key LIMIT batch_size
//!     if ids is empty: done
//!     BEGIN; mutation(ids); COMMIT
//!     report progress
//! }
//! ```
//!
//! The predicate is the only record of how far a scan got, so a run that
//! is cancelled or crashes can simply be started again. Completed steps
//! are tracked in a [`StepLedger`] and skipped on the next run.
//!
//! # Example
//!
//! ```ignore
//! use safeshift_core::connection;
//! use safeshift_core::migration::{
//!     CancellationToken, ExecutorConfig, MigrationExecutor, MigrationPlan, TableLedger,
//! };
//!
//! let mut conn = connection::open("sqlite://app.db")?;
//! let plan = MigrationPlan::from_path("plans/record_created_at.json")?;
//!
//! let result = MigrationExecutor::new(&mut *conn, ExecutorConfig::default())
//!     .with_ledger(TableLedger::new())
//!     .apply(&plan, &CancellationToken::new())?;
//!
//! std::process::exit(result.exit_code());
//! ```

pub mod cancel;
pub mod config;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod mutator;
pub mod plan;
pub mod progress;
pub mod recipes;
pub mod report;
pub mod step;

// Error types
pub use error::{ErrorKind, MigrationError};

// Step and plan types
pub use plan::MigrationPlan;
pub use step::{
    ForwardAction, LockClass, MigrationStep, ReverseAction, ScanAction, StepStatus,
    DEFAULT_KEY_COLUMN, IDS_PLACEHOLDER,
};

// Batch loop building blocks
pub use cursor::BatchCursor;
pub use mutator::ChunkedMutator;
pub use progress::{
    Cadence, MemoryEmitter, ProgressCounter, ProgressEmitter, ProgressEvent, ProgressReporter,
    TracingEmitter,
};

// Ledger types
pub use ledger::{LedgerEntry, MemoryLedger, StepLedger, TableLedger, DEFAULT_LEDGER_TABLE};

// Executor types
pub use cancel::CancellationToken;
pub use config::{ExecutorConfig, DEFAULT_BATCH_SIZE};
pub use executor::MigrationExecutor;
pub use report::{
    PlanResult, RevertResult, StepEstimate, StepReport, EXIT_CANCELLED, EXIT_FAILURE,
    EXIT_SUCCESS,
};
