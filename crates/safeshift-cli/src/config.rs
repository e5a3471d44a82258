//! Command-line arguments and run configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use safeshift_core::migration::progress::DEFAULT_EMIT_EVERY_BATCHES;
use safeshift_core::migration::{Cadence, ExecutorConfig, DEFAULT_LEDGER_TABLE};

use crate::formatter::OutputFormat;

/// Default directory searched for plans given by name.
pub const DEFAULT_PLANS_DIR: &str = "plans";

/// Exit code for configuration and connection errors.
pub const EXIT_USAGE: i32 = 2;

/// What a run does with the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Apply pending steps.
    Apply,
    /// Report remaining work without writing.
    DryRun,
    /// Show the step ledger.
    Status,
    /// Revert completed steps, starting from the named step or the last one.
    Revert(Option<String>),
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Plan file to load.
    pub plan_path: PathBuf,
    /// Database URL.
    pub database: String,
    /// What to do.
    pub mode: Mode,
    /// Ledger table name.
    pub ledger_table: String,
    /// Report format.
    pub format: OutputFormat,
    /// Engine settings.
    pub executor: ExecutorConfig,
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "safeshift")]
#[command(version, about = "Run batched, resumable schema migrations", long_about = None)]
pub struct Args {
    /// Plan file, or the name of a plan in the plans directory.
    pub plan: String,

    /// Database URL (sqlite://path, sqlite::memory:, a file path, or postgres://...).
    #[arg(short, long)]
    pub database: String,

    /// Rows per batch, overriding every scan step.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub batch_size: Option<usize>,

    /// Report remaining work without changing anything.
    #[arg(long, conflicts_with_all = ["revert", "status"])]
    pub dry_run: bool,

    /// Revert completed steps, from STEP (or the last step) back to the first.
    #[arg(long, value_name = "STEP", num_args = 0..=1, conflicts_with = "status")]
    pub revert: Option<Option<String>>,

    /// Show which steps of the plan have completed.
    #[arg(long)]
    pub status: bool,

    /// Pause between batches, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub batch_delay_ms: u64,

    /// Emit a progress line every N batches.
    #[arg(
        long,
        default_value_t = DEFAULT_EMIT_EVERY_BATCHES,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub progress_every: u64,

    /// Emit a progress line every N rows instead of every N batches.
    #[arg(
        long,
        conflicts_with = "progress_every",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub progress_rows: Option<u64>,

    /// Table holding completed steps.
    #[arg(long, default_value = DEFAULT_LEDGER_TABLE)]
    pub ledger_table: String,

    /// Directory searched for plans given by name.
    #[arg(long, default_value = DEFAULT_PLANS_DIR)]
    pub plans_dir: PathBuf,

    /// Report format.
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

impl Args {
    /// Convert command-line arguments to a run configuration.
    pub fn into_config(self) -> RunConfig {
        let mode = if self.dry_run {
            Mode::DryRun
        } else if self.status {
            Mode::Status
        } else if let Some(step) = self.revert {
            Mode::Revert(step)
        } else {
            Mode::Apply
        };

        let cadence = match self.progress_rows {
            Some(rows) => Cadence::EveryRows(rows),
            None => Cadence::EveryBatches(self.progress_every),
        };

        let mut executor = ExecutorConfig::new()
            .with_batch_delay(Duration::from_millis(self.batch_delay_ms))
            .with_cadence(cadence);
        if let Some(batch_size) = self.batch_size {
            executor = executor.with_batch_size_override(batch_size);
        }

        RunConfig {
            plan_path: resolve_plan(&self.plan, &self.plans_dir),
            database: self.database,
            mode,
            ledger_table: self.ledger_table,
            format: self.format,
            executor,
        }
    }
}

/// Map a plan argument to a file: paths are used as given, bare names are
/// looked up as `<plans_dir>/<name>.json`.
pub fn resolve_plan(plan: &str, plans_dir: &Path) -> PathBuf {
    let path = Path::new(plan);
    if path.extension().is_some() || path.components().count() > 1 || path.exists() {
        path.to_path_buf()
    } else {
        plans_dir.join(format!("{plan}.json"))
    }
}
