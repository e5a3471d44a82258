//! Migration executor - drives a plan to completion.
//!
//! Steps run strictly in order. Instant steps run their statement once;
//! scan steps loop cursor -> mutator -> reporter until the cursor comes
//! back empty. The first failure stops the run. Nothing is rolled back
//! automatically: undoing a half-applied backfill can be as expensive as
//! applying it, so reverting is a separate, explicit call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::cancel::CancellationToken;
use super::config::ExecutorConfig;
use super::cursor::BatchCursor;
use super::error::MigrationError;
use super::ledger::{LedgerEntry, MemoryLedger, StepLedger};
use super::mutator::{apply_statement, ChunkedMutator};
use super::plan::MigrationPlan;
use super::progress::{ProgressEmitter, ProgressReporter, TracingEmitter};
use super::report::{PlanResult, RevertResult, StepEstimate, StepReport};
use super::step::{ForwardAction, LockClass, MigrationStep, ReverseAction, ScanAction, StepStatus};
use crate::connection::{with_transaction, Connection};

/// How a step run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Cancelled,
}

/// Migration executor.
pub struct MigrationExecutor<'c> {
    conn: &'c mut dyn Connection,
    ledger: Box<dyn StepLedger>,
    emitter: Arc<dyn ProgressEmitter>,
    config: ExecutorConfig,
}

impl<'c> MigrationExecutor<'c> {
    /// Create an executor with an in-memory ledger and tracing progress output.
    pub fn new(conn: &'c mut dyn Connection, config: ExecutorConfig) -> Self {
        Self {
            conn,
            ledger: Box::new(MemoryLedger::new()),
            emitter: Arc::new(TracingEmitter),
            config,
        }
    }

    /// Use a different step ledger.
    pub fn with_ledger(mut self, ledger: impl StepLedger + 'static) -> Self {
        self.ledger = Box::new(ledger);
        self
    }

    /// Use a different progress emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn ProgressEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// The executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Apply every step of `plan` that the ledger does not show as completed.
    ///
    /// Returns `Err` only when the plan is invalid or the ledger cannot be
    /// read; step failures and cancellation are reported in the result.
    pub fn apply(
        &mut self,
        plan: &MigrationPlan,
        cancel: &CancellationToken,
    ) -> Result<PlanResult, MigrationError> {
        plan.validate()?;
        let completed = self.completed_steps(plan)?;
        let mut result = PlanResult::new(&plan.name);

        info!(plan = %plan.name, steps = plan.step_count(), "applying plan");
        let started = Instant::now();

        for step in &plan.steps {
            if let Some(entry) = completed.get(&step.name) {
                if entry.fingerprint != step.fingerprint() {
                    warn!(
                        plan = %plan.name,
                        step = %step.name,
                        recorded = %entry.fingerprint,
                        current = %step.fingerprint(),
                        "step changed since it was applied"
                    );
                }
                debug!(step = %step.name, "already applied, skipping");
                result.skipped_steps.push(step.name.clone());
                result
                    .reports
                    .push(StepReport::new(&step.name, step.lock_class(), StepStatus::Skipped));
                continue;
            }

            if cancel.is_cancelled() {
                info!(step = %step.name, "cancelled before step started");
                result.cancelled_step = Some(step.name.clone());
                result
                    .reports
                    .push(StepReport::new(&step.name, step.lock_class(), StepStatus::Pending));
                break;
            }

            let mut report = StepReport::new(&step.name, step.lock_class(), StepStatus::Running);
            let step_started = Instant::now();
            let run = self.run_forward(&plan.name, step, cancel, &mut report);
            report.elapsed_ms = step_started.elapsed().as_millis() as u64;

            match run {
                Ok(Outcome::Completed) => {
                    info!(
                        step = %step.name,
                        lock_class = %step.lock_class(),
                        batches = report.batches,
                        rows = report.rows_affected,
                        elapsed_ms = report.elapsed_ms,
                        "step completed"
                    );
                    report.status = StepStatus::Completed;
                    result.completed_steps.push(step.name.clone());
                    result.reports.push(report);
                }
                Ok(Outcome::Cancelled) => {
                    warn!(
                        step = %step.name,
                        batches = report.batches,
                        rows = report.rows_affected,
                        "cancelled; re-run the plan to resume this step"
                    );
                    result.cancelled_step = Some(step.name.clone());
                    result.reports.push(report);
                    break;
                }
                Err(e) => {
                    error!(
                        step = %step.name,
                        kind = %e.kind(),
                        batches = report.batches,
                        rows = report.rows_affected,
                        error = %e,
                        "step failed"
                    );
                    report.status = StepStatus::Failed;
                    result.fail(&step.name, &e);
                    result.reports.push(report);
                    break;
                }
            }
        }

        if result.is_success() {
            info!(
                plan = %plan.name,
                completed = result.completed_steps.len(),
                skipped = result.skipped_steps.len(),
                rows = result.total_rows(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "plan applied"
            );
        }

        Ok(result)
    }

    /// Undo completed steps from `upto_step` back to the first, newest first.
    ///
    /// Refuses when a step after `upto_step` is still applied. A failing
    /// reverse action halts the revert and is reported in the result.
    pub fn revert(
        &mut self,
        plan: &MigrationPlan,
        upto_step: &str,
        cancel: &CancellationToken,
    ) -> Result<RevertResult, MigrationError> {
        plan.validate()?;
        let upto = plan
            .position(upto_step)
            .ok_or_else(|| MigrationError::StepNotFound {
                step: upto_step.to_string(),
            })?;
        let completed = self.completed_steps(plan)?;

        if let Some(later) = plan.steps[upto + 1..]
            .iter()
            .find(|s| completed.contains_key(&s.name))
        {
            return Err(MigrationError::invalid_plan(format!(
                "cannot revert from '{}' while later step '{}' is still applied",
                upto_step, later.name
            )));
        }

        let mut result = RevertResult::new(&plan.name);
        info!(plan = %plan.name, from = %upto_step, "reverting plan");

        for step in plan.steps[..=upto].iter().rev() {
            if !completed.contains_key(&step.name) {
                debug!(step = %step.name, "not applied, nothing to revert");
                continue;
            }

            if cancel.is_cancelled() {
                result.cancelled_step = Some(step.name.clone());
                break;
            }

            let mut report = StepReport::new(&step.name, step.lock_class(), StepStatus::Running);
            let step_started = Instant::now();
            let run = self.run_reverse(&plan.name, step, cancel, &mut report);
            report.elapsed_ms = step_started.elapsed().as_millis() as u64;

            match run {
                Ok(Outcome::Completed) => {
                    info!(step = %step.name, rows = report.rows_affected, "step reverted");
                    report.status = StepStatus::Completed;
                    result.reverted_steps.push(step.name.clone());
                    result.reports.push(report);
                }
                Ok(Outcome::Cancelled) => {
                    warn!(step = %step.name, "revert cancelled");
                    result.cancelled_step = Some(step.name.clone());
                    result.reports.push(report);
                    break;
                }
                Err(e) => {
                    let e = MigrationError::ReverseAction {
                        step: step.name.clone(),
                        source: Box::new(e),
                    };
                    error!(step = %step.name, error = %e, "revert halted; manual intervention required");
                    report.status = StepStatus::Failed;
                    result.fail(&step.name, &e);
                    result.reports.push(report);
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Estimate remaining work without mutating anything.
    pub fn estimate(&mut self, plan: &MigrationPlan) -> Result<Vec<StepEstimate>, MigrationError> {
        plan.validate()?;
        let completed = self.completed_steps(plan)?;

        let mut estimates = Vec::with_capacity(plan.step_count());
        for step in &plan.steps {
            let applied = completed.contains_key(&step.name);
            let mut estimate = StepEstimate {
                name: step.name.clone(),
                lock_class: step.lock_class(),
                applied,
                batch_size: None,
                remaining_rows: None,
                estimated_batches: None,
                note: None,
            };

            if let Some(action) = step.scan_action() {
                let batch_size = self.config.batch_size_for(action.batch_size);
                estimate.batch_size = Some(batch_size);

                if !applied {
                    let cursor = BatchCursor::new(&step.name, action, batch_size);
                    match cursor.remaining(&mut *self.conn) {
                        Ok(rows) => {
                            estimate.remaining_rows = Some(rows);
                            estimate.estimated_batches = Some(rows.div_ceil(batch_size as u64));
                        }
                        Err(e) => {
                            debug!(step = %step.name, error = %e, "no estimate");
                            estimate.note = Some(e.to_string());
                        }
                    }
                }
            }

            estimates.push(estimate);
        }

        Ok(estimates)
    }

    /// Ledger entries of `plan`.
    pub fn status(&mut self, plan: &MigrationPlan) -> Result<Vec<LedgerEntry>, MigrationError> {
        self.ledger.completed(&mut *self.conn, &plan.name)
    }

    fn completed_steps(
        &mut self,
        plan: &MigrationPlan,
    ) -> Result<HashMap<String, LedgerEntry>, MigrationError> {
        Ok(self
            .ledger
            .completed(&mut *self.conn, &plan.name)?
            .into_iter()
            .map(|e| (e.step.clone(), e))
            .collect())
    }

    /// Run a step's forward action and record it in the ledger.
    ///
    /// An atomic instant statement commits together with its ledger entry.
    /// Scan steps and non-atomic statements record after they finish; a
    /// scan step whose entry is lost completes with zero batches on re-run.
    fn run_forward(
        &mut self,
        plan: &str,
        step: &MigrationStep,
        cancel: &CancellationToken,
        report: &mut StepReport,
    ) -> Result<Outcome, MigrationError> {
        match &step.forward {
            ForwardAction::Instant { statement, atomic } => {
                info!(step = %step.name, atomic, "running instant step");
                let rows = if *atomic {
                    let ledger = &self.ledger;
                    with_transaction(&mut *self.conn, |conn| {
                        let rows = apply_statement(conn, &step.name, statement, false)?;
                        let entry = LedgerEntry::now(plan, &step.name, step.fingerprint(), rows);
                        ledger.record(conn, &entry)?;
                        Ok::<_, MigrationError>(rows)
                    })?
                } else {
                    let rows = apply_statement(&mut *self.conn, &step.name, statement, false)?;
                    if let Err(e) = self.record(plan, step, rows) {
                        warn!(
                            step = %step.name,
                            "statement applied but not recorded; a re-run repeats it"
                        );
                        return Err(e);
                    }
                    rows
                };
                report.batches = 1;
                report.rows_affected = rows;
                Ok(Outcome::Completed)
            }
            ForwardAction::Scan(action) => {
                info!(step = %step.name, table = %action.table, "starting batched step");
                let outcome = self.run_scan(&step.name, action, cancel, report)?;
                if outcome == Outcome::Completed {
                    self.record(plan, step, report.rows_affected)?;
                }
                Ok(outcome)
            }
        }
    }

    /// Run a step's reverse action and drop it from the ledger.
    fn run_reverse(
        &mut self,
        plan: &str,
        step: &MigrationStep,
        cancel: &CancellationToken,
        report: &mut StepReport,
    ) -> Result<Outcome, MigrationError> {
        match &step.reverse {
            ReverseAction::Statement(statement) => {
                // Reverse statements share the transaction mode of the forward statement.
                let atomic = match step.forward {
                    ForwardAction::Instant { atomic, .. } => atomic,
                    ForwardAction::Scan(_) => true,
                };
                let rows = if atomic {
                    let ledger = &self.ledger;
                    with_transaction(&mut *self.conn, |conn| {
                        let rows = apply_statement(conn, &step.name, statement, false)?;
                        ledger.remove(conn, plan, &step.name)?;
                        Ok::<_, MigrationError>(rows)
                    })?
                } else {
                    let rows = apply_statement(&mut *self.conn, &step.name, statement, false)?;
                    self.ledger.remove(&mut *self.conn, plan, &step.name)?;
                    rows
                };
                report.lock_class = LockClass::Instant;
                report.batches = 1;
                report.rows_affected = rows;
                Ok(Outcome::Completed)
            }
            ReverseAction::Batched(action) => {
                report.lock_class = LockClass::Scan;
                let outcome = self.run_scan(&step.name, action, cancel, report)?;
                if outcome == Outcome::Completed {
                    self.ledger.remove(&mut *self.conn, plan, &step.name)?;
                }
                Ok(outcome)
            }
            ReverseAction::Noop => {
                debug!(step = %step.name, "reverse is a no-op");
                self.ledger.remove(&mut *self.conn, plan, &step.name)?;
                Ok(Outcome::Completed)
            }
        }
    }

    fn record(&mut self, plan: &str, step: &MigrationStep, rows: u64) -> Result<(), MigrationError> {
        let entry = LedgerEntry::now(plan, &step.name, step.fingerprint(), rows);
        self.ledger.record(&mut *self.conn, &entry)
    }

    fn run_scan(
        &mut self,
        step: &str,
        action: &ScanAction,
        cancel: &CancellationToken,
        report: &mut StepReport,
    ) -> Result<Outcome, MigrationError> {
        let batch_size = self.config.batch_size_for(action.batch_size);
        let cursor = BatchCursor::new(step, action, batch_size);
        let mutator = ChunkedMutator::new(step, action);
        let mut reporter = ProgressReporter::new(step, self.config.cadence, Arc::clone(&self.emitter));
        let mut previous: Option<(Vec<i64>, u64)> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            let ids = cursor.next_batch(&mut *self.conn)?;
            if ids.is_empty() {
                break;
            }

            let batch = reporter.counter().batch_count + 1;
            if let Some((prev_ids, prev_affected)) = &previous {
                if *prev_ids == ids {
                    return Err(MigrationError::StuckProgress {
                        step: step.to_string(),
                        batch,
                        selected: ids.len(),
                        affected: *prev_affected,
                    });
                }
            }

            let batch_started = Instant::now();
            let affected = mutator.apply(&mut *self.conn, &ids, batch)?;
            let elapsed = batch_started.elapsed();

            reporter.record(affected, elapsed);
            let counter = reporter.counter();
            report.batches = counter.batch_count;
            report.rows_affected = counter.total_affected;
            reporter.maybe_emit();

            if affected == 0 {
                return Err(MigrationError::StuckProgress {
                    step: step.to_string(),
                    batch,
                    selected: ids.len(),
                    affected,
                });
            }
            previous = Some((ids, affected));

            if !self.config.batch_delay.is_zero() {
                std::thread::sleep(self.config.batch_delay);
            }
        }

        info!(
            step = %step,
            batches = report.batches,
            total = report.rows_affected,
            "batched step complete"
        );
        Ok(Outcome::Completed)
    }
}
