//! Progress counters and periodic status reporting.
//!
//! The reporter is an injected collaborator: the executor feeds it after
//! every batch and it decides, from its cadence, whether to hand a
//! [`ProgressEvent`] to its [`ProgressEmitter`]. Nothing here affects
//! control flow.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default cadence: one status line every 10 batches.
pub const DEFAULT_EMIT_EVERY_BATCHES: u64 = 10;

/// When to emit a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// After every `n`th batch.
    EveryBatches(u64),
    /// Whenever the running total crosses a multiple of `k` rows.
    EveryRows(u64),
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence::EveryBatches(DEFAULT_EMIT_EVERY_BATCHES)
    }
}

/// Cumulative counters for the step currently running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounter {
    /// Rows affected so far; never decreases.
    pub total_affected: u64,
    /// Batches executed so far.
    pub batch_count: u64,
}

/// One status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Step being executed.
    pub step: String,
    /// One-based batch number.
    pub batch: u64,
    /// Rows affected by this batch.
    pub rows: u64,
    /// Wall time of this batch.
    pub elapsed: Duration,
    /// Rows affected so far in this step.
    pub total: u64,
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch {}: Updated {} rows in {:.2}s (Total: {})",
            self.batch,
            self.rows,
            self.elapsed.as_secs_f64(),
            self.total
        )
    }
}

/// Sink for status lines.
pub trait ProgressEmitter: Send + Sync {
    /// Publish one event.
    fn emit(&self, event: &ProgressEvent);
}

/// Emits status lines as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmitter;

impl ProgressEmitter for TracingEmitter {
    fn emit(&self, event: &ProgressEvent) {
        tracing::info!(
            target: "safeshift::progress",
            step = %event.step,
            batch = event.batch,
            rows = event.rows,
            total = event.total,
            "{}",
            event
        );
    }
}

/// Collects events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryEmitter {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MemoryEmitter {
    /// Create an empty emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Forget all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ProgressEmitter for MemoryEmitter {
    fn emit(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Per-step progress tracker.
pub struct ProgressReporter {
    step: String,
    cadence: Cadence,
    emitter: Arc<dyn ProgressEmitter>,
    counter: ProgressCounter,
    last_batch: Option<(u64, Duration)>,
    last_emitted_total: u64,
}

impl ProgressReporter {
    /// Create a reporter for `step`.
    pub fn new(step: impl Into<String>, cadence: Cadence, emitter: Arc<dyn ProgressEmitter>) -> Self {
        Self {
            step: step.into(),
            cadence,
            emitter,
            counter: ProgressCounter::default(),
            last_batch: None,
            last_emitted_total: 0,
        }
    }

    /// Current counters.
    pub fn counter(&self) -> ProgressCounter {
        self.counter
    }

    /// Account for one finished batch.
    pub fn record(&mut self, rows: u64, elapsed: Duration) {
        self.counter.batch_count += 1;
        self.counter.total_affected = self.counter.total_affected.saturating_add(rows);
        self.last_batch = Some((rows, elapsed));
    }

    /// Emit a status line if the cadence threshold was crossed since the last one.
    pub fn maybe_emit(&mut self) -> bool {
        let Some((rows, elapsed)) = self.last_batch else {
            return false;
        };

        let due = match self.cadence {
            Cadence::EveryBatches(n) => self.counter.batch_count % n.max(1) == 0,
            Cadence::EveryRows(k) => {
                let k = k.max(1);
                self.counter.total_affected / k > self.last_emitted_total / k
            }
        };
        if !due {
            return false;
        }

        self.last_emitted_total = self.counter.total_affected;
        self.emitter.emit(&ProgressEvent {
            step: self.step.clone(),
            batch: self.counter.batch_count,
            rows,
            elapsed,
            total: self.counter.total_affected,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(cadence: Cadence) -> (ProgressReporter, MemoryEmitter) {
        let emitter = MemoryEmitter::new();
        let reporter = ProgressReporter::new("backfill", cadence, Arc::new(emitter.clone()));
        (reporter, emitter)
    }

    #[test]
    fn test_event_display() {
        let event = ProgressEvent {
            step: "backfill".to_string(),
            batch: 10,
            rows: 10000,
            elapsed: Duration::from_millis(1234),
            total: 100000,
        };
        assert_eq!(
            event.to_string(),
            "Batch 10: Updated 10000 rows in 1.23s (Total: 100000)"
        );
    }

    #[test]
    fn test_every_batches_cadence() {
        let (mut reporter, emitter) = reporter(Cadence::EveryBatches(2));
        let mut emitted = Vec::new();
        for _ in 0..5 {
            reporter.record(10, Duration::from_millis(5));
            emitted.push(reporter.maybe_emit());
        }
        assert_eq!(emitted, vec![false, true, false, true, false]);

        let totals: Vec<u64> = emitter.events().iter().map(|e| e.total).collect();
        assert_eq!(totals, vec![20, 40]);
        assert_eq!(reporter.counter().batch_count, 5);
        assert_eq!(reporter.counter().total_affected, 50);
    }

    #[test]
    fn test_every_rows_cadence() {
        let (mut reporter, emitter) = reporter(Cadence::EveryRows(25));
        for rows in [10, 10, 10, 30, 5] {
            reporter.record(rows, Duration::ZERO);
            reporter.maybe_emit();
        }
        let totals: Vec<u64> = emitter.events().iter().map(|e| e.total).collect();
        // Thresholds 25 and 50 are crossed at totals 30 and 60.
        assert_eq!(totals, vec![30, 60]);
    }

    #[test]
    fn test_no_emit_before_record() {
        let (mut reporter, emitter) = reporter(Cadence::EveryBatches(1));
        assert!(!reporter.maybe_emit());
        assert!(emitter.events().is_empty());
    }

    #[test]
    fn test_cadence_default() {
        assert_eq!(Cadence::default(), Cadence::EveryBatches(DEFAULT_EMIT_EVERY_BATCHES));
    }
}
