//! Executor configuration.

use std::time::Duration;

use super::progress::Cadence;

/// Default rows per batch for scan steps that do not set one.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Migration executor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Batch size for scan steps without their own.
    pub default_batch_size: usize,
    /// Batch size forced on every scan step, if set.
    pub batch_size_override: Option<usize>,
    /// Pause between batches, to yield to foreground writes.
    pub batch_delay: Duration,
    /// Progress reporting cadence.
    pub cadence: Cadence,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            batch_size_override: None,
            batch_delay: Duration::ZERO,
            cadence: Cadence::default(),
        }
    }
}

impl ExecutorConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback batch size.
    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size.max(1);
        self
    }

    /// Force a batch size on every scan step.
    pub fn with_batch_size_override(mut self, batch_size: usize) -> Self {
        self.batch_size_override = Some(batch_size.max(1));
        self
    }

    /// Set the pause between batches.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Set the progress cadence.
    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    /// Effective batch size for a step that asks for `requested`.
    pub fn batch_size_for(&self, requested: Option<usize>) -> usize {
        self.batch_size_override
            .or(requested)
            .unwrap_or(self.default_batch_size)
            .max(1)
    }
}
