//! Batch cursor: selects the next window of rows that still need work.
//!
//! The cursor never remembers a position. Every call re-asks the database
//! for the first `batch_size` keys matching the step's predicate, so a
//! run restarted after a crash sees exactly the remaining work, and
//! concurrent inserts or deletes cannot shift a page boundary.

use super::error::MigrationError;
use super::step::ScanAction;
use crate::connection::Connection;

/// Stateless key selector over one scan action.
#[derive(Debug, Clone, Copy)]
pub struct BatchCursor<'a> {
    step: &'a str,
    action: &'a ScanAction,
    batch_size: usize,
}

impl<'a> BatchCursor<'a> {
    /// Create a cursor for `action`, selecting at most `batch_size` keys per call.
    pub fn new(step: &'a str, action: &'a ScanAction, batch_size: usize) -> Self {
        Self {
            step,
            action,
            batch_size: batch_size.max(1),
        }
    }

    /// Rows per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The selection query for the next batch.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT {key} FROM {table} WHERE ({predicate}) ORDER BY {key} LIMIT {limit}",
            key = self.action.key,
            table = self.action.table,
            predicate = self.action.predicate,
            limit = self.batch_size,
        )
    }

    /// The query counting all remaining rows.
    pub fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {table} WHERE ({predicate})",
            table = self.action.table,
            predicate = self.action.predicate,
        )
    }

    /// Keys of the next batch, in key order. Empty once the step is done.
    pub fn next_batch<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
    ) -> Result<Vec<i64>, MigrationError> {
        conn.query_keys(&self.select_sql())
            .map_err(|source| MigrationError::Predicate {
                step: self.step.to_string(),
                source,
            })
    }

    /// Number of rows still matching the predicate.
    pub fn remaining<C: Connection + ?Sized>(&self, conn: &mut C) -> Result<u64, MigrationError> {
        conn.query_count(&self.count_sql())
            .map_err(|source| MigrationError::Predicate {
                step: self.step.to_string(),
                source,
            })
    }
}
