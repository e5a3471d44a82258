//! Chunked mutator: applies one bounded write per call.

use super::error::MigrationError;
use super::step::ScanAction;
use crate::connection::Connection;

/// Applies a scan action's mutation to a batch of keys.
///
/// Every call runs in its own transaction, so the longest lock any batch
/// holds is the time needed to write `batch_size` rows. Failures are
/// returned, never skipped.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedMutator<'a> {
    step: &'a str,
    action: &'a ScanAction,
}

impl<'a> ChunkedMutator<'a> {
    /// Create a mutator for `action`.
    pub fn new(step: &'a str, action: &'a ScanAction) -> Self {
        Self { step, action }
    }

    /// Apply the mutation to `ids` as batch number `batch`.
    pub fn apply<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        ids: &[i64],
        batch: u64,
    ) -> Result<u64, MigrationError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = self.action.render_mutation(ids);
        conn.execute_in_transaction(&sql)
            .map_err(|source| MigrationError::Mutation {
                step: self.step.to_string(),
                batch,
                source,
            })
    }
}

/// Run the single statement of an instant step.
pub fn apply_statement<C: Connection + ?Sized>(
    conn: &mut C,
    step: &str,
    statement: &str,
    atomic: bool,
) -> Result<u64, MigrationError> {
    let result = if atomic {
        conn.execute_in_transaction(statement)
    } else {
        conn.execute(statement)
    };

    result.map_err(|source| MigrationError::Mutation {
        step: step.to_string(),
        batch: 1,
        source,
    })
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::connection::SqliteConnection;

    fn setup() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE record (id INTEGER PRIMARY KEY, src INTEGER, dst INTEGER CHECK (dst < 15));
             WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 20)
             INSERT INTO record (id, src) SELECT i, i FROM n;",
        )
        .unwrap();
        conn
    }

    fn action() -> ScanAction {
        ScanAction::new(
            "record",
            "dst IS NULL",
            "UPDATE record SET dst = src WHERE id IN ({ids})",
        )
    }

    #[test]
    fn test_apply_reports_rows() {
        let mut conn = setup();
        let action = action();
        let mutator = ChunkedMutator::new("copy", &action);
        assert_eq!(mutator.apply(&mut conn, &[1, 2, 3], 1).unwrap(), 3);
        assert_eq!(mutator.apply(&mut conn, &[], 2).unwrap(), 0);
    }

    #[test]
    fn test_failed_batch_is_rolled_back() {
        let mut conn = setup();
        let action = action();
        let mutator = ChunkedMutator::new("copy", &action);

        let err = mutator.apply(&mut conn, &[13, 14, 15, 16], 2).unwrap_err();
        assert!(matches!(err, MigrationError::Mutation { batch: 2, .. }));

        let written = conn
            .query_count("SELECT COUNT(*) FROM record WHERE dst IS NOT NULL")
            .unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_apply_statement() {
        let mut conn = setup();
        apply_statement(&mut conn, "add", "ALTER TABLE record ADD COLUMN note TEXT", true).unwrap();
        let err = apply_statement(&mut conn, "add", "ALTER TABLE record ADD COLUMN note TEXT", false)
            .unwrap_err();
        assert!(matches!(err, MigrationError::Mutation { ref step, batch: 1, .. } if step == "add"));
    }
}
