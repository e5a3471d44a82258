//! Step ledger: which steps of a plan have completed.
//!
//! The ledger only knows whole steps. It never records how far a scan
//! step got; that is always recomputed from the step's predicate.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::error::MigrationError;
use super::plan::is_identifier;
use crate::connection::{Connection, Value};
use crate::error::Error;

/// Default name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "safeshift_ledger";

/// A completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Plan name.
    pub plan: String,
    /// Step name.
    pub step: String,
    /// Fingerprint of the step's forward action when it ran.
    pub fingerprint: String,
    /// Rows affected by the step.
    pub rows_affected: u64,
    /// Completion time, RFC 3339.
    pub completed_at: String,
}

impl LedgerEntry {
    /// Create an entry stamped with the current time.
    pub fn now(
        plan: impl Into<String>,
        step: impl Into<String>,
        fingerprint: impl Into<String>,
        rows_affected: u64,
    ) -> Self {
        Self {
            plan: plan.into(),
            step: step.into(),
            fingerprint: fingerprint.into(),
            rows_affected,
            completed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Storage for completed steps.
///
/// Methods receive the executor's connection so that table-backed ledgers
/// live in the same database as the data they describe. The executor may
/// call `record` and `remove` inside an open transaction on that
/// connection, so a table-backed write commits or rolls back together
/// with the step itself.
pub trait StepLedger {
    /// Completed steps of `plan`.
    fn completed(
        &self,
        conn: &mut dyn Connection,
        plan: &str,
    ) -> Result<Vec<LedgerEntry>, MigrationError>;

    /// Record a completed step.
    fn record(&self, conn: &mut dyn Connection, entry: &LedgerEntry) -> Result<(), MigrationError>;

    /// Forget a step after it has been reverted.
    fn remove(&self, conn: &mut dyn Connection, plan: &str, step: &str)
        -> Result<(), MigrationError>;
}

/// In-process ledger.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    entries: Arc<Mutex<BTreeMap<(String, String), LedgerEntry>>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepLedger for MemoryLedger {
    fn completed(
        &self,
        _conn: &mut dyn Connection,
        plan: &str,
    ) -> Result<Vec<LedgerEntry>, MigrationError> {
        Ok(self
            .entries
            .lock()
            .values()
            .filter(|e| e.plan == plan)
            .cloned()
            .collect())
    }

    fn record(&self, _conn: &mut dyn Connection, entry: &LedgerEntry) -> Result<(), MigrationError> {
        self.entries
            .lock()
            .insert((entry.plan.clone(), entry.step.clone()), entry.clone());
        Ok(())
    }

    fn remove(
        &self,
        _conn: &mut dyn Connection,
        plan: &str,
        step: &str,
    ) -> Result<(), MigrationError> {
        self.entries
            .lock()
            .remove(&(plan.to_string(), step.to_string()));
        Ok(())
    }
}

/// Ledger stored in a table of the target database.
#[derive(Debug, Clone)]
pub struct TableLedger {
    table_name: String,
}

impl Default for TableLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TableLedger {
    /// Use the default table name.
    pub fn new() -> Self {
        Self {
            table_name: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }

    /// Use a custom table name, `name` or `schema.name`.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Result<Self, Error> {
        let table_name = table_name.into();
        if !is_identifier(&table_name) {
            return Err(Error::InvalidIdentifier(format!(
                "ledger table '{table_name}'"
            )));
        }
        self.table_name = table_name;
        Ok(self)
    }

    /// The ledger table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn ensure_table(&self, conn: &mut dyn Connection) -> Result<(), MigrationError> {
        conn.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                plan_name TEXT NOT NULL, \
                step_name TEXT NOT NULL, \
                fingerprint TEXT NOT NULL, \
                rows_affected BIGINT NOT NULL, \
                completed_at TEXT NOT NULL, \
                PRIMARY KEY (plan_name, step_name))",
            self.table_name
        ))?;
        Ok(())
    }
}

fn read_entry(row: Vec<Value>) -> Result<LedgerEntry, Error> {
    let [plan, step, fingerprint, rows_affected, completed_at]: [Value; 5] =
        row.try_into().map_err(|row: Vec<Value>| {
            Error::InvalidData(format!("ledger row has {} columns", row.len()))
        })?;

    let text = |value: Value, column: &str| match value {
        Value::Text(text) => Ok(text),
        other => Err(Error::InvalidData(format!(
            "ledger column {column} is {other:?}, expected text"
        ))),
    };
    let rows_affected = rows_affected
        .as_integer()
        .and_then(|rows| u64::try_from(rows).ok())
        .ok_or_else(|| {
            Error::InvalidData(format!(
                "ledger rows_affected {rows_affected:?} is not a row count"
            ))
        })?;

    Ok(LedgerEntry {
        plan: text(plan, "plan_name")?,
        step: text(step, "step_name")?,
        fingerprint: text(fingerprint, "fingerprint")?,
        rows_affected,
        completed_at: text(completed_at, "completed_at")?,
    })
}

impl StepLedger for TableLedger {
    fn completed(
        &self,
        conn: &mut dyn Connection,
        plan: &str,
    ) -> Result<Vec<LedgerEntry>, MigrationError> {
        self.ensure_table(conn)?;
        let dialect = conn.dialect();
        let rows = conn.query_rows_with(
            &format!(
                "SELECT plan_name, step_name, fingerprint, rows_affected, completed_at \
                 FROM {} WHERE plan_name = {} ORDER BY completed_at",
                self.table_name,
                dialect.placeholder(1)
            ),
            &[Value::from(plan)],
        )?;

        Ok(rows
            .into_iter()
            .map(read_entry)
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn record(&self, conn: &mut dyn Connection, entry: &LedgerEntry) -> Result<(), MigrationError> {
        self.ensure_table(conn)?;
        let rows_affected = i64::try_from(entry.rows_affected).map_err(|_| {
            Error::InvalidData(format!("rows_affected {} out of range", entry.rows_affected))
        })?;
        let dialect = conn.dialect();
        let placeholders: Vec<String> = (1..=5).map(|i| dialect.placeholder(i)).collect();
        let sql = format!(
            "INSERT INTO {} (plan_name, step_name, fingerprint, rows_affected, completed_at) \
             VALUES ({})",
            self.table_name,
            placeholders.join(", ")
        );
        conn.execute_with(
            &sql,
            &[
                Value::from(entry.plan.as_str()),
                Value::from(entry.step.as_str()),
                Value::from(entry.fingerprint.as_str()),
                Value::Integer(rows_affected),
                Value::from(entry.completed_at.as_str()),
            ],
        )?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut dyn Connection,
        plan: &str,
        step: &str,
    ) -> Result<(), MigrationError> {
        self.ensure_table(conn)?;
        let dialect = conn.dialect();
        conn.execute_with(
            &format!(
                "DELETE FROM {} WHERE plan_name = {} AND step_name = {}",
                self.table_name,
                dialect.placeholder(1),
                dialect.placeholder(2)
            ),
            &[Value::from(plan), Value::from(step)],
        )?;
        Ok(())
    }
}
