//! Migration steps: named, ordered, reversible units of schema change.

use serde::{Deserialize, Serialize};

/// Placeholder substituted with the selected key list in a scan mutation.
pub const IDS_PLACEHOLDER: &str = "{ids}";

/// Default key column of a scan step.
pub const DEFAULT_KEY_COLUMN: &str = "id";

fn default_key() -> String {
    DEFAULT_KEY_COLUMN.to_string()
}

fn default_atomic() -> bool {
    true
}

/// Lock footprint of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockClass {
    /// One statement taking a metadata-only lock; runs once.
    Instant,
    /// Reads or writes every row; runs in bounded batches.
    Scan,
}

impl std::fmt::Display for LockClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockClass::Instant => write!(f, "instant"),
            LockClass::Scan => write!(f, "scan"),
        }
    }
}

/// A batched write over one table.
///
/// Each round selects up to `batch_size` keys matching `predicate` and runs
/// `mutation` with [`IDS_PLACEHOLDER`] replaced by those keys. The
/// predicate must describe rows that still need work, so that a restarted
/// run picks up exactly what is left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanAction {
    /// Target table.
    pub table: String,
    /// Integer key column used to address rows.
    #[serde(default = "default_key")]
    pub key: String,
    /// SQL condition selecting rows that are not yet migrated.
    pub predicate: String,
    /// Statement template containing `{ids}`.
    pub mutation: String,
    /// Rows per batch; the executor default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl ScanAction {
    /// Create a scan action keyed on `id`.
    pub fn new(
        table: impl Into<String>,
        predicate: impl Into<String>,
        mutation: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            key: default_key(),
            predicate: predicate.into(),
            mutation: mutation.into(),
            batch_size: None,
        }
    }

    /// Use a different key column.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Set the batch size for this action.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Render the mutation for a concrete set of keys.
    pub fn render_mutation(&self, ids: &[i64]) -> String {
        let list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.mutation.replace(IDS_PLACEHOLDER, &list)
    }
}

/// What a step does when applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "lock_class", rename_all = "snake_case")]
pub enum ForwardAction {
    /// A single statement, executed once.
    Instant {
        /// The statement to run.
        statement: String,
        /// Run inside a transaction. Disable for statements such as
        /// `CREATE INDEX CONCURRENTLY`.
        #[serde(default = "default_atomic")]
        atomic: bool,
    },
    /// A batched loop over a table.
    Scan(ScanAction),
}

/// How a step is undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseAction {
    /// Run one statement.
    Statement(String),
    /// Run a batched loop, with the same guarantees as a forward scan.
    Batched(ScanAction),
    /// Nothing to undo, declared explicitly.
    Noop,
}

/// A named, reversible unit of schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    /// Unique name within the plan.
    pub name: String,
    /// Forward action.
    #[serde(flatten)]
    pub forward: ForwardAction,
    /// Reverse action.
    pub reverse: ReverseAction,
}

impl MigrationStep {
    /// An instant step run inside a transaction.
    pub fn instant(
        name: impl Into<String>,
        statement: impl Into<String>,
        reverse: ReverseAction,
    ) -> Self {
        Self {
            name: name.into(),
            forward: ForwardAction::Instant {
                statement: statement.into(),
                atomic: true,
            },
            reverse,
        }
    }

    /// An instant step run outside any transaction.
    pub fn non_atomic(
        name: impl Into<String>,
        statement: impl Into<String>,
        reverse: ReverseAction,
    ) -> Self {
        Self {
            name: name.into(),
            forward: ForwardAction::Instant {
                statement: statement.into(),
                atomic: false,
            },
            reverse,
        }
    }

    /// A batched scan step.
    pub fn scan(name: impl Into<String>, action: ScanAction, reverse: ReverseAction) -> Self {
        Self {
            name: name.into(),
            forward: ForwardAction::Scan(action),
            reverse,
        }
    }

    /// Lock class derived from the forward action.
    pub fn lock_class(&self) -> LockClass {
        match self.forward {
            ForwardAction::Instant { .. } => LockClass::Instant,
            ForwardAction::Scan(_) => LockClass::Scan,
        }
    }

    /// The scan action, if this is a scan step.
    pub fn scan_action(&self) -> Option<&ScanAction> {
        match &self.forward {
            ForwardAction::Scan(action) => Some(action),
            ForwardAction::Instant { .. } => None,
        }
    }

    /// Stable digest of the forward action.
    ///
    /// Stored alongside completed steps to notice a plan that was edited
    /// after it ran.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        match &self.forward {
            ForwardAction::Instant { statement, .. } => {
                hasher.update(b"instant\0");
                hasher.update(statement.trim().as_bytes());
            }
            ForwardAction::Scan(action) => {
                hasher.update(b"scan\0");
                for part in [&action.table, &action.key, &action.predicate, &action.mutation] {
                    hasher.update(part.trim().as_bytes());
                    hasher.update(b"\0");
                }
            }
        }
        hex::encode(&hasher.finalize().as_bytes()[..8])
    }
}

/// Lifecycle of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started.
    Pending,
    /// Started and not finished; a cancelled step stays here.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Already completed by an earlier run.
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}
