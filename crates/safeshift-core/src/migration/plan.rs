//! Migration plans: ordered sequences of steps.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::MigrationError;
use super::step::{ForwardAction, LockClass, MigrationStep, ReverseAction, ScanAction, IDS_PLACEHOLDER};

/// An ordered, linear migration plan.
///
/// Step `n` may assume steps `0..n` have completed; there is no other
/// dependency information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Plan name, used as the ledger key.
    pub name: String,
    /// Steps in application order.
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Create an empty plan.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn with_step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append several steps, e.g. the output of a recipe.
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = MigrationStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Parse a plan from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, MigrationError> {
        let plan: Self = serde_json::from_str(json).map_err(crate::error::Error::from)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read, parse and validate a plan file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let json = std::fs::read_to_string(path).map_err(crate::error::Error::from)?;
        Self::from_json(&json)
    }

    /// Serialize the plan as pretty JSON.
    pub fn to_json(&self) -> Result<String, MigrationError> {
        Ok(serde_json::to_string_pretty(self).map_err(crate::error::Error::from)?)
    }

    /// Number of steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Check if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the step named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// The step named `name`.
    pub fn step(&self, name: &str) -> Option<&MigrationStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Steps of a given lock class, in plan order.
    pub fn steps_with_lock(&self, lock_class: LockClass) -> Vec<&MigrationStep> {
        self.steps
            .iter()
            .filter(|s| s.lock_class() == lock_class)
            .collect()
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.name.trim().is_empty() {
            return Err(MigrationError::invalid_plan("plan name is empty"));
        }
        if self.steps.is_empty() {
            return Err(MigrationError::invalid_plan(format!(
                "plan '{}' has no steps",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(MigrationError::invalid_plan("step name is empty"));
            }
            if !names.insert(step.name.as_str()) {
                return Err(MigrationError::invalid_plan(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }

            match &step.forward {
                ForwardAction::Instant { statement, .. } => {
                    if statement.trim().is_empty() {
                        return Err(MigrationError::invalid_plan(format!(
                            "step '{}' has an empty statement",
                            step.name
                        )));
                    }
                }
                ForwardAction::Scan(action) => validate_scan(&step.name, action)?,
            }

            match &step.reverse {
                ReverseAction::Statement(statement) if statement.trim().is_empty() => {
                    return Err(MigrationError::invalid_plan(format!(
                        "step '{}' has an empty reverse statement",
                        step.name
                    )));
                }
                ReverseAction::Batched(action) => validate_scan(&step.name, action)?,
                _ => {}
            }
        }

        Ok(())
    }
}

fn validate_scan(step: &str, action: &ScanAction) -> Result<(), MigrationError> {
    for (what, value) in [("table", &action.table), ("key", &action.key)] {
        if !is_identifier(value) {
            return Err(MigrationError::invalid_plan(format!(
                "step '{step}': {what} '{value}' is not a plain identifier"
            )));
        }
    }
    if action.predicate.trim().is_empty() {
        return Err(MigrationError::invalid_plan(format!(
            "step '{step}': scan predicate is empty"
        )));
    }
    if !action.mutation.contains(IDS_PLACEHOLDER) {
        return Err(MigrationError::invalid_plan(format!(
            "step '{step}': mutation must reference {IDS_PLACEHOLDER}"
        )));
    }
    if action.batch_size == Some(0) {
        return Err(MigrationError::invalid_plan(format!(
            "step '{step}': batch_size must be positive"
        )));
    }
    Ok(())
}

/// `name` or `schema.name`, ASCII letters, digits and underscores.
pub(crate) fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backfill_plan() -> MigrationPlan {
        MigrationPlan::new("record_created_at")
            .with_step(MigrationStep::instant(
                "add_created_at_new",
                "ALTER TABLE large_record ADD COLUMN created_at_new TIMESTAMP",
                ReverseAction::Statement(
                    "ALTER TABLE large_record DROP COLUMN created_at_new".into(),
                ),
            ))
            .with_step(MigrationStep::scan(
                "backfill_created_at_new",
                ScanAction::new(
                    "large_record",
                    "created_at_new IS NULL",
                    "UPDATE large_record SET created_at_new = created_at WHERE id IN ({ids})",
                ),
                ReverseAction::Statement("UPDATE large_record SET created_at_new = NULL".into()),
            ))
    }

    #[test]
    fn test_valid_plan() {
        let plan = backfill_plan();
        assert!(plan.validate().is_ok());
        assert_eq!(plan.step_count(), 2);
        assert_eq!(plan.position("backfill_created_at_new"), Some(1));
        assert_eq!(plan.steps_with_lock(LockClass::Scan).len(), 1);
        assert!(plan.step("missing").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut plan = backfill_plan();
        plan.steps[1].name = "add_created_at_new".into();
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate step name"));
    }

    #[test]
    fn test_empty_plan_rejected() {
        let plan = MigrationPlan::new("empty");
        assert!(matches!(plan.validate(), Err(MigrationError::InvalidPlan { .. })));
    }

    #[test]
    fn test_scan_without_placeholder_rejected() {
        let plan = MigrationPlan::new("bad").with_step(MigrationStep::scan(
            "backfill",
            ScanAction::new("t", "c IS NULL", "UPDATE t SET c = 1"),
            ReverseAction::Noop,
        ));
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("{ids}"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let plan = MigrationPlan::new("bad").with_step(MigrationStep::scan(
            "backfill",
            ScanAction::new("t", "c IS NULL", "UPDATE t SET c = 1 WHERE id IN ({ids})")
                .with_batch_size(0),
            ReverseAction::Noop,
        ));
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("large_record"));
        assert!(is_identifier("public.large_record"));
        assert!(!is_identifier("large_record; DROP TABLE x"));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier("schema."));
    }

    #[test]
    fn test_json_round_trip() {
        let plan = backfill_plan();
        let json = plan.to_json().unwrap();
        assert!(json.contains("\"lock_class\": \"scan\""));
        let parsed = MigrationPlan::from_json(&json).unwrap();
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, backfill_plan().to_json().unwrap()).unwrap();
        let plan = MigrationPlan::from_path(&path).unwrap();
        assert_eq!(plan.name, "record_created_at");

        let missing = MigrationPlan::from_path(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(MigrationError::Storage(_))));
    }
}
