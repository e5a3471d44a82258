//! Step builders for common PostgreSQL online changes.
//!
//! Each recipe returns the steps of one strategy; combine them into a
//! [`MigrationPlan`](super::MigrationPlan) with `with_steps`. Table and
//! column names are interpolated as-is and must be plain identifiers.

use super::step::{MigrationStep, ReverseAction, ScanAction};

/// Add a `NOT NULL` column to a populated table without a long lock.
///
/// 1. add the column as nullable (instant)
/// 2. backfill it in batches with `fill_expr`
/// 3. add `CHECK (column IS NOT NULL) NOT VALID` (instant)
/// 4. validate the check, which scans without blocking writes
/// 5. `SET NOT NULL`, which reuses the validated check
/// 6. drop the helper check
pub fn add_not_null_column(
    table: &str,
    column: &str,
    column_type: &str,
    fill_expr: &str,
) -> Vec<MigrationStep> {
    let check = format!("{table}_{column}_not_null");
    vec![
        MigrationStep::instant(
            format!("add_{column}"),
            format!("ALTER TABLE {table} ADD COLUMN {column} {column_type}"),
            ReverseAction::Statement(format!("ALTER TABLE {table} DROP COLUMN {column}")),
        ),
        MigrationStep::scan(
            format!("backfill_{column}"),
            ScanAction::new(
                table,
                format!("{column} IS NULL"),
                format!("UPDATE {table} SET {column} = {fill_expr} WHERE id IN ({{ids}})"),
            ),
            ReverseAction::Noop,
        ),
        MigrationStep::instant(
            format!("check_{column}_not_null"),
            format!("ALTER TABLE {table} ADD CONSTRAINT {check} CHECK ({column} IS NOT NULL) NOT VALID"),
            ReverseAction::Statement(format!(
                "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {check}"
            )),
        ),
        MigrationStep::instant(
            format!("validate_{column}_not_null"),
            format!("ALTER TABLE {table} VALIDATE CONSTRAINT {check}"),
            ReverseAction::Noop,
        ),
        MigrationStep::instant(
            format!("set_{column}_not_null"),
            format!("ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL"),
            ReverseAction::Statement(format!(
                "ALTER TABLE {table} ALTER COLUMN {column} DROP NOT NULL"
            )),
        ),
        MigrationStep::instant(
            format!("drop_{column}_check"),
            format!("ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {check}"),
            ReverseAction::Statement(format!(
                "ALTER TABLE {table} ADD CONSTRAINT {check} CHECK ({column} IS NOT NULL) NOT VALID"
            )),
        ),
    ]
}

/// Change a column's type through a shadow column and a rename swap.
///
/// `cast_expr` converts the old value, e.g. `created_at::timestamp`. Rows
/// whose source value is NULL are never selected, so they cannot stall the
/// backfill.
pub fn change_column_type(
    table: &str,
    column: &str,
    new_type: &str,
    cast_expr: &str,
) -> Vec<MigrationStep> {
    let shadow = format!("{column}_new");
    let old = format!("{column}_old");
    vec![
        MigrationStep::instant(
            format!("add_{shadow}"),
            format!("ALTER TABLE {table} ADD COLUMN {shadow} {new_type}"),
            ReverseAction::Statement(format!("ALTER TABLE {table} DROP COLUMN {shadow}")),
        ),
        MigrationStep::scan(
            format!("backfill_{shadow}"),
            ScanAction::new(
                table,
                format!("{shadow} IS NULL AND {column} IS NOT NULL"),
                format!("UPDATE {table} SET {shadow} = {cast_expr} WHERE id IN ({{ids}})"),
            ),
            ReverseAction::Batched(ScanAction::new(
                table,
                format!("{shadow} IS NOT NULL"),
                format!("UPDATE {table} SET {shadow} = NULL WHERE id IN ({{ids}})"),
            )),
        ),
        MigrationStep::instant(
            format!("swap_{column}"),
            format!(
                "ALTER TABLE {table} RENAME COLUMN {column} TO {old}; \
                 ALTER TABLE {table} RENAME COLUMN {shadow} TO {column}"
            ),
            ReverseAction::Statement(format!(
                "ALTER TABLE {table} RENAME COLUMN {column} TO {shadow}; \
                 ALTER TABLE {table} RENAME COLUMN {old} TO {column}"
            )),
        ),
    ]
}

/// Build an index without blocking writes.
///
/// `CONCURRENTLY` cannot run inside a transaction, so the step is non-atomic.
pub fn add_index_concurrently(table: &str, index: &str, columns: &[&str]) -> Vec<MigrationStep> {
    vec![MigrationStep::non_atomic(
        format!("create_{index}"),
        format!(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS {index} ON {table} ({})",
            columns.join(", ")
        ),
        ReverseAction::Statement(format!("DROP INDEX CONCURRENTLY IF EXISTS {index}")),
    )]
}

/// Add a foreign key in two phases: `NOT VALID`, then `VALIDATE`.
///
/// Adding the constraint only checks new writes; validation scans existing
/// rows under a lock that still allows reads and writes.
pub fn add_foreign_key(
    table: &str,
    column: &str,
    ref_table: &str,
    ref_column: &str,
) -> Vec<MigrationStep> {
    let constraint = format!("{table}_{column}_fkey");
    vec![
        MigrationStep::instant(
            format!("add_{constraint}"),
            format!(
                "ALTER TABLE {table} ADD CONSTRAINT {constraint} \
                 FOREIGN KEY ({column}) REFERENCES {ref_table}({ref_column}) NOT VALID"
            ),
            ReverseAction::Statement(format!(
                "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {constraint}"
            )),
        ),
        MigrationStep::instant(
            format!("validate_{constraint}"),
            format!("ALTER TABLE {table} VALIDATE CONSTRAINT {constraint}"),
            ReverseAction::Noop,
        ),
    ]
}

/// Drop a column. Reverting re-adds it as nullable; the data is gone.
pub fn drop_column(table: &str, column: &str, column_type: &str) -> Vec<MigrationStep> {
    vec![MigrationStep::instant(
        format!("drop_{column}"),
        format!("ALTER TABLE {table} DROP COLUMN IF EXISTS {column}"),
        ReverseAction::Statement(format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {column_type}"
        )),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::plan::MigrationPlan;
    use crate::migration::step::{ForwardAction, LockClass};

    fn statement(step: &MigrationStep) -> &str {
        match &step.forward {
            ForwardAction::Instant { statement, .. } => statement,
            ForwardAction::Scan(action) => &action.mutation,
        }
    }

    #[test]
    fn test_add_not_null_column() {
        let steps = add_not_null_column("large_record", "status", "TEXT", "'active'");
        let plan = MigrationPlan::new("status").with_steps(steps);
        plan.validate().unwrap();

        let names: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "add_status",
                "backfill_status",
                "check_status_not_null",
                "validate_status_not_null",
                "set_status_not_null",
                "drop_status_check",
            ]
        );
        assert_eq!(plan.steps_with_lock(LockClass::Scan).len(), 1);

        let backfill = plan.steps[1].scan_action().unwrap();
        assert_eq!(backfill.predicate, "status IS NULL");
        assert_eq!(
            backfill.render_mutation(&[1, 2]),
            "UPDATE large_record SET status = 'active' WHERE id IN (1, 2)"
        );
        assert!(statement(&plan.steps[2]).ends_with("NOT VALID"));
    }

    #[test]
    fn test_change_column_type() {
        let steps = change_column_type("large_record", "created_at", "TIMESTAMP", "created_at::timestamp");
        let plan = MigrationPlan::new("created_at").with_steps(steps);
        plan.validate().unwrap();

        let backfill = plan.steps[1].scan_action().unwrap();
        assert_eq!(backfill.predicate, "created_at_new IS NULL AND created_at IS NOT NULL");
        assert!(matches!(plan.steps[1].reverse, ReverseAction::Batched(_)));
        assert!(statement(&plan.steps[2]).contains("RENAME COLUMN created_at_new TO created_at"));
    }

    #[test]
    fn test_add_index_concurrently_is_non_atomic() {
        let steps = add_index_concurrently("large_email", "large_email_email_idx", &["email"]);
        assert_eq!(steps.len(), 1);
        match &steps[0].forward {
            ForwardAction::Instant { statement, atomic } => {
                assert!(!atomic);
                assert_eq!(
                    statement,
                    "CREATE INDEX CONCURRENTLY IF NOT EXISTS large_email_email_idx ON large_email (email)"
                );
            }
            ForwardAction::Scan(_) => panic!("expected an instant step"),
        }
    }

    #[test]
    fn test_add_foreign_key() {
        let steps = add_foreign_key("large_order", "customer_id", "customer", "id");
        assert_eq!(steps.len(), 2);
        assert!(statement(&steps[0]).contains("REFERENCES customer(id) NOT VALID"));
        assert_eq!(
            statement(&steps[1]),
            "ALTER TABLE large_order VALIDATE CONSTRAINT large_order_customer_id_fkey"
        );
        assert_eq!(steps[1].reverse, ReverseAction::Noop);
    }

    #[test]
    fn test_drop_column_reverse_restores_structure() {
        let steps = drop_column("large_record", "legacy", "TEXT");
        assert_eq!(
            steps[0].reverse,
            ReverseAction::Statement("ALTER TABLE large_record ADD COLUMN IF NOT EXISTS legacy TEXT".into())
        );
    }
}
