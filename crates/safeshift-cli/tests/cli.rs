//! End-to-end runs of the `safeshift` binary against a SQLite file.

use std::path::PathBuf;
use std::process::{Command, Output};

use safeshift_core::{Connection, SqliteConnection};

const PLAN: &str = r#"{
    "name": "copy_src",
    "steps": [
        {
            "name": "add_dst",
            "lock_class": "instant",
            "statement": "ALTER TABLE record ADD COLUMN dst INTEGER",
            "reverse": { "statement": "ALTER TABLE record DROP COLUMN dst" }
        },
        {
            "name": "copy",
            "lock_class": "scan",
            "table": "record",
            "predicate": "dst IS NULL",
            "mutation": "UPDATE record SET dst = src WHERE id IN ({ids})",
            "batch_size": 4,
            "reverse": "noop"
        }
    ]
}"#;

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        SqliteConnection::open(dir.path().join("app.db"))
            .unwrap()
            .execute_batch(
                "CREATE TABLE record (id INTEGER PRIMARY KEY, src INTEGER NOT NULL);
                 WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 10)
                 INSERT INTO record (id, src) SELECT i, i FROM n;",
            )
            .unwrap();
        std::fs::create_dir(dir.path().join("plans")).unwrap();
        std::fs::write(dir.path().join("plans/copy_src.json"), PLAN).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn run(&self, extra: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_safeshift"))
            .arg("copy_src")
            .arg("--database")
            .arg(format!("sqlite://{}", self.path("app.db").display()))
            .arg("--plans-dir")
            .arg(self.path("plans"))
            .args(extra)
            .output()
            .unwrap()
    }
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_apply_status_and_revert() {
    let fixture = Fixture::new();

    let dry_run = fixture.run(&["--dry-run", "--format", "json"]);
    assert_eq!(dry_run.status.code(), Some(0));
    let estimate = json(&dry_run);
    assert_eq!(estimate["steps"][0]["name"], "add_dst");
    assert!(estimate["steps"][1]["note"].is_string());

    let applied = fixture.run(&["--format", "json"]);
    assert_eq!(applied.status.code(), Some(0));
    let result = json(&applied);
    assert_eq!(result["completed_steps"], serde_json::json!(["add_dst", "copy"]));
    assert_eq!(result["reports"][1]["batches"], 3);
    assert_eq!(result["reports"][1]["rows_affected"], 10);

    let again = json(&fixture.run(&["--format", "json"]));
    assert_eq!(again["skipped_steps"], serde_json::json!(["add_dst", "copy"]));

    let status = json(&fixture.run(&["--status", "--format", "json"]));
    assert_eq!(status["pending"], serde_json::json!([]));

    let reverted = fixture.run(&["--revert", "--format", "json"]);
    assert_eq!(reverted.status.code(), Some(0));
    assert_eq!(
        json(&reverted)["reverted_steps"],
        serde_json::json!(["copy", "add_dst"])
    );
}

#[test]
fn test_table_output() {
    let fixture = Fixture::new();
    let output = fixture.run(&[]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Plan 'copy_src' applied"));
}

#[test]
fn test_missing_plan_exits_with_usage_error() {
    let fixture = Fixture::new();
    let output = Command::new(env!("CARGO_BIN_EXE_safeshift"))
        .arg(fixture.path("plans/missing.json"))
        .arg("--database")
        .arg(fixture.path("app.db"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[test]
fn test_invalid_ledger_table_exits_with_usage_error() {
    let fixture = Fixture::new();
    let output = fixture.run(&["--ledger-table", "ledger; DROP TABLE record"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid identifier"));
    let mut conn = SqliteConnection::open(fixture.path("app.db")).unwrap();
    assert_eq!(conn.query_count("SELECT COUNT(*) FROM record").unwrap(), 10);
}
