//! SQLite connection adapter.

use std::path::Path;

use rusqlite::types::{ToSqlOutput, ValueRef};

use super::{Connection, Dialect, Value};
use crate::error::Error;

/// A [`Connection`] backed by a single rusqlite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::from_connection(rusqlite::Connection::open(path)?))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        Ok(Self::from_connection(rusqlite::Connection::open_in_memory()?))
    }

    /// Wrap an existing rusqlite connection.
    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Run several `;`-separated statements, e.g. schema setup.
    pub fn execute_batch(&self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Access the underlying rusqlite connection.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

fn single_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Integer(value) => ToSqlOutput::from(*value),
            Value::Text(text) => ToSqlOutput::from(text.as_str()),
        })
    }
}

fn read_value(value: ValueRef<'_>) -> Result<Value, Error> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(value) => Ok(Value::Integer(value)),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec())
            .map(Value::Text)
            .map_err(|e| Error::InvalidData(e.to_string())),
        other => Err(Error::InvalidData(format!(
            "unsupported column type {:?}",
            other.data_type()
        ))),
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str) -> Result<u64, Error> {
        let changed = self.conn.execute(single_statement(sql), [])?;
        Ok(changed as u64)
    }

    fn execute_with(&mut self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let changed = self
            .conn
            .execute(single_statement(sql), rusqlite::params_from_iter(params))?;
        Ok(changed as u64)
    }

    fn execute_in_transaction(&mut self, sql: &str) -> Result<u64, Error> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(single_statement(sql), [])?;
        tx.commit()?;
        Ok(changed as u64)
    }

    fn begin(&mut self) -> Result<(), Error> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn query_keys(&mut self, sql: &str) -> Result<Vec<i64>, Error> {
        let mut stmt = self.conn.prepare(single_statement(sql))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn query_count(&mut self, sql: &str) -> Result<u64, Error> {
        let count: i64 = self
            .conn
            .query_row(single_statement(sql), [], |row| row.get(0))?;
        u64::try_from(count).map_err(|_| Error::InvalidData(format!("negative count {count}")))
    }

    fn query_rows_with(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, Error> {
        let mut stmt = self.conn.prepare(single_statement(sql))?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns)
                .map(|i| read_value(row.get_ref(i)?))
                .collect::<Result<Vec<_>, _>>()?;
            result.push(values);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE item (id INTEGER PRIMARY KEY, label TEXT, score INTEGER CHECK (score < 100));
             INSERT INTO item (id, label) VALUES (1, 'a'), (2, 'b'), (3, NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_query_keys_and_count() {
        let mut conn = setup();
        let keys = conn
            .query_keys("SELECT id FROM item WHERE label IS NOT NULL ORDER BY id")
            .unwrap();
        assert_eq!(keys, vec![1, 2]);
        assert_eq!(conn.query_count("SELECT COUNT(*) FROM item").unwrap(), 3);
    }

    #[test]
    fn test_execute_reports_changes() {
        let mut conn = setup();
        let changed = conn
            .execute_in_transaction("UPDATE item SET score = 1 WHERE id IN (1, 2);")
            .unwrap();
        assert_eq!(changed, 2);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let mut conn = setup();
        let result = conn.execute_in_transaction("UPDATE item SET score = id * 40");
        assert!(result.is_err());
        let touched = conn
            .query_count("SELECT COUNT(*) FROM item WHERE score IS NOT NULL")
            .unwrap();
        assert_eq!(touched, 0);
    }

    #[test]
    fn test_query_rows_with_params() {
        let mut conn = setup();
        let rows = conn
            .query_rows_with(
                "SELECT label, id FROM item WHERE id < ?1 ORDER BY id",
                &[Value::Integer(4)],
            )
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::from("a"), Value::Integer(1)],
                vec![Value::from("b"), Value::Integer(2)],
                vec![Value::Null, Value::Integer(3)],
            ]
        );
    }

    #[test]
    fn test_execute_with_binds_text_verbatim() {
        let mut conn = setup();
        let changed = conn
            .execute_with(
                "UPDATE item SET label = ?1 WHERE id = ?2",
                &[Value::from("it's; --"), Value::Integer(3)],
            )
            .unwrap();
        assert_eq!(changed, 1);
        let rows = conn
            .query_rows_with("SELECT label FROM item WHERE id = ?1", &[Value::Integer(3)])
            .unwrap();
        assert_eq!(rows[0][0].as_text(), Some("it's; --"));
    }

    #[test]
    fn test_explicit_transaction() {
        let mut conn = setup();
        conn.begin().unwrap();
        conn.execute("DELETE FROM item").unwrap();
        conn.rollback().unwrap();
        assert_eq!(conn.query_count("SELECT COUNT(*) FROM item").unwrap(), 3);
    }
}
