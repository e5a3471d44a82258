//! Database connection seam.
//!
//! The engine only needs a handful of primitives from a database: run a
//! statement (optionally inside its own transaction), group statements in
//! an explicit transaction, select a list of integer keys, count rows, and
//! run small parameterized queries for the step ledger. Each backend
//! implements [`Connection`] over its driver.

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PgConnection;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnection;

use crate::error::Error;

/// SQL dialect of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite 3.35+.
    Sqlite,
    /// PostgreSQL 12+.
    Postgres,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
        }
    }
}

impl Dialect {
    /// Placeholder for the `index`-th (one-based) bound parameter.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Postgres => format!("${index}"),
        }
    }
}

/// A bound parameter or a column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Text.
    Text(String),
}

impl Value {
    /// The value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The value as an integer, if it is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

/// A synchronous database connection used by the migration engine.
pub trait Connection {
    /// The SQL dialect spoken by this connection.
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return the affected row count.
    ///
    /// Outside of [`Connection::begin`] the statement runs in autocommit mode.
    fn execute(&mut self, sql: &str) -> Result<u64, Error>;

    /// Execute a statement with bound parameters.
    fn execute_with(&mut self, sql: &str, params: &[Value]) -> Result<u64, Error>;

    /// Execute a statement inside its own transaction.
    ///
    /// The transaction is committed on success and rolled back on error.
    fn execute_in_transaction(&mut self, sql: &str) -> Result<u64, Error>;

    /// Open an explicit transaction.
    fn begin(&mut self) -> Result<(), Error>;

    /// Commit the transaction opened by [`Connection::begin`].
    fn commit(&mut self) -> Result<(), Error>;

    /// Roll back the transaction opened by [`Connection::begin`].
    fn rollback(&mut self) -> Result<(), Error>;

    /// Run a query whose first column is an integer key.
    fn query_keys(&mut self, sql: &str) -> Result<Vec<i64>, Error>;

    /// Run a query returning a single integer count.
    fn query_count(&mut self, sql: &str) -> Result<u64, Error>;

    /// Run a query with bound parameters and return every row.
    fn query_rows_with(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, Error>;
}

/// Run `f` inside one transaction on `conn`.
///
/// Commits when `f` succeeds. When `f` fails the transaction is rolled
/// back and `f`'s error is returned.
pub fn with_transaction<T, E>(
    conn: &mut dyn Connection,
    f: impl FnOnce(&mut dyn Connection) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<Error>,
{
    conn.begin()?;
    match f(&mut *conn) {
        Ok(value) => match conn.commit() {
            Ok(()) => Ok(value),
            Err(e) => {
                rollback(conn);
                Err(e.into())
            }
        },
        Err(e) => {
            rollback(conn);
            Err(e)
        }
    }
}

fn rollback(conn: &mut dyn Connection) {
    if let Err(e) = conn.rollback() {
        tracing::debug!(error = %e, "rollback failed");
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute(&mut self, sql: &str) -> Result<u64, Error> {
        (**self).execute(sql)
    }

    fn execute_with(&mut self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        (**self).execute_with(sql, params)
    }

    fn execute_in_transaction(&mut self, sql: &str) -> Result<u64, Error> {
        (**self).execute_in_transaction(sql)
    }

    fn begin(&mut self) -> Result<(), Error> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), Error> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), Error> {
        (**self).rollback()
    }

    fn query_keys(&mut self, sql: &str) -> Result<Vec<i64>, Error> {
        (**self).query_keys(sql)
    }

    fn query_count(&mut self, sql: &str) -> Result<u64, Error> {
        (**self).query_count(sql)
    }

    fn query_rows_with(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, Error> {
        (**self).query_rows_with(sql, params)
    }
}

/// Open a connection from a database URL.
///
/// Accepted forms: `sqlite://<path>`, `sqlite::memory:`, a bare file path
/// (SQLite), and `postgres://` / `postgresql://` URLs.
pub fn open(dsn: &str) -> Result<Box<dyn Connection>, Error> {
    if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
        return open_postgres(dsn);
    }

    let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn);
    open_sqlite(path)
}

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &str) -> Result<Box<dyn Connection>, Error> {
    let conn = if path == "sqlite::memory:" || path == ":memory:" {
        SqliteConnection::open_in_memory()?
    } else {
        SqliteConnection::open(path)?
    };
    Ok(Box::new(conn))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(path: &str) -> Result<Box<dyn Connection>, Error> {
    Err(Error::UnsupportedDsn(format!(
        "{path} (built without the `sqlite` feature)"
    )))
}

#[cfg(feature = "postgres")]
fn open_postgres(dsn: &str) -> Result<Box<dyn Connection>, Error> {
    Ok(Box::new(PgConnection::connect(dsn)?))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(dsn: &str) -> Result<Box<dyn Connection>, Error> {
    Err(Error::UnsupportedDsn(format!(
        "{dsn} (built without the `postgres` feature)"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
    }

    #[test]
    fn test_dialect_display() {
        assert_eq!(Dialect::Sqlite.to_string(), "sqlite");
        assert_eq!(Dialect::Postgres.to_string(), "postgres");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_open_sqlite_memory() {
        let conn = open("sqlite::memory:").unwrap();
        assert_eq!(conn.dialect(), Dialect::Sqlite);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_with_transaction_rolls_back_on_error() {
        let mut conn = open("sqlite::memory:").unwrap();
        conn.execute("CREATE TABLE item (id INTEGER PRIMARY KEY)").unwrap();

        let result: Result<(), Error> = with_transaction(&mut *conn, |conn| {
            conn.execute("INSERT INTO item (id) VALUES (1)")?;
            conn.execute("INSERT INTO item (id) VALUES (1)")?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(conn.query_count("SELECT COUNT(*) FROM item").unwrap(), 0);

        with_transaction(&mut *conn, |conn| conn.execute("INSERT INTO item (id) VALUES (2)")).unwrap();
        assert_eq!(conn.query_count("SELECT COUNT(*) FROM item").unwrap(), 1);
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn test_open_postgres_without_feature() {
        let result = open("postgres://localhost/app");
        assert!(matches!(result, Err(Error::UnsupportedDsn(_))));
    }
}
