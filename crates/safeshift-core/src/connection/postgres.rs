//! PostgreSQL connection adapter.
//!
//! sqlx is async, the engine is not: the adapter owns a current-thread
//! tokio runtime and blocks on each round trip. Statements go through the
//! simple query protocol so that commands such as
//! `CREATE INDEX CONCURRENTLY` are not wrapped in an implicit transaction.

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Connection as _, Postgres, Row};

use super::{Connection, Dialect, Value};
use crate::error::Error;

/// A [`Connection`] backed by one sqlx PostgreSQL connection.
pub struct PgConnection {
    runtime: tokio::runtime::Runtime,
    conn: sqlx::PgConnection,
}

impl PgConnection {
    /// Connect to a `postgres://` URL.
    pub fn connect(url: &str) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let conn = runtime.block_on(sqlx::PgConnection::connect(url))?;
        Ok(Self { runtime, conn })
    }
}

fn bind<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Integer(value) => query.bind(*value),
            Value::Text(text) => query.bind(text.clone()),
        };
    }
    query
}

fn read_value(row: &PgRow, index: usize) -> Result<Value, Error> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value.map_or(Value::Null, Value::Integer));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return Ok(value.map_or(Value::Null, |v| Value::Integer(i64::from(v))));
    }
    let value = row.try_get::<Option<String>, _>(index)?;
    Ok(value.map_or(Value::Null, Value::Text))
}

impl Connection for PgConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&mut self, sql: &str) -> Result<u64, Error> {
        let conn = &mut self.conn;
        let result = self
            .runtime
            .block_on(async move { sqlx::raw_sql(sql).execute(conn).await })?;
        Ok(result.rows_affected())
    }

    fn execute_with(&mut self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let conn = &mut self.conn;
        let query = bind(sqlx::query(sql), params);
        let result = self
            .runtime
            .block_on(async move { query.execute(conn).await })?;
        Ok(result.rows_affected())
    }

    fn execute_in_transaction(&mut self, sql: &str) -> Result<u64, Error> {
        let conn = &mut self.conn;
        let affected = self.runtime.block_on(async move {
            let mut tx = conn.begin().await?;
            let result = sqlx::raw_sql(sql).execute(&mut *tx).await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(result.rows_affected())
        })?;
        Ok(affected)
    }

    fn begin(&mut self) -> Result<(), Error> {
        self.execute("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.execute("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        self.execute("ROLLBACK")?;
        Ok(())
    }

    fn query_keys(&mut self, sql: &str) -> Result<Vec<i64>, Error> {
        let conn = &mut self.conn;
        let rows = self
            .runtime
            .block_on(async move { sqlx::query(sql).fetch_all(conn).await })?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            // Accept both bigint and integer primary keys.
            let key = match row.try_get::<i64, _>(0) {
                Ok(key) => key,
                Err(_) => i64::from(row.try_get::<i32, _>(0)?),
            };
            keys.push(key);
        }
        Ok(keys)
    }

    fn query_count(&mut self, sql: &str) -> Result<u64, Error> {
        let conn = &mut self.conn;
        let count: i64 = self
            .runtime
            .block_on(async move { sqlx::query_scalar(sql).fetch_one(conn).await })?;
        u64::try_from(count).map_err(|_| Error::InvalidData(format!("negative count {count}")))
    }

    fn query_rows_with(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, Error> {
        let conn = &mut self.conn;
        let query = bind(sqlx::query(sql), params);
        let rows = self
            .runtime
            .block_on(async move { query.fetch_all(conn).await })?;

        rows.iter()
            .map(|row| (0..row.len()).map(|i| read_value(row, i)).collect())
            .collect()
    }
}
