//! Core error types.

use thiserror::Error;

/// Database and I/O errors raised below the migration engine.
#[derive(Debug, Error)]
pub enum Error {
    /// SQLite driver error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL driver error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Plan or report (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A query returned data of an unexpected shape.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A name that must be a plain SQL identifier is not one.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The DSN names a backend this build does not support.
    #[error("unsupported database url: {0}")]
    UnsupportedDsn(String),
}
