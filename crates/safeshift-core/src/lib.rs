//! Safeshift Core - batched, resumable schema migrations.
//!
//! This crate provides the migration engine and the database connection
//! adapters it runs on.

pub mod connection;
pub mod error;
pub mod migration;

pub use connection::{Connection, Dialect, Value};
pub use error::Error;
pub use migration::{
    CancellationToken, ExecutorConfig, MigrationError, MigrationExecutor, MigrationPlan,
    MigrationStep, PlanResult, RevertResult,
};

#[cfg(feature = "sqlite")]
pub use connection::SqliteConnection;

#[cfg(feature = "postgres")]
pub use connection::PgConnection;
