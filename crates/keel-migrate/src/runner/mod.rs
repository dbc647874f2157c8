//! Query runners.
//!
//! A runner owns one reserved connection: every statement of a
//! synchronization or migration run goes through the same session, so a
//! transaction started on it covers all of them.

mod postgres;
mod sqlite;

use async_trait::async_trait;
use keel_schema::{Dialect, Schema};

pub use postgres::PostgresQueryRunner;
pub use sqlite::SqliteQueryRunner;

use crate::config::{DataSourceOptions, DatabaseKind, DEFAULT_MIGRATIONS_TABLE};
use crate::error::Result;
use crate::history::AppliedMigration;

/// What introspection reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectScope {
    /// Database schema to read; `None` is the connection's current schema.
    pub schema: Option<String>,
    /// History table, never reported as part of the schema.
    pub history_table: String,
}

impl Default for IntrospectScope {
    fn default() -> Self {
        Self {
            schema: None,
            history_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }
}

impl IntrospectScope {
    /// Scope excluding the given history table.
    #[must_use]
    pub fn with_history_table(history_table: impl Into<String>) -> Self {
        Self {
            history_table: history_table.into(),
            ..Self::default()
        }
    }
}

/// A database session able to execute DDL and read its catalog back.
#[async_trait]
pub trait QueryRunner: Send {
    /// Dialect used to diff and emit against this database.
    fn dialect(&self) -> &dyn Dialect;

    /// Executes one statement.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Starts a transaction on the reserved connection.
    async fn start_transaction(&mut self) -> Result<()>;

    /// Commits the active transaction.
    async fn commit_transaction(&mut self) -> Result<()>;

    /// Rolls back the active transaction.
    async fn rollback_transaction(&mut self) -> Result<()>;

    /// Returns true while a transaction is open.
    fn is_transaction_active(&self) -> bool;

    /// Called before a batch of schema changes, outside any transaction.
    async fn before_schema_change(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after a batch of schema changes, outside any transaction.
    async fn after_schema_change(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reads the actual schema.
    ///
    /// Every table is reported, including tables the caller will ignore:
    /// their enum usages still count when deciding whether a type is
    /// shared.
    async fn introspect(&mut self, scope: &IntrospectScope) -> Result<Schema>;

    /// Creates the migration history table if missing.
    async fn ensure_history_table(&mut self, table: &str) -> Result<()>;

    /// Lists applied migrations in the order they were applied.
    async fn applied_migrations(&mut self, table: &str) -> Result<Vec<AppliedMigration>>;

    /// Records a migration as applied.
    async fn record_migration(&mut self, table: &str, timestamp: i64, name: &str) -> Result<()>;

    /// Removes a migration record.
    async fn remove_migration(&mut self, table: &str, timestamp: i64, name: &str) -> Result<()>;
}

/// Opens a runner for the configured data source.
///
/// # Errors
///
/// Returns a configuration error for unknown URL schemes or the
/// connection error.
pub async fn connect(options: &DataSourceOptions) -> Result<Box<dyn QueryRunner>> {
    match options.kind()? {
        DatabaseKind::Sqlite => Ok(Box::new(SqliteQueryRunner::connect(&options.url).await?)),
        DatabaseKind::Postgres => Ok(Box::new(PostgresQueryRunner::connect(&options.url).await?)),
    }
}
