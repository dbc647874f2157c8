//! Migration history tracking.
//!
//! The history table (`keel_migrations` by default) records which
//! migrations have been applied. Its DDL is produced by the emitter so
//! that each dialect gets its own auto-increment syntax.

use keel_schema::builder::{bigint, varchar, TableBuilder};
use keel_schema::{emit, ChangeOperation, Dialect, Table};

use crate::error::{MigrateError, Result};

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Unique ID in the history table.
    pub id: i64,
    /// Migration timestamp (milliseconds).
    pub timestamp: i64,
    /// Migration name.
    pub name: String,
}

impl AppliedMigration {
    /// Returns true if this record belongs to the given migration.
    #[must_use]
    pub fn matches(&self, timestamp: i64, name: &str) -> bool {
        self.timestamp == timestamp && self.name == name
    }
}

/// Definition of the history table.
#[must_use]
pub fn history_table(name: &str) -> Table {
    TableBuilder::new()
        .name(name)
        .column(bigint("id").primary().increment().build())
        .column(bigint("timestamp").not_null().build())
        .column(varchar("name", 255).not_null().build())
        .build()
}

/// `CREATE TABLE IF NOT EXISTS` statement for the history table.
///
/// # Errors
///
/// Returns the emitter error if the dialect cannot create the table.
pub fn create_history_table_sql(dialect: &dyn Dialect, name: &str) -> Result<String> {
    let pair = emit(
        &ChangeOperation::CreateTable {
            table: history_table(name),
        },
        dialect,
    )?;
    let create = pair
        .up
        .into_iter()
        .next()
        .ok_or_else(|| MigrateError::Config(format!("no DDL for history table '{name}'")))?;
    Ok(create.replacen("CREATE TABLE", "CREATE TABLE IF NOT EXISTS", 1))
}
