//! Migration executor.
//!
//! This module handles applying and reverting migrations against a
//! database, keeping the history table in step with the schema.

use tracing::{error, info, warn};

use crate::config::{DataSourceOptions, TransactionMode, DEFAULT_MIGRATIONS_TABLE};
use crate::error::{MigrateError, Result};
use crate::history::AppliedMigration;
use crate::migration::Migration;
use crate::runner::QueryRunner;

/// State of one migration, local or recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration timestamp (milliseconds).
    pub timestamp: i64,
    /// Migration name.
    pub name: String,
    /// Recorded in the history table.
    pub applied: bool,
    /// A definition exists in the loaded migration set.
    pub local: bool,
}

/// Runs a set of migrations against a query runner.
pub struct MigrationExecutor {
    migrations: Vec<Box<dyn Migration>>,
    table: String,
    transaction: TransactionMode,
}

impl MigrationExecutor {
    /// Creates an executor. Migrations are ordered by timestamp, then
    /// name.
    #[must_use]
    pub fn new(mut migrations: Vec<Box<dyn Migration>>) -> Self {
        migrations.sort_by(|a, b| (a.timestamp(), a.name()).cmp(&(b.timestamp(), b.name())));
        Self {
            migrations,
            table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            transaction: TransactionMode::default(),
        }
    }

    /// Creates an executor using the history table and transaction mode
    /// of a data source.
    #[must_use]
    pub fn from_options(migrations: Vec<Box<dyn Migration>>, options: &DataSourceOptions) -> Self {
        Self::new(migrations)
            .with_table(options.migrations_table.clone())
            .with_transaction(options.transaction)
    }

    /// Sets the history table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Sets the transaction mode.
    #[must_use]
    pub const fn with_transaction(mut self, transaction: TransactionMode) -> Self {
        self.transaction = transaction;
        self
    }

    /// Returns the loaded migrations in execution order.
    #[must_use]
    pub fn migrations(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    /// Returns migrations not recorded in the history table.
    ///
    /// # Errors
    ///
    /// Returns the database error of reading the history.
    pub async fn pending(&self, runner: &mut dyn QueryRunner) -> Result<Vec<&dyn Migration>> {
        runner.ensure_history_table(&self.table).await?;
        let applied = runner.applied_migrations(&self.table).await?;
        let mut pending: Vec<&dyn Migration> = Vec::new();
        for migration in &self.migrations {
            if !is_recorded(&applied, migration.as_ref()) {
                pending.push(migration.as_ref());
            }
        }
        Ok(pending)
    }

    /// Applies every pending migration in order. Returns the identifiers
    /// of the applied migrations.
    ///
    /// # Errors
    ///
    /// Returns the first failing migration's error. Its own statements are
    /// rolled back when it runs in a transaction; with
    /// [`TransactionMode::All`] the whole run is rolled back.
    pub async fn run(&self, runner: &mut dyn QueryRunner) -> Result<Vec<String>> {
        let pending = self.pending(runner).await?;
        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(Vec::new());
        }
        info!(count = pending.len(), "Running migrations");

        let transactional = self.transactional(runner);
        let outer = transactional && self.transaction == TransactionMode::All;
        let each = transactional && self.transaction == TransactionMode::Each;

        runner.before_schema_change().await?;
        let result = self.apply_pending(runner, &pending, outer, each).await;
        let restored = runner.after_schema_change().await;
        let applied = result?;
        restored?;
        Ok(applied)
    }

    /// Reverts the most recently applied migration. Returns its
    /// identifier, or `None` when nothing is applied.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::MigrationNotFound`] if the last applied
    /// migration has no local definition, or the error of its `down`.
    pub async fn revert_last(&self, runner: &mut dyn QueryRunner) -> Result<Option<String>> {
        runner.ensure_history_table(&self.table).await?;
        let applied = runner.applied_migrations(&self.table).await?;
        let Some(last) = applied.last() else {
            info!("No migrations to revert");
            return Ok(None);
        };
        let migration = self
            .migrations
            .iter()
            .find(|m| last.matches(m.timestamp(), m.name()))
            .ok_or_else(|| {
                MigrateError::MigrationNotFound(format!("{}-{}", last.timestamp, last.name))
            })?
            .as_ref();

        info!(
            timestamp = migration.timestamp(),
            name = %migration.name(),
            "Reverting migration"
        );

        let transactional = self.transactional(runner);
        runner.before_schema_change().await?;
        let result = self.revert_one(runner, migration, transactional).await;
        let restored = runner.after_schema_change().await;
        result?;
        restored?;

        info!(
            timestamp = migration.timestamp(),
            name = %migration.name(),
            "Migration reverted successfully"
        );
        Ok(Some(migration.id()))
    }

    /// Lists local and recorded migrations with their applied state.
    ///
    /// # Errors
    ///
    /// Returns the database error of reading the history.
    pub async fn status(&self, runner: &mut dyn QueryRunner) -> Result<Vec<MigrationStatus>> {
        runner.ensure_history_table(&self.table).await?;
        let applied = runner.applied_migrations(&self.table).await?;

        let mut statuses: Vec<MigrationStatus> = self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                timestamp: m.timestamp(),
                name: m.name().to_string(),
                applied: is_recorded(&applied, m.as_ref()),
                local: true,
            })
            .collect();
        for record in &applied {
            if !self
                .migrations
                .iter()
                .any(|m| record.matches(m.timestamp(), m.name()))
            {
                warn!(
                    timestamp = record.timestamp,
                    name = %record.name,
                    "Applied migration has no local definition"
                );
                statuses.push(MigrationStatus {
                    timestamp: record.timestamp,
                    name: record.name.clone(),
                    applied: true,
                    local: false,
                });
            }
        }
        statuses.sort_by(|a, b| (a.timestamp, &a.name).cmp(&(b.timestamp, &b.name)));
        Ok(statuses)
    }

    fn transactional(&self, runner: &dyn QueryRunner) -> bool {
        self.transaction != TransactionMode::None
            && runner.dialect().capabilities().transactional_ddl
    }

    async fn apply_pending(
        &self,
        runner: &mut dyn QueryRunner,
        pending: &[&dyn Migration],
        outer: bool,
        each: bool,
    ) -> Result<Vec<String>> {
        if outer {
            runner.start_transaction().await?;
        }

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            if let Err(e) = self.apply_one(runner, *migration, each).await {
                if outer {
                    rollback(runner).await;
                }
                return Err(e);
            }
            applied.push(migration.id());
        }

        if outer {
            runner.commit_transaction().await?;
        }
        Ok(applied)
    }

    async fn apply_one(
        &self,
        runner: &mut dyn QueryRunner,
        migration: &dyn Migration,
        transactional: bool,
    ) -> Result<()> {
        info!(
            timestamp = migration.timestamp(),
            name = %migration.name(),
            "Applying migration"
        );

        if transactional {
            runner.start_transaction().await?;
        }
        let result = match migration.up(runner).await {
            Ok(()) => {
                runner
                    .record_migration(&self.table, migration.timestamp(), migration.name())
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(name = %migration.name(), error = %e, "Migration failed");
            if transactional {
                rollback(runner).await;
            }
            return Err(e);
        }
        if transactional {
            runner.commit_transaction().await?;
        }

        info!(
            timestamp = migration.timestamp(),
            name = %migration.name(),
            "Migration applied successfully"
        );
        Ok(())
    }

    async fn revert_one(
        &self,
        runner: &mut dyn QueryRunner,
        migration: &dyn Migration,
        transactional: bool,
    ) -> Result<()> {
        if transactional {
            runner.start_transaction().await?;
        }
        let result = match migration.down(runner).await {
            Ok(()) => {
                runner
                    .remove_migration(&self.table, migration.timestamp(), migration.name())
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(name = %migration.name(), error = %e, "Revert failed");
            if transactional {
                rollback(runner).await;
            }
            return Err(e);
        }
        if transactional {
            runner.commit_transaction().await?;
        }
        Ok(())
    }
}

fn is_recorded(applied: &[AppliedMigration], migration: &dyn Migration) -> bool {
    applied
        .iter()
        .any(|a| a.matches(migration.timestamp(), migration.name()))
}

async fn rollback(runner: &mut dyn QueryRunner) {
    if let Err(e) = runner.rollback_transaction().await {
        warn!(error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::SqlMigration;
    use crate::runner::{IntrospectScope, SqliteQueryRunner};
    use keel_schema::TableName;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_runner() -> SqliteQueryRunner {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        SqliteQueryRunner::new(pool).await.unwrap()
    }

    fn create_users_migration() -> Box<dyn Migration> {
        Box::new(SqlMigration::new(
            1_000,
            "CreateUsers",
            vec!["CREATE TABLE \"users\" (\"id\" integer PRIMARY KEY AUTOINCREMENT)".to_string()],
            vec!["DROP TABLE \"users\"".to_string()],
        ))
    }

    fn add_email_migration() -> Box<dyn Migration> {
        Box::new(SqlMigration::new(
            2_000,
            "AddEmail",
            vec!["ALTER TABLE \"users\" ADD \"email\" varchar(255)".to_string()],
            vec!["ALTER TABLE \"users\" DROP COLUMN \"email\"".to_string()],
        ))
    }

    fn broken_migration() -> Box<dyn Migration> {
        Box::new(SqlMigration::new(
            3_000,
            "Broken",
            vec![
                "CREATE TABLE \"posts\" (\"id\" integer)".to_string(),
                "ALTER TABLE \"missing\" ADD \"x\" integer".to_string(),
            ],
            vec!["DROP TABLE \"posts\"".to_string()],
        ))
    }

    async fn table_names(runner: &mut SqliteQueryRunner) -> Vec<TableName> {
        runner
            .introspect(&IntrospectScope::default())
            .await
            .unwrap()
            .tables
            .into_iter()
            .map(|t| t.name)
            .collect()
    }

    #[tokio::test]
    async fn test_run_applies_in_timestamp_order() {
        let mut runner = create_test_runner().await;
        let executor = MigrationExecutor::new(vec![add_email_migration(), create_users_migration()]);

        let applied = executor.run(&mut runner).await.unwrap();
        assert_eq!(applied, vec!["1000-CreateUsers", "2000-AddEmail"]);

        let schema = runner.introspect(&IntrospectScope::default()).await.unwrap();
        let users = schema.table(&TableName::new("users")).unwrap();
        assert!(users.column("email").is_some());

        // Second run is a no-op
        assert!(executor.run(&mut runner).await.unwrap().is_empty());
        assert!(executor.pending(&mut runner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revert_last() {
        let mut runner = create_test_runner().await;
        let executor = MigrationExecutor::new(vec![create_users_migration(), add_email_migration()]);
        executor.run(&mut runner).await.unwrap();

        let reverted = executor.revert_last(&mut runner).await.unwrap();
        assert_eq!(reverted.as_deref(), Some("2000-AddEmail"));
        let schema = runner.introspect(&IntrospectScope::default()).await.unwrap();
        assert!(schema
            .table(&TableName::new("users"))
            .unwrap()
            .column("email")
            .is_none());

        assert_eq!(
            executor.revert_last(&mut runner).await.unwrap().as_deref(),
            Some("1000-CreateUsers")
        );
        assert!(table_names(&mut runner).await.is_empty());
        assert!(executor.revert_last(&mut runner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_migration_rolls_back_its_own_statements() {
        let mut runner = create_test_runner().await;
        let executor = MigrationExecutor::new(vec![create_users_migration(), broken_migration()]);

        assert!(executor.run(&mut runner).await.is_err());
        assert_eq!(table_names(&mut runner).await, vec![TableName::new("users")]);

        let statuses = executor.status(&mut runner).await.unwrap();
        let applied: Vec<(&str, bool)> = statuses
            .iter()
            .map(|s| (s.name.as_str(), s.applied))
            .collect();
        assert_eq!(applied, vec![("CreateUsers", true), ("Broken", false)]);
    }

    #[tokio::test]
    async fn test_transaction_all_rolls_back_whole_run() {
        let mut runner = create_test_runner().await;
        let executor = MigrationExecutor::new(vec![create_users_migration(), broken_migration()])
            .with_transaction(TransactionMode::All);

        assert!(executor.run(&mut runner).await.is_err());
        assert!(table_names(&mut runner).await.is_empty());
        assert_eq!(executor.pending(&mut runner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_custom_history_table() {
        let mut runner = create_test_runner().await;
        let executor =
            MigrationExecutor::new(vec![create_users_migration()]).with_table("schema_history");
        executor.run(&mut runner).await.unwrap();

        let applied = runner.applied_migrations("schema_history").await.unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].matches(1_000, "CreateUsers"));
    }

    #[tokio::test]
    async fn test_status_reports_unknown_applied_migrations() {
        let mut runner = create_test_runner().await;
        let executor = MigrationExecutor::new(vec![create_users_migration()]);
        runner.ensure_history_table(DEFAULT_MIGRATIONS_TABLE).await.unwrap();
        runner
            .record_migration(DEFAULT_MIGRATIONS_TABLE, 500, "Vanished")
            .await
            .unwrap();

        let statuses = executor.status(&mut runner).await.unwrap();
        assert_eq!(
            statuses,
            vec![
                MigrationStatus {
                    timestamp: 500,
                    name: "Vanished".to_string(),
                    applied: true,
                    local: false,
                },
                MigrationStatus {
                    timestamp: 1_000,
                    name: "CreateUsers".to_string(),
                    applied: false,
                    local: true,
                },
            ]
        );

        let err = executor.revert_last(&mut runner).await.unwrap_err();
        assert!(matches!(err, MigrateError::MigrationNotFound(id) if id == "500-Vanished"));
    }
}
