//! Schema synchronization.
//!
//! Introspects the live database, diffs it against the desired schema,
//! plans and emits the changes and executes them one statement at a time
//! through a single [`QueryRunner`].

use keel_schema::{emit_all, DiffOptions, Differ, Planner, Schema, SqlInMemory};
use tracing::{debug, error, info};

use crate::config::{DataSourceOptions, TransactionMode};
use crate::error::{MigrateError, Result};
use crate::runner::{IntrospectScope, QueryRunner};

/// Synchronizes one database with a desired schema.
#[derive(Debug, Clone)]
pub struct SchemaSync {
    desired: Schema,
    diff_options: DiffOptions,
    scope: IntrospectScope,
    transaction: TransactionMode,
}

impl SchemaSync {
    /// Creates a synchronizer with default options.
    #[must_use]
    pub fn new(desired: Schema) -> Self {
        Self {
            desired,
            diff_options: DiffOptions::default(),
            scope: IntrospectScope::default(),
            transaction: TransactionMode::default(),
        }
    }

    /// Creates a synchronizer configured from data source options.
    #[must_use]
    pub fn from_options(desired: Schema, options: &DataSourceOptions) -> Self {
        Self {
            desired,
            diff_options: options.diff_options(),
            scope: IntrospectScope::with_history_table(&options.migrations_table),
            transaction: options.transaction,
        }
    }

    /// Replaces the diff options.
    #[must_use]
    pub fn with_diff_options(mut self, options: DiffOptions) -> Self {
        self.diff_options = options;
        self
    }

    /// Replaces the introspection scope.
    #[must_use]
    pub fn with_scope(mut self, scope: IntrospectScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the transaction mode.
    #[must_use]
    pub const fn with_transaction(mut self, transaction: TransactionMode) -> Self {
        self.transaction = transaction;
        self
    }

    /// Returns the desired schema.
    #[must_use]
    pub const fn desired(&self) -> &Schema {
        &self.desired
    }

    /// Computes the SQL a synchronization would execute, without executing
    /// it.
    ///
    /// # Errors
    ///
    /// Returns introspection errors, and unsupported-change or cyclic
    /// dependency errors from the core.
    pub async fn log_sync_sql(&self, runner: &mut dyn QueryRunner) -> Result<SqlInMemory> {
        self.pending_sql(runner, &self.desired, self.diff_options.clone())
            .await
    }

    /// Applies the diff between the desired and the actual schema.
    ///
    /// With `drop_before_sync` every scoped table and enum type is dropped
    /// first. Returns the executed statements.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::DdlExecution`] when the database rejects a
    /// statement; any error of [`Self::log_sync_sql`] aborts before SQL
    /// is executed.
    pub async fn synchronize(
        &self,
        runner: &mut dyn QueryRunner,
        drop_before_sync: bool,
    ) -> Result<Vec<String>> {
        let mut executed = Vec::new();
        if drop_before_sync {
            executed.extend(self.drop_schema(runner).await?);
        }

        let sql = self.log_sync_sql(runner).await?;
        if sql.is_empty() {
            info!("Schema is up to date");
            return Ok(executed);
        }

        info!(statements = sql.up_queries.len(), "Synchronizing schema");
        executed.extend(self.execute_all(runner, &sql.up_queries).await?);
        info!("Schema synchronized");
        Ok(executed)
    }

    /// Drops every scoped table and enum type. Returns the executed
    /// statements.
    ///
    /// # Errors
    ///
    /// Same as [`Self::synchronize`].
    pub async fn drop_schema(&self, runner: &mut dyn QueryRunner) -> Result<Vec<String>> {
        let options = DiffOptions {
            drop_unknown_tables: true,
            ..self.diff_options.clone()
        };
        let sql = self.pending_sql(runner, &Schema::new(), options).await?;
        if sql.is_empty() {
            return Ok(Vec::new());
        }
        info!(statements = sql.up_queries.len(), "Dropping schema");
        self.execute_all(runner, &sql.up_queries).await
    }

    async fn pending_sql(
        &self,
        runner: &mut dyn QueryRunner,
        desired: &Schema,
        options: DiffOptions,
    ) -> Result<SqlInMemory> {
        let actual = runner.introspect(&self.scope).await?;
        let dialect = runner.dialect();

        let operations = Differ::new(dialect).with_options(options).diff(desired, &actual)?;
        debug!(operations = operations.len(), "Computed schema diff");
        let planned = Planner::new(dialect.capabilities()).plan(operations)?;
        Ok(emit_all(&planned, dialect)?)
    }

    /// Executes statements in order, inside one transaction when the
    /// dialect supports transactional DDL and the mode allows it.
    async fn execute_all(
        &self,
        runner: &mut dyn QueryRunner,
        statements: &[String],
    ) -> Result<Vec<String>> {
        let transactional = runner.dialect().capabilities().transactional_ddl
            && self.transaction != TransactionMode::None;

        runner.before_schema_change().await?;
        if transactional {
            runner.start_transaction().await?;
        }

        let mut executed = Vec::with_capacity(statements.len());
        for sql in statements {
            if let Err(e) = runner.execute(sql).await {
                error!(sql = %sql, error = %e, "Statement failed");
                let rolled_back = transactional && runner.rollback_transaction().await.is_ok();
                runner.after_schema_change().await?;
                return Err(MigrateError::DdlExecution {
                    sql: sql.clone(),
                    message: e.to_string(),
                    executed,
                    rolled_back,
                });
            }
            executed.push(sql.clone());
        }

        if transactional {
            runner.commit_transaction().await?;
        }
        runner.after_schema_change().await?;
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::SqliteQueryRunner;
    use keel_schema::builder::{integer, varchar, TableBuilder};
    use keel_schema::EntityRegistry;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_runner() -> SqliteQueryRunner {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        SqliteQueryRunner::new(pool).await.unwrap()
    }

    fn users_schema() -> Schema {
        EntityRegistry::new()
            .with(
                TableBuilder::new()
                    .name("users")
                    .column(integer("id").primary().increment().build())
                    .column(varchar("email", 255).not_null().build())
                    .build(),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_log_sync_sql_does_not_execute() {
        let mut runner = create_test_runner().await;
        let sync = SchemaSync::new(users_schema());

        let sql = sync.log_sync_sql(&mut runner).await.unwrap();
        assert_eq!(sql.up_queries.len(), 1);
        assert!(sql.up_queries[0].starts_with("CREATE TABLE \"users\""));
        assert_eq!(sql.down_queries, vec!["DROP TABLE \"users\""]);

        let schema = runner.introspect(&IntrospectScope::default()).await.unwrap();
        assert!(schema.tables.is_empty());
    }

    #[tokio::test]
    async fn test_synchronize_then_nothing_pending() {
        let mut runner = create_test_runner().await;
        let sync = SchemaSync::new(users_schema());

        let executed = sync.synchronize(&mut runner, false).await.unwrap();
        assert_eq!(executed.len(), 1);
        assert!(sync.log_sync_sql(&mut runner).await.unwrap().is_empty());
        assert!(sync.synchronize(&mut runner, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_before_sync_recreates() {
        let mut runner = create_test_runner().await;
        let sync = SchemaSync::new(users_schema());
        sync.synchronize(&mut runner, false).await.unwrap();
        runner
            .execute("INSERT INTO \"users\" (\"email\") VALUES ('a@example.com')")
            .await
            .unwrap();

        let executed = sync.synchronize(&mut runner, true).await.unwrap();
        assert_eq!(executed[0], "DROP TABLE \"users\"");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM \"users\"")
            .fetch_one(runner.connection())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_ignored_tables_survive_drop() {
        let mut runner = create_test_runner().await;
        runner
            .execute("CREATE TABLE \"legacy\" (\"id\" integer)")
            .await
            .unwrap();

        let sync = SchemaSync::new(Schema::new()).with_diff_options(DiffOptions {
            ignored_tables: [keel_schema::TableName::new("legacy")].into_iter().collect(),
            drop_unknown_tables: true,
        });
        assert!(sync.drop_schema(&mut runner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back() {
        let mut runner = create_test_runner().await;
        let sync = SchemaSync::new(Schema::new());
        let statements = vec![
            "CREATE TABLE \"a\" (\"id\" integer)".to_string(),
            "CREATE TABLE \"a\" (\"id\" integer)".to_string(),
        ];

        let err = sync.execute_all(&mut runner, &statements).await.unwrap_err();
        match err {
            MigrateError::DdlExecution {
                sql,
                executed,
                rolled_back,
                ..
            } => {
                assert_eq!(sql, statements[1]);
                assert_eq!(executed, vec![statements[0].clone()]);
                assert!(rolled_back);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runner.is_transaction_active());
        let schema = runner.introspect(&IntrospectScope::default()).await.unwrap();
        assert!(schema.tables.is_empty());
    }
}
