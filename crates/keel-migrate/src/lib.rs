//! Schema synchronization and migrations for keel.
//!
//! `keel-migrate` connects the pure `keel-schema` core to live databases:
//!
//! - **Runners** - one reserved connection per database, executing DDL
//!   and introspecting the catalog (SQLite, PostgreSQL)
//! - **Sync** - diffs the desired schema against the database and applies
//!   the result (`synchronize`), or returns it as SQL (`log_sync_sql`)
//! - **Migrations** - timestamped up/down units tracked in a history table
//! - **Writer** - generates migration files from pending schema changes
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_migrate::prelude::*;
//! use keel_schema::prelude::*;
//!
//! let desired = EntityRegistry::new()
//!     .with(
//!         TableBuilder::new()
//!             .name("users")
//!             .column(integer("id").primary().increment().build())
//!             .build(),
//!     )
//!     .build()?;
//!
//! let mut runner = SqliteQueryRunner::connect("sqlite::memory:").await?;
//! let sync = SchemaSync::new(desired);
//!
//! let pending = sync.log_sync_sql(&mut runner).await?;
//! println!("{:#?}", pending.up_queries);
//!
//! sync.synchronize(&mut runner, false).await?;
//! assert!(sync.log_sync_sql(&mut runner).await?.is_empty());
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Show the SQL a synchronization would run
//! keel-migrate --schema schema.json schema-log
//!
//! # Generate a migration from pending changes
//! keel-migrate --schema schema.json migration-generate AddEmail
//!
//! # Apply pending migrations
//! keel-migrate migration-run
//!
//! # Revert the last applied migration
//! keel-migrate migration-revert
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod migration;
mod parse;
pub mod runner;
pub mod sync;
pub mod writer;

pub use config::{DataSourceOptions, DatabaseKind, TransactionMode};
pub use error::{MigrateError, Result};
pub use executor::{MigrationExecutor, MigrationStatus};
pub use migration::{load_migrations, Migration, SqlMigration};
pub use runner::{IntrospectScope, PostgresQueryRunner, QueryRunner, SqliteQueryRunner};
pub use sync::SchemaSync;
pub use writer::{MigrationFormat, MigrationWriter};

/// Prelude for convenient imports.
///
/// Generated Rust migrations start with `use keel_migrate::prelude::*;`.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::config::{DataSourceOptions, DatabaseKind, TransactionMode};
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::{MigrationExecutor, MigrationStatus};
    pub use crate::history::AppliedMigration;
    pub use crate::migration::{load_migrations, Migration, SqlMigration};
    pub use crate::runner::{
        connect, IntrospectScope, PostgresQueryRunner, QueryRunner, SqliteQueryRunner,
    };
    pub use crate::sync::SchemaSync;
    pub use crate::writer::{MigrationFormat, MigrationWriter};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    struct CreateWidgets;

    #[async_trait]
    impl Migration for CreateWidgets {
        fn name(&self) -> &str {
            "CreateWidgets"
        }

        fn timestamp(&self) -> i64 {
            42
        }

        async fn up(&self, runner: &mut dyn QueryRunner) -> Result<()> {
            runner
                .execute(r#"CREATE TABLE "widgets" ("id" integer)"#)
                .await?;
            Ok(())
        }

        async fn down(&self, runner: &mut dyn QueryRunner) -> Result<()> {
            runner.execute(r#"DROP TABLE "widgets""#).await?;
            Ok(())
        }
    }

    #[test]
    fn test_migration_trait() {
        let migration = CreateWidgets;
        assert_eq!(migration.name(), "CreateWidgets");
        assert_eq!(migration.id(), "42-CreateWidgets");
    }

    #[tokio::test]
    async fn test_rust_migration_runs_through_executor() {
        let mut runner = SqliteQueryRunner::connect("sqlite::memory:").await.unwrap();
        let executor = MigrationExecutor::new(vec![Box::new(CreateWidgets)]);

        assert_eq!(executor.run(&mut runner).await.unwrap(), vec!["42-CreateWidgets"]);
        assert_eq!(
            executor.revert_last(&mut runner).await.unwrap().as_deref(),
            Some("42-CreateWidgets")
        );
    }
}
