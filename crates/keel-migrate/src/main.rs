//! keel-migrate CLI
//!
//! Command-line tool for synchronizing schemas and managing migrations.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use keel_migrate::prelude::*;
use keel_schema::{Schema, SqlInMemory};

/// Schema synchronization and migrations.
#[derive(Parser)]
#[command(name = "keel-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (overrides the configuration file).
    #[arg(short, long, env = "DATABASE_URL")]
    database: Option<String>,

    /// Configuration file.
    #[arg(short, long, default_value = "keel.json")]
    config: PathBuf,

    /// Desired schema document (overrides the configuration file).
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Migrations directory (overrides the configuration file).
    #[arg(short, long)]
    migrations_dir: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the SQL a schema synchronization would run.
    SchemaLog,

    /// Synchronize the database with the desired schema.
    SchemaSync {
        /// Drop every table and enum type first.
        #[arg(long)]
        drop: bool,
    },

    /// Drop every table and enum type.
    SchemaDrop,

    /// Generate a migration from pending schema changes.
    MigrationGenerate {
        /// Migration name.
        name: String,

        /// Print the migration without writing it.
        #[arg(long)]
        dry_run: bool,

        /// Write a Rust migration instead of SQL.
        #[arg(long)]
        rust: bool,
    },

    /// Create an empty migration file.
    MigrationCreate {
        /// Migration name.
        name: String,

        /// Write a Rust migration instead of SQL.
        #[arg(long)]
        rust: bool,
    },

    /// Apply pending migrations.
    MigrationRun,

    /// Revert the last applied migration.
    MigrationRevert,

    /// Show migration status.
    MigrationShow,
}

const DEFAULT_DATABASE_URL: &str = "sqlite:db.sqlite3";

/// Reads the configuration file, if any, and applies command-line
/// overrides.
fn load_options(cli: &Cli) -> anyhow::Result<DataSourceOptions> {
    let mut options = if cli.config.exists() {
        DataSourceOptions::from_file(&cli.config)?
    } else {
        DataSourceOptions::new(DEFAULT_DATABASE_URL)
    };
    if let Some(url) = &cli.database {
        options.url.clone_from(url);
    }
    if let Some(schema) = &cli.schema {
        options.schema_file = Some(schema.clone());
    }
    if let Some(dir) = &cli.migrations_dir {
        options.migrations_dir.clone_from(dir);
    }
    Ok(options)
}

const fn format_of(rust: bool) -> MigrationFormat {
    if rust {
        MigrationFormat::Rust
    } else {
        MigrationFormat::Sql
    }
}

fn print_sql(sql: &SqlInMemory) {
    for statement in &sql.up_queries {
        println!("{statement};");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = load_options(&cli)?;

    match cli.command {
        Commands::SchemaLog => {
            let sync = SchemaSync::from_options(options.desired_schema()?, &options);
            let mut runner = connect(&options).await?;
            let sql = sync.log_sync_sql(runner.as_mut()).await?;
            if sql.is_empty() {
                info!("Your schema is up to date - there are no queries to be executed.");
            } else {
                info!(count = sql.up_queries.len(), "Schema synchronization will execute:");
                print_sql(&sql);
            }
        }

        Commands::SchemaSync { drop } => {
            let sync = SchemaSync::from_options(options.desired_schema()?, &options);
            let mut runner = connect(&options).await?;
            let executed = sync.synchronize(runner.as_mut(), drop).await?;
            info!(count = executed.len(), "Schema synchronization finished successfully.");
        }

        Commands::SchemaDrop => {
            let sync = SchemaSync::from_options(Schema::new(), &options);
            let mut runner = connect(&options).await?;
            let executed = sync.drop_schema(runner.as_mut()).await?;
            info!(count = executed.len(), "Database schema has been dropped successfully.");
        }

        Commands::MigrationGenerate {
            name,
            dry_run,
            rust,
        } => {
            let sync = SchemaSync::from_options(options.desired_schema()?, &options);
            let mut runner = connect(&options).await?;
            let sql = sync.log_sync_sql(runner.as_mut()).await?;
            if sql.is_empty() {
                info!("No changes in database schema were found - cannot generate a migration.");
                return Ok(());
            }

            let writer = MigrationWriter::now(&name);
            let format = format_of(rust);
            if dry_run {
                println!("Would create migration: {}", writer.file_name(format));
                println!("\n{}", writer.render(&sql, format));
            } else {
                let path = writer.write(&options.migrations_dir, &sql, format)?;
                info!("Migration {} has been generated successfully.", path.display());
            }
        }

        Commands::MigrationCreate { name, rust } => {
            let writer = MigrationWriter::now(&name);
            let path = writer.write(
                &options.migrations_dir,
                &SqlInMemory::default(),
                format_of(rust),
            )?;
            info!("Migration {} has been created successfully.", path.display());
        }

        Commands::MigrationRun => {
            let executor = executor_for(&options)?;
            let mut runner = connect(&options).await?;
            let applied = executor.run(runner.as_mut()).await?;
            for id in &applied {
                println!(" [X] {id}");
            }
            info!(count = applied.len(), "Migrations applied.");
        }

        Commands::MigrationRevert => {
            let executor = executor_for(&options)?;
            let mut runner = connect(&options).await?;
            match executor.revert_last(runner.as_mut()).await? {
                Some(id) => info!("Migration {id} has been reverted successfully."),
                None => info!("No migrations have been applied yet."),
            }
        }

        Commands::MigrationShow => {
            let executor = executor_for(&options)?;
            let mut runner = connect(&options).await?;
            let statuses = executor.status(runner.as_mut()).await?;

            if statuses.is_empty() {
                info!("No migrations found.");
            } else {
                println!("\nMigrations:");
                println!("{:-<60}", "");
                for status in &statuses {
                    let mark = if status.applied { "X" } else { " " };
                    let note = if status.local { "" } else { " (missing locally)" };
                    println!(" [{mark}] {}-{}{note}", status.timestamp, status.name);
                }
                println!();
            }
        }
    }

    Ok(())
}

/// Loads SQL migrations from the configured directory.
fn executor_for(options: &DataSourceOptions) -> anyhow::Result<MigrationExecutor> {
    let migrations: Vec<Box<dyn Migration>> = load_migrations(&options.migrations_dir)?
        .into_iter()
        .map(|m| Box::new(m) as Box<dyn Migration>)
        .collect();
    Ok(MigrationExecutor::from_options(migrations, options))
}
