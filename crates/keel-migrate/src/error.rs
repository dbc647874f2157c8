//! Error types for the runtime.

use std::path::PathBuf;

use keel_schema::SchemaError;

/// Errors raised while introspecting, synchronizing or migrating.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Reading the live catalog failed.
    #[error("Failed to introspect table '{table}': {message}")]
    Introspection {
        /// Table being read when the failure happened.
        table: String,
        /// Underlying error message.
        message: String,
    },

    /// A DDL statement failed while executing a planned change set.
    #[error("Failed to execute '{sql}': {message} ({} statement(s) executed, rolled back: {rolled_back})", executed.len())]
    DdlExecution {
        /// The statement that failed.
        sql: String,
        /// Database error message.
        message: String,
        /// Statements that succeeded before the failure.
        executed: Vec<String>,
        /// True if the executed statements were rolled back.
        rolled_back: bool,
    },

    /// Diffing, planning or emitting failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Database error outside DDL execution.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading/writing migration or config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transaction started twice or finished without being started.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to parse a migration file.
    #[error("Failed to parse migration file '{path}': {message}")]
    ParseError {
        /// Path to the migration file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Migration file already exists.
    #[error("Migration file already exists: {0}")]
    MigrationExists(PathBuf),

    /// An applied migration has no local definition.
    #[error("Migration not found: {0}")]
    MigrationNotFound(String),

    /// A migration has no down statements.
    #[error("Migration '{0}' is not reversible")]
    NotReversible(String),
}

impl MigrateError {
    /// Wraps any error raised while reading `table`.
    pub fn introspection(table: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Introspection {
            table: table.into(),
            message: error.to_string(),
        }
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
