//! Data source configuration.
//!
//! Options are read from a JSON file (`keel.json` by default) and may be
//! overridden from the command line. The database kind is inferred from
//! the URL scheme.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use keel_schema::{DiffOptions, EntityRegistry, Schema, TableName};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateError, Result};

/// Default name of the migration history table.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "keel_migrations";

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_migrations_table() -> String {
    DEFAULT_MIGRATIONS_TABLE.to_string()
}

const fn default_true() -> bool {
    true
}

/// How DDL and migrations are wrapped in transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// One transaction around the whole run.
    All,
    /// One transaction per migration.
    #[default]
    Each,
    /// No transactions.
    None,
}

/// Database kinds the runtime can connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
}

impl DatabaseKind {
    /// Infers the kind from a connection URL.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`] for unknown schemes.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split_once(':').map_or(url, |(scheme, _)| scheme);
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(MigrateError::Config(format!(
                "unsupported database scheme '{other}' in '{url}'"
            ))),
        }
    }
}

/// Options of one data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceOptions {
    /// Connection URL (`sqlite:...`, `postgres://...`).
    pub url: String,
    /// JSON document describing the desired schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_file: Option<PathBuf>,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_migrations_table")]
    pub migrations_table: String,
    /// Tables outside the synchronization scope (`table` or
    /// `schema.table`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_tables: Vec<String>,
    #[serde(default)]
    pub transaction: TransactionMode,
    /// Drop tables that exist in the database but not in the schema.
    #[serde(default = "default_true")]
    pub drop_unknown_tables: bool,
}

impl DataSourceOptions {
    /// Creates options for a URL with every other setting defaulted.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            schema_file: None,
            migrations_dir: default_migrations_dir(),
            migrations_table: default_migrations_table(),
            ignored_tables: Vec::new(),
            transaction: TransactionMode::default(),
            drop_unknown_tables: true,
        }
    }

    /// Reads options from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error if the file cannot be read or
    /// parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns the database kind inferred from the URL.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`] for unknown schemes.
    pub fn kind(&self) -> Result<DatabaseKind> {
        DatabaseKind::from_url(&self.url)
    }

    /// Parsed ignored table names.
    #[must_use]
    pub fn ignored(&self) -> BTreeSet<TableName> {
        self.ignored_tables
            .iter()
            .map(|name| TableName::parse(name))
            .collect()
    }

    /// Differ options for this data source.
    #[must_use]
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            ignored_tables: self.ignored(),
            drop_unknown_tables: self.drop_unknown_tables,
        }
    }

    /// Loads and validates the desired schema document.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`] if no schema file is configured,
    /// or the IO, serialization or schema error of loading it.
    pub fn desired_schema(&self) -> Result<Schema> {
        let path = self
            .schema_file
            .as_deref()
            .ok_or_else(|| MigrateError::Config("no schema file configured".to_string()))?;
        load_schema(path)
    }
}

/// Reads a declarative schema document and registers its tables.
///
/// # Errors
///
/// Returns the IO or serialization error of reading the file, or the
/// schema error of validating it.
pub fn load_schema(path: &Path) -> Result<Schema> {
    debug!(path = %path.display(), "Loading schema document");
    let content = fs::read_to_string(path)?;
    let document: Schema = serde_json::from_str(&content)?;
    let mut registry = EntityRegistry::new();
    registry.register_schema(document);
    Ok(registry.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn kind_from_url_scheme() {
        assert_eq!(
            DatabaseKind::from_url("sqlite::memory:").unwrap(),
            DatabaseKind::Sqlite
        );
        assert_eq!(
            DatabaseKind::from_url("postgresql://localhost/app").unwrap(),
            DatabaseKind::Postgres
        );
        assert!(matches!(
            DatabaseKind::from_url("oracle://db"),
            Err(MigrateError::Config(_))
        ));
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let options: DataSourceOptions =
            serde_json::from_str(r#"{"url": "sqlite:app.db"}"#).unwrap();
        assert_eq!(options, DataSourceOptions::new("sqlite:app.db"));
        assert_eq!(options.migrations_table, "keel_migrations");
        assert_eq!(options.transaction, TransactionMode::Each);
        assert!(options.drop_unknown_tables);
    }

    #[test]
    fn from_file_reads_every_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "url": "postgres://localhost/app",
                "schema_file": "schema.json",
                "migrations_dir": "db/migrations",
                "migrations_table": "history",
                "ignored_tables": ["audit.events", "legacy"],
                "transaction": "none",
                "drop_unknown_tables": false
            }}"#
        )
        .unwrap();

        let options = DataSourceOptions::from_file(file.path()).unwrap();
        assert_eq!(options.kind().unwrap(), DatabaseKind::Postgres);
        assert_eq!(options.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(options.transaction, TransactionMode::None);

        let diff = options.diff_options();
        assert!(!diff.drop_unknown_tables);
        assert!(diff.ignored_tables.contains(&TableName::qualified("audit", "events")));
        assert!(diff.ignored_tables.contains(&TableName::new("legacy")));
    }

    #[test]
    fn desired_schema_requires_a_file() {
        let options = DataSourceOptions::new("sqlite::memory:");
        assert!(matches!(options.desired_schema(), Err(MigrateError::Config(_))));
    }

    #[test]
    fn load_schema_normalizes_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        fs::write(
            &path,
            r#"{"tables": [{"name": "users", "columns": [
                {"name": "id", "type": "integer", "primary": true, "nullable": false},
                {"name": "email", "type": "varchar", "length": 255, "unique": true}
            ]}]}"#,
        )
        .unwrap();

        let schema = load_schema(&path).unwrap();
        let users = schema.table(&TableName::new("users")).unwrap();
        assert_eq!(users.uniques[0].name, "UQ_users_email");
    }

    #[test]
    fn demo_documents_load() {
        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
        let options = DataSourceOptions::from_file(&demos.join("keel.json")).unwrap();
        assert_eq!(options.kind().unwrap(), DatabaseKind::Sqlite);

        let schema = load_schema(&demos.join("schema.json")).unwrap();
        assert_eq!(schema.enum_usages()["shared_status_enum"].len(), 2);
        assert_eq!(schema.tables.len(), 2);
    }
}
