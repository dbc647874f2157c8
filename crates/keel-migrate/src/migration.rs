//! Migration definitions and SQL migration files.
//!
//! A migration is a named, timestamped unit of up/down DDL. Rust
//! migrations implement [`Migration`] directly; SQL migrations live in
//! `{timestamp}-{Name}.sql` files with `-- keel:up` and `-- keel:down`
//! sections and are loaded with [`load_migrations`].

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::parse::split_statements;
use crate::runner::QueryRunner;

/// Marker line opening the up section of a SQL migration.
pub const UP_MARKER: &str = "-- keel:up";
/// Marker line opening the down section of a SQL migration.
pub const DOWN_MARKER: &str = "-- keel:down";

/// A unit of schema change that can be applied and reverted.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Migration name (e.g. `CreateUsers`).
    fn name(&self) -> &str;

    /// Creation timestamp in milliseconds; migrations run in this order.
    fn timestamp(&self) -> i64;

    /// Applies the migration.
    async fn up(&self, runner: &mut dyn QueryRunner) -> Result<()>;

    /// Reverts the migration.
    async fn down(&self, runner: &mut dyn QueryRunner) -> Result<()>;

    /// Returns the full migration identifier.
    fn id(&self) -> String {
        format!("{}-{}", self.timestamp(), self.name())
    }
}

/// A migration made of plain SQL statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    /// Migration name.
    pub name: String,
    /// Timestamp in milliseconds.
    pub timestamp: i64,
    /// Statements applied by `up`.
    pub up: Vec<String>,
    /// Statements applied by `down`.
    pub down: Vec<String>,
    /// Source file, if loaded from disk.
    pub path: Option<PathBuf>,
}

impl SqlMigration {
    /// Creates a migration from statement lists.
    #[must_use]
    pub fn new(
        timestamp: i64,
        name: impl Into<String>,
        up: Vec<String>,
        down: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            timestamp,
            up,
            down,
            path: None,
        }
    }

    /// Parses `{timestamp}-{Name}.sql` into its parts.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::ParseError`] if the name does not match.
    pub fn parse_filename(path: &Path) -> Result<(i64, String)> {
        let invalid = |message: String| MigrateError::ParseError {
            path: path.to_path_buf(),
            message,
        };
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| invalid("file name is not valid UTF-8".to_string()))?;

        let re = Regex::new(r"^(\d+)-([A-Za-z0-9_]+)\.sql$")
            .map_err(|e| invalid(format!("invalid pattern: {e}")))?;
        let captures = re.captures(file_name).ok_or_else(|| {
            invalid(format!(
                "'{file_name}' does not match the pattern {{timestamp}}-{{Name}}.sql"
            ))
        })?;

        let timestamp = captures[1]
            .parse::<i64>()
            .map_err(|e| invalid(format!("invalid timestamp: {e}")))?;
        Ok((timestamp, captures[2].to_string()))
    }

    /// Parses the content of a SQL migration file.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::ParseError`] if the up marker is missing,
    /// a marker is repeated, or statements precede the up marker.
    pub fn parse(
        timestamp: i64,
        name: impl Into<String>,
        content: &str,
        path: &Path,
    ) -> Result<Self> {
        let invalid = |message: &str| MigrateError::ParseError {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        let mut preamble = String::new();
        let mut up: Option<String> = None;
        let mut down: Option<String> = None;
        for line in content.lines() {
            let marker = line.trim();
            if marker.eq_ignore_ascii_case(UP_MARKER) {
                if up.is_some() {
                    return Err(invalid("duplicate up marker"));
                }
                if down.is_some() {
                    return Err(invalid("up section must come before the down section"));
                }
                up = Some(String::new());
                continue;
            }
            if marker.eq_ignore_ascii_case(DOWN_MARKER) {
                if down.is_some() {
                    return Err(invalid("duplicate down marker"));
                }
                if up.is_none() {
                    return Err(invalid("down section without an up section"));
                }
                down = Some(String::new());
                continue;
            }
            let section = match (&mut up, &mut down) {
                (_, Some(section)) | (Some(section), None) => section,
                (None, None) => &mut preamble,
            };
            section.push_str(line);
            section.push('\n');
        }

        if !split_statements(&preamble).is_empty() {
            return Err(invalid("statements before the up marker"));
        }
        let up = up.ok_or_else(|| invalid("missing '-- keel:up' marker"))?;

        Ok(Self {
            name: name.into(),
            timestamp,
            up: split_statements(&up),
            down: down.as_deref().map(split_statements).unwrap_or_default(),
            path: Some(path.to_path_buf()),
        })
    }

    /// Reads a SQL migration file.
    ///
    /// # Errors
    ///
    /// Returns the IO error of reading the file or a
    /// [`MigrateError::ParseError`] for invalid names or content.
    pub fn from_file(path: &Path) -> Result<Self> {
        let (timestamp, name) = Self::parse_filename(path)?;
        let content = fs::read_to_string(path)?;
        Self::parse(timestamp, name, &content, path)
    }

    /// Returns true if the migration can be reverted.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.up.is_empty() || !self.down.is_empty()
    }
}

#[async_trait]
impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    async fn up(&self, runner: &mut dyn QueryRunner) -> Result<()> {
        for sql in &self.up {
            runner.execute(sql).await?;
        }
        Ok(())
    }

    async fn down(&self, runner: &mut dyn QueryRunner) -> Result<()> {
        if !self.is_reversible() {
            return Err(MigrateError::NotReversible(self.id()));
        }
        for sql in &self.down {
            runner.execute(sql).await?;
        }
        Ok(())
    }
}

/// Loads every SQL migration in `dir`, sorted by timestamp then name.
///
/// A missing directory yields no migrations. Files that are not `.sql`
/// are skipped.
///
/// # Errors
///
/// Returns the IO error of reading the directory or the parse error of
/// the first invalid migration file.
pub fn load_migrations(dir: &Path) -> Result<Vec<SqlMigration>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "Migrations directory does not exist");
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }
        migrations.push(SqlMigration::from_file(&path)?);
    }

    migrations.sort_by(|a, b| (a.timestamp, &a.name).cmp(&(b.timestamp, &b.name)));
    debug!(count = migrations.len(), "Loaded migrations");
    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::SqliteQueryRunner;
    use sqlx::sqlite::SqlitePoolOptions;

    const CREATE_USERS: &str = "\
-- keel:up
CREATE TABLE \"users\" (
    \"id\" integer PRIMARY KEY AUTOINCREMENT,
    \"note\" text DEFAULT 'a;b'
);
CREATE INDEX \"IDX_users_note\" ON \"users\" (\"note\");

-- keel:down
DROP INDEX \"IDX_users_note\";
DROP TABLE \"users\";
";

    #[test]
    fn test_parse_filename() {
        let (timestamp, name) =
            SqlMigration::parse_filename(Path::new("migrations/1700000000000-CreateUsers.sql"))
                .unwrap();
        assert_eq!(timestamp, 1_700_000_000_000);
        assert_eq!(name, "CreateUsers");

        for invalid in ["CreateUsers.sql", "1700-Create Users.sql", "1700-CreateUsers.rs"] {
            assert!(matches!(
                SqlMigration::parse_filename(Path::new(invalid)),
                Err(MigrateError::ParseError { .. })
            ));
        }
    }

    #[test]
    fn test_parse_sections() {
        let migration =
            SqlMigration::parse(1, "CreateUsers", CREATE_USERS, Path::new("1-CreateUsers.sql"))
                .unwrap();
        assert_eq!(migration.up.len(), 2);
        assert!(migration.up[0].contains("DEFAULT 'a;b'"));
        assert_eq!(
            migration.down,
            vec!["DROP INDEX \"IDX_users_note\"", "DROP TABLE \"users\""]
        );
        assert!(migration.is_reversible());
    }

    #[test]
    fn test_parse_rejects_malformed_files() {
        let path = Path::new("1-Broken.sql");
        for content in [
            "CREATE TABLE \"a\" (\"id\" integer);",
            "-- keel:down\nDROP TABLE \"a\";\n-- keel:up\n",
            "-- keel:up\n-- keel:up\n",
            "DROP TABLE \"a\";\n-- keel:up\n",
        ] {
            assert!(
                matches!(
                    SqlMigration::parse(1, "Broken", content, path),
                    Err(MigrateError::ParseError { .. })
                ),
                "accepted: {content}"
            );
        }

        let empty = SqlMigration::parse(1, "Empty", "-- keel:up\n\n-- keel:down\n", path).unwrap();
        assert!(empty.up.is_empty() && empty.down.is_empty());
        assert!(empty.is_reversible());
    }

    #[tokio::test]
    async fn test_down_without_statements_is_not_reversible() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        let mut runner = SqliteQueryRunner::new(pool).await.unwrap();

        let migration = SqlMigration::new(
            1,
            "CreateItems",
            vec!["CREATE TABLE \"items\" (\"id\" integer)".to_string()],
            Vec::new(),
        );
        migration.up(&mut runner).await.unwrap();
        let err = migration.down(&mut runner).await.unwrap_err();
        assert!(matches!(err, MigrateError::NotReversible(id) if id == "1-CreateItems"));
    }

    #[test]
    fn test_load_migrations_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("20-AddEmail.sql"), "-- keel:up\nSELECT 1;\n").unwrap();
        fs::write(dir.path().join("10-CreateUsers.sql"), CREATE_USERS).unwrap();
        fs::write(dir.path().join("10-AddIndex.sql"), "-- keel:up\n").unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();

        let migrations = load_migrations(dir.path()).unwrap();
        let ids: Vec<String> = migrations.iter().map(Migration::id).collect();
        assert_eq!(ids, vec!["10-AddIndex", "10-CreateUsers", "20-AddEmail"]);

        assert!(load_migrations(&dir.path().join("missing")).unwrap().is_empty());
    }
}
