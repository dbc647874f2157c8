//! Migration file generation.
//!
//! Renders emitted SQL as a timestamped migration, either a Rust source
//! file implementing [`Migration`](crate::migration::Migration) or a SQL
//! file readable by [`SqlMigration::from_file`](crate::migration::SqlMigration::from_file).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use keel_schema::SqlInMemory;
use tracing::info;

use crate::error::{MigrateError, Result};
use crate::migration::{DOWN_MARKER, UP_MARKER};

/// Output format of a generated migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MigrationFormat {
    /// `-- keel:up` / `-- keel:down` SQL file.
    #[default]
    Sql,
    /// Rust source implementing `Migration`.
    Rust,
}

impl MigrationFormat {
    /// File extension of the format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Rust => "rs",
        }
    }
}

/// Writes migration files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationWriter {
    name: String,
    timestamp: i64,
}

impl MigrationWriter {
    /// Creates a writer. The name is converted to `PascalCase`.
    #[must_use]
    pub fn new(name: &str, timestamp: i64) -> Self {
        Self {
            name: to_pascal_case(name),
            timestamp,
        }
    }

    /// Creates a writer stamped with the current time in milliseconds.
    #[must_use]
    pub fn now(name: &str) -> Self {
        Self::new(name, Utc::now().timestamp_millis())
    }

    /// Returns the migration name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the migration timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the file name: `{timestamp}-{Name}.{ext}`.
    #[must_use]
    pub fn file_name(&self, format: MigrationFormat) -> String {
        format!("{}-{}.{}", self.timestamp, self.name, format.extension())
    }

    /// Returns the name of the generated struct, e.g.
    /// `CreateUsers1700000000000`.
    #[must_use]
    pub fn struct_name(&self) -> String {
        format!("{}{}", self.name, self.timestamp)
    }

    /// Renders the migration in the given format.
    #[must_use]
    pub fn render(&self, sql: &SqlInMemory, format: MigrationFormat) -> String {
        match format {
            MigrationFormat::Sql => self.sql_source(sql),
            MigrationFormat::Rust => self.rust_source(sql),
        }
    }

    /// Renders a Rust source file implementing `Migration`.
    #[must_use]
    pub fn rust_source(&self, sql: &SqlInMemory) -> String {
        let struct_name = self.struct_name();
        let name = &self.name;
        let timestamp = self.timestamp;
        let up_body = render_statements(&sql.up_queries);
        let down_body = render_statements(&sql.down_queries);

        format!(
            "use keel_migrate::prelude::*;\n\
             \n\
             pub struct {struct_name};\n\
             \n\
             #[async_trait]\n\
             impl Migration for {struct_name} {{\n\
             \x20   fn name(&self) -> &str {{\n\
             \x20       \"{name}\"\n\
             \x20   }}\n\
             \n\
             \x20   fn timestamp(&self) -> i64 {{\n\
             \x20       {timestamp}\n\
             \x20   }}\n\
             \n\
             \x20   async fn up(&self, runner: &mut dyn QueryRunner) -> Result<()> {{\n\
             {up_body}\
             \x20       Ok(())\n\
             \x20   }}\n\
             \n\
             \x20   async fn down(&self, runner: &mut dyn QueryRunner) -> Result<()> {{\n\
             {down_body}\
             \x20       Ok(())\n\
             \x20   }}\n\
             }}\n"
        )
    }

    /// Renders a SQL migration file.
    #[must_use]
    pub fn sql_source(&self, sql: &SqlInMemory) -> String {
        let mut out = format!("-- {}\n{UP_MARKER}\n", self.file_name(MigrationFormat::Sql));
        for statement in &sql.up_queries {
            out.push_str(statement);
            out.push_str(";\n");
        }
        out.push('\n');
        out.push_str(DOWN_MARKER);
        out.push('\n');
        for statement in &sql.down_queries {
            out.push_str(statement);
            out.push_str(";\n");
        }
        out
    }

    /// Writes the migration into `dir`, creating the directory if needed.
    /// Returns the path of the new file.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::MigrationExists`] if the file already
    /// exists, or the IO error of writing it.
    pub fn write(&self, dir: &Path, sql: &SqlInMemory, format: MigrationFormat) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name(format));
        if path.exists() {
            return Err(MigrateError::MigrationExists(path));
        }
        fs::write(&path, self.render(sql, format))?;
        info!(path = %path.display(), "Created migration");
        Ok(path)
    }
}

// ================================================================
// Internal helpers
// ================================================================

/// Converts "add user email" or "add_user_email" into "AddUserEmail".
fn to_pascal_case(name: &str) -> String {
    let mut result = String::new();
    let mut capitalize_next = true;
    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(ch.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(ch);
        }
    }
    result
}

/// Renders statements as `runner.execute(...)` calls.
fn render_statements(statements: &[String]) -> String {
    let mut out = String::new();
    for statement in statements {
        out.push_str(&format!(
            "        runner.execute({}).await?;\n",
            raw_string(statement)
        ));
    }
    out
}

/// Wraps `text` in a raw string literal with just enough hashes.
fn raw_string(text: &str) -> String {
    let mut longest = 0;
    let mut run: Option<usize> = None;
    for ch in text.chars() {
        run = match (ch, run) {
            ('"', _) => Some(0),
            ('#', Some(count)) => Some(count + 1),
            _ => None,
        };
        if let Some(count) = run {
            longest = longest.max(count);
        }
    }
    let hashes = "#".repeat(longest + 1);
    format!("r{hashes}\"{text}\"{hashes}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::SqlMigration;

    fn sample_sql() -> SqlInMemory {
        SqlInMemory {
            up_queries: vec![
                "CREATE TABLE \"users\" (\"id\" integer PRIMARY KEY AUTOINCREMENT)".to_string(),
                "CREATE INDEX \"IDX_users_id\" ON \"users\" (\"id\")".to_string(),
            ],
            down_queries: vec![
                "DROP INDEX \"IDX_users_id\"".to_string(),
                "DROP TABLE \"users\"".to_string(),
            ],
        }
    }

    #[test]
    fn test_names() {
        let writer = MigrationWriter::new("add user_email", 1_700_000_000_000);
        assert_eq!(writer.name(), "AddUserEmail");
        assert_eq!(
            writer.file_name(MigrationFormat::Sql),
            "1700000000000-AddUserEmail.sql"
        );
        assert_eq!(writer.struct_name(), "AddUserEmail1700000000000");
        assert_eq!(MigrationWriter::new("CreateUsers", 1).name(), "CreateUsers");
    }

    #[test]
    fn test_raw_string_hashes() {
        assert_eq!(raw_string("SELECT 1"), "r#\"SELECT 1\"#");
        assert_eq!(raw_string("\"a\""), "r#\"\"a\"\"#");
        assert_eq!(raw_string("x = '\"#'"), "r##\"x = '\"#'\"##");
    }

    #[test]
    fn test_rust_source() {
        let writer = MigrationWriter::new("CreateUsers", 1_700_000_000_000);
        let code = writer.rust_source(&sample_sql());

        assert!(code.contains("pub struct CreateUsers1700000000000;"));
        assert!(code.contains("#[async_trait]\nimpl Migration for CreateUsers1700000000000 {"));
        assert!(code.contains("        \"CreateUsers\"\n"));
        assert!(code.contains("        1700000000000\n"));
        assert!(code.contains(
            "        runner.execute(r#\"DROP TABLE \"users\"\"#).await?;\n"
        ));
        let up = code.find("async fn up").unwrap();
        let down = code.find("async fn down").unwrap();
        let create = code.find("CREATE TABLE").unwrap();
        assert!(up < create && create < down);
    }

    #[test]
    fn test_empty_templates() {
        let writer = MigrationWriter::new("Empty", 5);
        let code = writer.rust_source(&SqlInMemory::default());
        assert!(!code.contains("runner.execute"));
        assert_eq!(code.matches("Ok(())").count(), 2);

        let sql = writer.sql_source(&SqlInMemory::default());
        assert_eq!(sql, "-- 5-Empty.sql\n-- keel:up\n\n-- keel:down\n");
    }

    #[test]
    fn test_write_sql_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MigrationWriter::new("CreateUsers", 1_700_000_000_000);

        let path = writer
            .write(dir.path(), &sample_sql(), MigrationFormat::Sql)
            .unwrap();
        let migration = SqlMigration::from_file(&path).unwrap();
        assert_eq!(migration.timestamp, 1_700_000_000_000);
        assert_eq!(migration.name, "CreateUsers");
        assert_eq!(migration.up, sample_sql().up_queries);
        assert_eq!(migration.down, sample_sql().down_queries);

        let err = writer
            .write(dir.path(), &sample_sql(), MigrationFormat::Sql)
            .unwrap_err();
        assert!(matches!(err, MigrateError::MigrationExists(p) if p == path));
    }

    #[test]
    fn test_write_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("db").join("migrations");
        let path = MigrationWriter::new("Init", 1)
            .write(&nested, &SqlInMemory::default(), MigrationFormat::Rust)
            .unwrap();
        assert_eq!(path, nested.join("1-Init.rs"));
        assert!(fs::read_to_string(path).unwrap().contains("impl Migration for Init1"));
    }
}
