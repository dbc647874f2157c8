//! SQLite query runner.
//!
//! SQLite's pragmas report columns, indices and foreign keys but not
//! constraint names, enum value lists or generation expressions. Those
//! are read back from the `CREATE TABLE` text stored in `sqlite_master`.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use keel_schema::naming;
use keel_schema::schema::{
    CheckConstraint, Column, ColumnType, DefaultValue, ForeignKey, ForeignKeyAction, Generation,
    Index, IndexOrder, NullsOrder, Schema, Table, TableName, UniqueConstraint,
};
use keel_schema::{Dialect, SqliteDialect};
use regex::Regex;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::{IntrospectScope, QueryRunner};
use crate::error::{MigrateError, Result};
use crate::history::{create_history_table_sql, AppliedMigration};
use crate::parse::{
    leading_identifier, parenthesized, split_top_level, string_literals, unquote_identifier,
};

/// Query runner over one reserved SQLite connection.
#[derive(Debug)]
pub struct SqliteQueryRunner {
    pool: SqlitePool,
    connection: PoolConnection<Sqlite>,
    dialect: SqliteDialect,
    transaction_active: bool,
}

impl SqliteQueryRunner {
    /// Reserves a connection from `pool`.
    ///
    /// # Errors
    ///
    /// Returns the pool error if no connection can be acquired.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let connection = pool.acquire().await?;
        Ok(Self {
            pool,
            connection,
            dialect: SqliteDialect::new(),
            transaction_active: false,
        })
    }

    /// Opens a single-connection pool for `url`, creating the database
    /// file if missing.
    ///
    /// # Errors
    ///
    /// Returns the connection error.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %url, "Connecting to SQLite");
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::new(pool).await
    }

    /// The reserved connection, for queries outside the runner API.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.connection
    }

    /// The pool the connection was reserved from.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    // ================================================================
    // Introspection
    // ================================================================

    async fn introspect_table(
        &mut self,
        patterns: &Patterns,
        name: &str,
        create_sql: &str,
    ) -> Result<Table> {
        let table_name = TableName::new(name);
        let ddl = TableDdl::parse(create_sql, patterns);
        let mut table = Table::new(table_name.clone());

        // ---- Columns ---------------------------------------------------
        let sql = format!("PRAGMA table_xinfo({})", self.quote(name));
        let rows = sqlx::query(&sql).fetch_all(&mut *self.connection).await?;
        for row in rows {
            let hidden: i64 = row.try_get("hidden")?;
            if hidden == 1 {
                continue;
            }
            let column_name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let default: Option<String> = row.try_get("dflt_value")?;
            let primary: i64 = row.try_get("pk")?;

            let mut column = Column::new(column_name.clone(), ColumnType::Text);
            self.dialect.normalize_type(&declared).apply(&mut column);
            column.primary = primary > 0;
            column.nullable = not_null == 0 && primary == 0;
            column.default = default.as_deref().map(parse_default);

            if let Some(definition) = ddl.columns.get(&column_name) {
                if definition.autoincrement {
                    column.generation = Some(Generation::Increment);
                }
                if let Some(expression) = &definition.generated {
                    column.generation = Some(Generation::Stored(expression.clone()));
                    column.default = None;
                }
                if let Some(values) = &definition.enum_values {
                    column.column_type = ColumnType::Enum;
                    column.length = None;
                    column.enum_values.clone_from(values);
                    column.enum_name = Some(naming::enum_name(&table_name, &column_name));
                }
            }
            table.columns.push(column);
        }

        // ---- Indices and unique constraints ----------------------------
        let sql = format!("PRAGMA index_list({})", self.quote(name));
        let rows = sqlx::query(&sql).fetch_all(&mut *self.connection).await?;
        for row in rows {
            let index_name: String = row.try_get("name")?;
            let unique: i64 = row.try_get("unique")?;
            let origin: String = row.try_get("origin")?;
            if origin == "pk" {
                continue;
            }

            let sql = format!("PRAGMA index_info({})", self.quote(&index_name));
            let info = sqlx::query(&sql).fetch_all(&mut *self.connection).await?;
            let mut columns = Vec::new();
            for column in info {
                let column: Option<String> = column.try_get("name")?;
                columns.extend(column);
            }

            if origin == "u" {
                let name = ddl
                    .unique_name(&columns)
                    .unwrap_or_else(|| naming::unique_name(&table_name, &columns));
                table.uniques.push(UniqueConstraint { name, columns });
                continue;
            }

            let index_sql: Option<String> = sqlx::query_scalar::<_, Option<String>>(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?",
            )
            .bind(&index_name)
            .fetch_optional(&mut *self.connection)
            .await?
            .flatten();
            let (orders, where_clause) = index_sql
                .as_deref()
                .map(parse_index_sql)
                .unwrap_or_default();

            let mut index = Index::new(columns);
            index.name = index_name;
            index.unique = unique != 0;
            index.where_clause = where_clause;
            for (column, order) in index.columns.iter().zip(orders) {
                if order != IndexOrder::default() {
                    index.orders.insert(column.clone(), order);
                }
            }
            table.indices.push(index);
        }

        // ---- Foreign keys ----------------------------------------------
        let sql = format!("PRAGMA foreign_key_list({})", self.quote(name));
        let rows = sqlx::query(&sql).fetch_all(&mut *self.connection).await?;
        let mut foreign_keys: BTreeMap<i64, ForeignKey> = BTreeMap::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let referenced: String = row.try_get("table")?;
            let from: String = row.try_get("from")?;
            let to: Option<String> = row.try_get("to")?;
            let on_update: String = row.try_get("on_update")?;
            let on_delete: String = row.try_get("on_delete")?;

            let foreign_key = foreign_keys.entry(id).or_insert_with(|| ForeignKey {
                name: String::new(),
                columns: Vec::new(),
                referenced_table: TableName::new(referenced),
                referenced_columns: Vec::new(),
                on_delete: ForeignKeyAction::from_sql(&on_delete),
                on_update: ForeignKeyAction::from_sql(&on_update),
            });
            foreign_key.columns.push(from);
            foreign_key.referenced_columns.extend(to);
        }
        for mut foreign_key in foreign_keys.into_values() {
            foreign_key.name = ddl
                .foreign_key_name(&foreign_key.columns)
                .unwrap_or_else(|| naming::foreign_key_name(&table_name, &foreign_key.columns));
            table.foreign_keys.push(foreign_key);
        }

        // ---- Checks ----------------------------------------------------
        table.checks = ddl
            .checks
            .into_iter()
            .map(|(name, expression)| CheckConstraint {
                name: name.unwrap_or_else(|| naming::check_name(&table_name, &expression)),
                expression,
            })
            .collect();

        Ok(table)
    }
}

#[async_trait]
impl QueryRunner for SqliteQueryRunner {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!(sql = %sql, "Executing SQL");
        sqlx::query(sql).execute(&mut *self.connection).await?;
        Ok(())
    }

    async fn start_transaction(&mut self) -> Result<()> {
        if self.transaction_active {
            return Err(MigrateError::Transaction("transaction already started".to_string()));
        }
        sqlx::query("BEGIN").execute(&mut *self.connection).await?;
        self.transaction_active = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        if !self.transaction_active {
            return Err(MigrateError::Transaction("no transaction to commit".to_string()));
        }
        sqlx::query("COMMIT").execute(&mut *self.connection).await?;
        self.transaction_active = false;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        if !self.transaction_active {
            return Err(MigrateError::Transaction("no transaction to roll back".to_string()));
        }
        self.transaction_active = false;
        sqlx::query("ROLLBACK").execute(&mut *self.connection).await?;
        Ok(())
    }

    fn is_transaction_active(&self) -> bool {
        self.transaction_active
    }

    // Table rebuilds drop referenced tables; the pragma is a no-op inside
    // a transaction, so it is toggled around it.
    async fn before_schema_change(&mut self) -> Result<()> {
        self.execute("PRAGMA foreign_keys = OFF").await
    }

    async fn after_schema_change(&mut self) -> Result<()> {
        self.execute("PRAGMA foreign_keys = ON").await
    }

    async fn introspect(&mut self, scope: &IntrospectScope) -> Result<Schema> {
        let patterns = Patterns::new().map_err(|e| MigrateError::introspection("sqlite_master", e))?;
        let tables: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&mut *self.connection)
        .await
        .map_err(|e| MigrateError::introspection("sqlite_master", e))?;

        let mut schema = Schema::new();
        for (name, create_sql) in tables {
            if name == scope.history_table {
                continue;
            }
            debug!(table = %name, "Introspecting table");
            let table = self
                .introspect_table(&patterns, &name, create_sql.as_deref().unwrap_or_default())
                .await
                .map_err(|e| MigrateError::introspection(&name, e))?;
            schema.tables.push(table);
        }
        Ok(schema)
    }

    async fn ensure_history_table(&mut self, table: &str) -> Result<()> {
        let sql = create_history_table_sql(&self.dialect, table)?;
        self.execute(&sql).await
    }

    async fn applied_migrations(&mut self, table: &str) -> Result<Vec<AppliedMigration>> {
        let sql = format!(
            "SELECT \"id\", \"timestamp\", \"name\" FROM {} ORDER BY \"id\"",
            self.quote(table)
        );
        let rows: Vec<(i64, i64, String)> =
            sqlx::query_as(&sql).fetch_all(&mut *self.connection).await?;
        Ok(rows
            .into_iter()
            .map(|(id, timestamp, name)| AppliedMigration {
                id,
                timestamp,
                name,
            })
            .collect())
    }

    async fn record_migration(&mut self, table: &str, timestamp: i64, name: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (\"timestamp\", \"name\") VALUES (?, ?)",
            self.quote(table)
        );
        sqlx::query(&sql)
            .bind(timestamp)
            .bind(name)
            .execute(&mut *self.connection)
            .await?;
        Ok(())
    }

    async fn remove_migration(&mut self, table: &str, timestamp: i64, name: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE \"timestamp\" = ? AND \"name\" = ?",
            self.quote(table)
        );
        let result = sqlx::query(&sql)
            .bind(timestamp)
            .bind(name)
            .execute(&mut *self.connection)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MigrateError::MigrationNotFound(format!("{timestamp}-{name}")));
        }
        Ok(())
    }
}

// ================================================================
// CREATE TABLE text
// ================================================================

/// Patterns over single definitions of a `CREATE TABLE` body.
struct Patterns {
    constraint: Regex,
    autoincrement: Regex,
    generated: Regex,
    enum_check: Regex,
}

impl Patterns {
    fn new() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            constraint: Regex::new(
                r#"(?is)^(?:CONSTRAINT\s+("(?:[^"]|"")+"|`[^`]+`|\S+)\s+)?(PRIMARY\s+KEY|UNIQUE|CHECK|FOREIGN\s+KEY)\b\s*"#,
            )?,
            autoincrement: Regex::new(r"(?i)\bAUTOINCREMENT\b")?,
            generated: Regex::new(r"(?i)\b(?:GENERATED\s+ALWAYS\s+)?AS\s*\(")?,
            enum_check: Regex::new(r#"(?i)\bCHECK\s*\(\s*("(?:[^"]|"")+"|`[^`]+`|\w+)\s+IN\s*\("#)?,
        })
    }
}

/// What the column definition text says beyond `PRAGMA table_xinfo`.
#[derive(Debug, Default)]
struct ColumnDdl {
    autoincrement: bool,
    generated: Option<String>,
    enum_values: Option<Vec<String>>,
}

/// Definitions of one `CREATE TABLE` statement.
#[derive(Debug, Default)]
struct TableDdl {
    columns: BTreeMap<String, ColumnDdl>,
    uniques: Vec<(Option<String>, Vec<String>)>,
    foreign_keys: Vec<(Option<String>, Vec<String>)>,
    checks: Vec<(Option<String>, String)>,
}

impl TableDdl {
    fn parse(sql: &str, patterns: &Patterns) -> Self {
        let mut ddl = Self::default();
        let Some((body, _)) = sql.find('(').and_then(|open| parenthesized(sql, open)) else {
            return ddl;
        };

        for definition in split_top_level(body, ',') {
            match patterns.constraint.captures(definition) {
                Some(captures) => {
                    let name = captures.get(1).map(|m| unquote_identifier(m.as_str()));
                    let kind = captures[2].to_ascii_uppercase();
                    let rest = &definition[captures[0].len()..];
                    let Some((inner, _)) = parenthesized(rest, 0) else {
                        continue;
                    };
                    let columns = || {
                        split_top_level(inner, ',')
                            .into_iter()
                            .map(unquote_identifier)
                            .collect::<Vec<_>>()
                    };
                    match kind.split_whitespace().next() {
                        Some("UNIQUE") => ddl.uniques.push((name, columns())),
                        Some("FOREIGN") => ddl.foreign_keys.push((name, columns())),
                        Some("CHECK") => ddl.checks.push((name, inner.trim().to_string())),
                        _ => {}
                    }
                }
                None => {
                    let (name, rest) = leading_identifier(definition);
                    let column = parse_column(&name, rest, patterns);
                    ddl.columns.insert(name, column);
                }
            }
        }
        ddl
    }

    fn unique_name(&self, columns: &[String]) -> Option<String> {
        named(&self.uniques, columns)
    }

    fn foreign_key_name(&self, columns: &[String]) -> Option<String> {
        named(&self.foreign_keys, columns)
    }
}

fn named(constraints: &[(Option<String>, Vec<String>)], columns: &[String]) -> Option<String> {
    constraints
        .iter()
        .find(|(_, c)| c == columns)
        .and_then(|(name, _)| name.clone())
}

fn parse_column(name: &str, rest: &str, patterns: &Patterns) -> ColumnDdl {
    let generated = patterns
        .generated
        .find(rest)
        .and_then(|m| parenthesized(rest, m.end() - 1))
        .map(|(expression, _)| expression.trim().to_string());

    let enum_values = patterns.enum_check.captures(rest).and_then(|captures| {
        if unquote_identifier(&captures[1]) != name {
            return None;
        }
        let open = captures.get(0)?.end() - 1;
        parenthesized(rest, open).map(|(list, _)| string_literals(list))
    });

    ColumnDdl {
        autoincrement: patterns.autoincrement.is_match(rest),
        generated,
        enum_values,
    }
}

/// Per-column orderings and the partial predicate of a `CREATE INDEX`.
fn parse_index_sql(sql: &str) -> (Vec<IndexOrder>, Option<String>) {
    let Some((columns, end)) = sql.find('(').and_then(|open| parenthesized(sql, open)) else {
        return (Vec::new(), None);
    };

    let orders = split_top_level(columns, ',')
        .into_iter()
        .map(|column| {
            let upper = column.to_ascii_uppercase();
            let nulls = if upper.contains("NULLS FIRST") {
                Some(NullsOrder::First)
            } else if upper.contains("NULLS LAST") {
                Some(NullsOrder::Last)
            } else {
                None
            };
            IndexOrder {
                descending: upper.split_whitespace().any(|word| word == "DESC"),
                nulls,
            }
        })
        .collect();

    let rest = sql[end..].trim();
    let where_clause = rest
        .get(..5)
        .filter(|keyword| keyword.eq_ignore_ascii_case("WHERE"))
        .map(|_| rest[5..].trim().to_string());
    (orders, where_clause)
}

/// Reads a `dflt_value` back into a typed default.
fn parse_default(text: &str) -> DefaultValue {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("NULL") {
        return DefaultValue::Null;
    }
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        let mut literals = string_literals(trimmed);
        if literals.len() == 1 {
            return DefaultValue::String(literals.remove(0));
        }
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return DefaultValue::Integer(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return DefaultValue::Float(value);
    }
    if trimmed.eq_ignore_ascii_case("TRUE") || trimmed.eq_ignore_ascii_case("FALSE") {
        return DefaultValue::Bool(trimmed.eq_ignore_ascii_case("TRUE"));
    }
    DefaultValue::Expression(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> Patterns {
        Patterns::new().unwrap()
    }

    #[test]
    fn table_ddl_reads_constraint_names() {
        let sql = "CREATE TABLE \"posts\" (\"id\" integer PRIMARY KEY AUTOINCREMENT, \
                   \"status\" varchar NOT NULL DEFAULT 'draft' CHECK (\"status\" IN ('draft', 'it''s live')), \
                   \"total\" integer GENERATED ALWAYS AS ((\"a\" + \"b\")) STORED, \
                   CONSTRAINT \"UQ_posts_total\" UNIQUE (\"total\"), \
                   CONSTRAINT \"CHK_posts_1\" CHECK (\"total\" > 0), \
                   CHECK (\"id\" > 0), \
                   CONSTRAINT \"FK_posts_author\" FOREIGN KEY (\"id\") REFERENCES \"users\" (\"id\"))";
        let ddl = TableDdl::parse(sql, &patterns());

        assert!(ddl.columns["id"].autoincrement);
        assert_eq!(
            ddl.columns["status"].enum_values.as_deref(),
            Some(&["draft".to_string(), "it's live".to_string()][..])
        );
        assert_eq!(ddl.columns["total"].generated.as_deref(), Some("(\"a\" + \"b\")"));
        assert_eq!(ddl.unique_name(&["total".to_string()]).as_deref(), Some("UQ_posts_total"));
        assert_eq!(
            ddl.foreign_key_name(&["id".to_string()]).as_deref(),
            Some("FK_posts_author")
        );
        assert_eq!(
            ddl.checks,
            vec![
                (Some("CHK_posts_1".to_string()), "\"total\" > 0".to_string()),
                (None, "\"id\" > 0".to_string()),
            ]
        );
    }

    #[test]
    fn index_sql_orders_and_predicate() {
        let (orders, predicate) = parse_index_sql(
            "CREATE INDEX \"IDX_t_a_b\" ON \"t\" (\"a\" DESC NULLS LAST, \"b\") WHERE \"a\" > 0",
        );
        assert_eq!(
            orders,
            vec![
                IndexOrder {
                    descending: true,
                    nulls: Some(NullsOrder::Last)
                },
                IndexOrder::default(),
            ]
        );
        assert_eq!(predicate.as_deref(), Some("\"a\" > 0"));
    }

    #[test]
    fn defaults_are_typed() {
        assert_eq!(parse_default("'member'"), DefaultValue::String("member".into()));
        assert_eq!(parse_default("0"), DefaultValue::Integer(0));
        assert_eq!(parse_default("1.5"), DefaultValue::Float(1.5));
        assert_eq!(parse_default("NULL"), DefaultValue::Null);
        assert_eq!(
            parse_default("CURRENT_TIMESTAMP"),
            DefaultValue::Expression("CURRENT_TIMESTAMP".into())
        );
        assert_eq!(
            parse_default("'a' || 'b'"),
            DefaultValue::Expression("'a' || 'b'".into())
        );
    }
}
