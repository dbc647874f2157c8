//! PostgreSQL query runner.
//!
//! Introspection reads `pg_catalog` directly: `format_type()` for column
//! types, `pg_enum` for enum labels in sort order, `pg_constraint` with
//! `pg_get_constraintdef()` for constraints and `pg_index` for indices not
//! backing a constraint.

use std::collections::BTreeMap;

use async_trait::async_trait;
use keel_schema::schema::{
    CheckConstraint, Column, ColumnType, DefaultValue, EnumType, ForeignKey, ForeignKeyAction,
    Generation, Index, IndexOrder, NullsOrder, Schema, Table, TableName, UniqueConstraint,
};
use keel_schema::{Dialect, PostgresDialect};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, Postgres};
use sqlx::Row;
use tracing::{debug, info};

use super::{IntrospectScope, QueryRunner};
use crate::error::{MigrateError, Result};
use crate::history::{create_history_table_sql, AppliedMigration};
use crate::parse::{parenthesized, rfind_top_level, string_literals};

const TABLES_SQL: &str = r"
SELECT c.oid::int8 AS oid,
       n.nspname::text AS schema_name,
       c.relname::text AS table_name,
       obj_description(c.oid, 'pg_class') AS comment
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('r', 'p')
  AND n.nspname = COALESCE($1::text, current_schema())
ORDER BY c.relname
";

const COLUMNS_SQL: &str = r"
SELECT a.attrelid::int8 AS table_oid,
       a.attname::text AS column_name,
       pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
       t.typtype::text AS type_kind,
       t.typname::text AS type_name,
       a.attnotnull AS not_null,
       a.attidentity::text AS identity,
       a.attgenerated::text AS generated,
       pg_get_expr(ad.adbin, ad.adrelid) AS default_expr,
       col_description(a.attrelid, a.attnum) AS comment
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
LEFT JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum
WHERE c.relkind IN ('r', 'p')
  AND n.nspname = COALESCE($1::text, current_schema())
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY c.relname, a.attnum
";

const ENUMS_SQL: &str = r"
SELECT t.typname::text AS enum_name,
       e.enumlabel::text AS value
FROM pg_catalog.pg_type t
JOIN pg_catalog.pg_enum e ON e.enumtypid = t.oid
JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
WHERE n.nspname = COALESCE($1::text, current_schema())
ORDER BY t.typname, e.enumsortorder
";

const CONSTRAINTS_SQL: &str = r"
SELECT con.conrelid::int8 AS table_oid,
       con.conname::text AS name,
       con.contype::text AS kind,
       ARRAY(
           SELECT a.attname::text
           FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ) AS columns,
       ARRAY(
           SELECT a.attname::text
           FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ) AS referenced_columns,
       fn.nspname::text AS referenced_schema,
       fc.relname::text AS referenced_table,
       con.confdeltype::text AS on_delete,
       con.confupdtype::text AS on_update,
       pg_get_constraintdef(con.oid) AS definition
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_catalog.pg_class fc ON fc.oid = con.confrelid
LEFT JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
WHERE n.nspname = COALESCE($1::text, current_schema())
  AND con.contype IN ('p', 'u', 'c', 'f')
ORDER BY con.conname
";

const INDEXES_SQL: &str = r"
SELECT i.indrelid::int8 AS table_oid,
       ic.relname::text AS name,
       i.indisunique AS is_unique,
       am.amname::text AS method,
       ARRAY(
           SELECT a.attname::text
           FROM unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ) AS columns,
       ARRAY(SELECT o::int4 FROM unnest(i.indoption::int2[]) AS o) AS options,
       pg_get_expr(i.indpred, i.indrelid) AS predicate
FROM pg_catalog.pg_index i
JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_am am ON am.oid = ic.relam
WHERE n.nspname = COALESCE($1::text, current_schema())
  AND NOT EXISTS (
      SELECT 1 FROM pg_catalog.pg_constraint con
      WHERE con.conindid = i.indexrelid AND con.contype IN ('p', 'u', 'x')
  )
ORDER BY ic.relname
";

/// `pg_index.indoption` flag for descending columns.
const INDOPTION_DESC: i32 = 0x0001;
/// `pg_index.indoption` flag for NULLS FIRST.
const INDOPTION_NULLS_FIRST: i32 = 0x0002;

/// Query runner over one reserved PostgreSQL connection.
#[derive(Debug)]
pub struct PostgresQueryRunner {
    pool: PgPool,
    connection: PoolConnection<Postgres>,
    dialect: PostgresDialect,
    transaction_active: bool,
}

impl PostgresQueryRunner {
    /// Reserves a connection from `pool`.
    ///
    /// # Errors
    ///
    /// Returns the pool error if no connection can be acquired.
    pub async fn new(pool: PgPool) -> Result<Self> {
        let connection = pool.acquire().await?;
        Ok(Self {
            pool,
            connection,
            dialect: PostgresDialect::new(),
            transaction_active: false,
        })
    }

    /// Opens a single-connection pool for `url`.
    ///
    /// # Errors
    ///
    /// Returns the connection error.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to PostgreSQL");
        let pool = PgPoolOptions::new().max_connections(1).connect(url).await?;
        Self::new(pool).await
    }

    /// The reserved connection, for queries outside the runner API.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.connection
    }

    /// The pool the connection was reserved from.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    async fn read_catalog(&mut self, scope: &IntrospectScope) -> Result<Schema> {
        let schema_name = scope.schema.as_deref();
        let table_name = |name: String| match schema_name {
            Some(schema) => TableName::qualified(schema, name),
            None => TableName::new(name),
        };

        // ---- Enum types ------------------------------------------------
        let mut enums: BTreeMap<String, EnumType> = BTreeMap::new();
        let rows = sqlx::query(ENUMS_SQL)
            .bind(schema_name)
            .fetch_all(&mut *self.connection)
            .await?;
        for row in rows {
            let name: String = row.try_get("enum_name")?;
            let value: String = row.try_get("value")?;
            enums
                .entry(name.clone())
                .or_insert_with(|| EnumType {
                    name,
                    values: Vec::new(),
                })
                .values
                .push(value);
        }

        // ---- Tables ----------------------------------------------------
        let mut tables: BTreeMap<i64, Table> = BTreeMap::new();
        let rows = sqlx::query(TABLES_SQL)
            .bind(schema_name)
            .fetch_all(&mut *self.connection)
            .await?;
        for row in rows {
            let oid: i64 = row.try_get("oid")?;
            let name: String = row.try_get("table_name")?;
            if name == scope.history_table {
                continue;
            }
            let mut table = Table::new(table_name(name));
            table.comment = row.try_get("comment")?;
            tables.insert(oid, table);
        }

        // ---- Columns ---------------------------------------------------
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(schema_name)
            .fetch_all(&mut *self.connection)
            .await?;
        for row in rows {
            let oid: i64 = row.try_get("table_oid")?;
            let Some(table) = tables.get_mut(&oid) else {
                continue;
            };
            let name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            let type_kind: String = row.try_get("type_kind")?;
            let type_name: String = row.try_get("type_name")?;
            let not_null: bool = row.try_get("not_null")?;
            let identity: String = row.try_get("identity")?;
            let generated: String = row.try_get("generated")?;
            let default_expr: Option<String> = row.try_get("default_expr")?;

            let mut column = Column::new(name, ColumnType::Text);
            if type_kind == "e" {
                column.column_type = ColumnType::Enum;
                column.enum_values = enums
                    .get(&type_name)
                    .map(|e| e.values.clone())
                    .unwrap_or_default();
                column.enum_name = Some(type_name);
            } else {
                self.dialect.normalize_type(&data_type).apply(&mut column);
            }
            column.nullable = !not_null;
            column.comment = row.try_get("comment")?;

            if !identity.is_empty() {
                column.generation = Some(Generation::Increment);
            }
            match default_expr {
                Some(expression) if generated == "s" => {
                    column.generation = Some(Generation::Stored(expression));
                }
                Some(expression) => {
                    let (default, generation) = parse_default(&expression);
                    column.default = default;
                    if generation.is_some() {
                        column.generation = generation;
                    }
                }
                None => {}
            }
            table.columns.push(column);
        }

        // ---- Constraints -----------------------------------------------
        let rows = sqlx::query(CONSTRAINTS_SQL)
            .bind(schema_name)
            .fetch_all(&mut *self.connection)
            .await?;
        for row in rows {
            let oid: i64 = row.try_get("table_oid")?;
            let Some(table) = tables.get_mut(&oid) else {
                continue;
            };
            let name: String = row.try_get("name")?;
            let kind: String = row.try_get("kind")?;
            let columns: Vec<String> = row.try_get("columns")?;

            match kind.as_str() {
                "p" => {
                    for column in &mut table.columns {
                        if columns.contains(&column.name) {
                            column.primary = true;
                        }
                    }
                }
                "u" => table.uniques.push(UniqueConstraint { name, columns }),
                "c" => {
                    let definition: String = row.try_get("definition")?;
                    table.checks.push(CheckConstraint {
                        name,
                        expression: check_expression(&definition),
                    });
                }
                "f" => {
                    let referenced_schema: Option<String> = row.try_get("referenced_schema")?;
                    let referenced: Option<String> = row.try_get("referenced_table")?;
                    let on_delete: String = row.try_get("on_delete")?;
                    let on_update: String = row.try_get("on_update")?;
                    let referenced = referenced.unwrap_or_default();
                    let referenced_table = match (referenced_schema, schema_name) {
                        (Some(other), Some(_)) => TableName::qualified(other, referenced),
                        _ => TableName::new(referenced),
                    };
                    table.foreign_keys.push(ForeignKey {
                        name,
                        columns,
                        referenced_table,
                        referenced_columns: row.try_get("referenced_columns")?,
                        on_delete: referential_action(&on_delete),
                        on_update: referential_action(&on_update),
                    });
                }
                _ => {}
            }
        }

        // ---- Indices ---------------------------------------------------
        let rows = sqlx::query(INDEXES_SQL)
            .bind(schema_name)
            .fetch_all(&mut *self.connection)
            .await?;
        for row in rows {
            let oid: i64 = row.try_get("table_oid")?;
            let Some(table) = tables.get_mut(&oid) else {
                continue;
            };
            let columns: Vec<String> = row.try_get("columns")?;
            let options: Vec<i32> = row.try_get("options")?;
            let method: String = row.try_get("method")?;

            let mut index = Index::new(columns);
            index.name = row.try_get("name")?;
            index.unique = row.try_get("is_unique")?;
            index.where_clause = row.try_get("predicate")?;
            index.spatial = method == "gist";
            for (column, option) in index.columns.iter().zip(options) {
                let order = index_order(option);
                if order != IndexOrder::default() {
                    index.orders.insert(column.clone(), order);
                }
            }
            table.indices.push(index);
        }

        Ok(Schema {
            tables: tables.into_values().collect(),
            enums,
        })
    }
}

#[async_trait]
impl QueryRunner for PostgresQueryRunner {
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

    async fn introspect(&mut self, scope: &IntrospectScope) -> Result<Schema> {
        let schema = scope.schema.clone().unwrap_or_else(|| "current_schema".to_string());
        debug!(schema = %schema, "Introspecting catalog");
        self.read_catalog(scope)
            .await
            .map_err(|e| MigrateError::introspection(schema, e))
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
            "INSERT INTO {} (\"timestamp\", \"name\") VALUES ($1, $2)",
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
            "DELETE FROM {} WHERE \"timestamp\" = $1 AND \"name\" = $2",
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
// Catalog text
// ================================================================

/// Maps `pg_constraint.confdeltype` / `confupdtype` codes.
fn referential_action(code: &str) -> ForeignKeyAction {
    match code {
        "r" => ForeignKeyAction::Restrict,
        "c" => ForeignKeyAction::Cascade,
        "n" => ForeignKeyAction::SetNull,
        "d" => ForeignKeyAction::SetDefault,
        _ => ForeignKeyAction::NoAction,
    }
}

/// Maps `pg_index.indoption` bits to an ordering, keeping only what
/// differs from the column direction's default nulls placement.
const fn index_order(option: i32) -> IndexOrder {
    let descending = option & INDOPTION_DESC != 0;
    let nulls_first = option & INDOPTION_NULLS_FIRST != 0;
    let nulls = match (descending, nulls_first) {
        (false, true) => Some(NullsOrder::First),
        (true, false) => Some(NullsOrder::Last),
        _ => None,
    };
    IndexOrder { descending, nulls }
}

/// Expression of a `CHECK (...)` definition from `pg_get_constraintdef`.
fn check_expression(definition: &str) -> String {
    let trimmed = definition.trim();
    trimmed
        .find('(')
        .and_then(|open| parenthesized(trimmed, open))
        .map_or_else(|| trimmed.to_string(), |(inner, _)| inner.trim().to_string())
}

/// Removes outer parentheses and trailing `::type` casts outside quotes.
/// Returns the bare value and the cast closest to it.
fn strip_casts(expression: &str) -> (&str, Option<&str>) {
    let mut expression = expression.trim();
    let mut cast = None;
    loop {
        if let Some((inner, end)) = parenthesized(expression, 0) {
            if end == expression.len() {
                expression = inner.trim();
                continue;
            }
        }
        match rfind_top_level(expression, "::") {
            Some(position) => {
                cast = Some(expression[position + 2..].trim());
                expression = expression[..position].trim();
            }
            None => return (expression, cast),
        }
    }
}

fn is_numeric_cast(cast: &str) -> bool {
    matches!(
        cast,
        "smallint" | "integer" | "bigint" | "numeric" | "real" | "double precision"
    )
}

/// Reads a `pg_get_expr(adbin)` default back into a typed default or a
/// generation strategy.
fn parse_default(expression: &str) -> (Option<DefaultValue>, Option<Generation>) {
    let lower = expression.trim().to_ascii_lowercase();
    if lower.starts_with("nextval(") {
        return (None, Some(Generation::Increment));
    }
    if lower == "gen_random_uuid()" || lower == "uuid_generate_v4()" {
        return (None, Some(Generation::Uuid));
    }

    let (mut value, cast) = strip_casts(expression);
    let mut literal = None;
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        let mut literals = string_literals(value);
        if literals.len() == 1 {
            literal = Some(literals.remove(0));
        }
    }
    let numeric_literal;
    match literal {
        Some(text) if cast.is_some_and(is_numeric_cast) => {
            numeric_literal = text;
            value = &numeric_literal;
        }
        Some(text) => return (Some(DefaultValue::String(text)), None),
        None => {}
    }

    let default = match value.to_ascii_lowercase().as_str() {
        "null" => DefaultValue::Null,
        "true" => DefaultValue::Bool(true),
        "false" => DefaultValue::Bool(false),
        _ => value.parse::<i64>().map_or_else(
            |_| {
                value.parse::<f64>().map_or_else(
                    |_| DefaultValue::Expression(expression.trim().to_string()),
                    DefaultValue::Float,
                )
            },
            DefaultValue::Integer,
        ),
    };
    (Some(default), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casts_are_stripped_outside_quotes() {
        assert_eq!(
            strip_casts("'member'::users_role_enum"),
            ("'member'", Some("users_role_enum"))
        );
        assert_eq!(
            strip_casts("'a::b'::character varying"),
            ("'a::b'", Some("character varying"))
        );
        assert_eq!(strip_casts("('-1'::integer)"), ("'-1'", Some("integer")));
        assert_eq!(strip_casts("now()"), ("now()", None));
    }

    #[test]
    fn defaults_from_catalog() {
        assert_eq!(
            parse_default("'member'::users_role_enum"),
            (Some(DefaultValue::String("member".into())), None)
        );
        assert_eq!(
            parse_default(r#"'{"theme": "dark"}'::jsonb"#),
            (Some(DefaultValue::String(r#"{"theme": "dark"}"#.into())), None)
        );
        assert_eq!(parse_default("0"), (Some(DefaultValue::Integer(0)), None));
        assert_eq!(
            parse_default("'-1'::integer"),
            (Some(DefaultValue::Integer(-1)), None)
        );
        assert_eq!(parse_default("true"), (Some(DefaultValue::Bool(true)), None));
        assert_eq!(
            parse_default("CURRENT_TIMESTAMP"),
            (Some(DefaultValue::Expression("CURRENT_TIMESTAMP".into())), None)
        );
        assert_eq!(
            parse_default("nextval('users_id_seq'::regclass)"),
            (None, Some(Generation::Increment))
        );
        assert_eq!(parse_default("gen_random_uuid()"), (None, Some(Generation::Uuid)));
    }

    #[test]
    fn check_definitions_lose_the_keyword() {
        assert_eq!(
            check_expression("CHECK (((score >= 0) AND (score < 100)))"),
            "((score >= 0) AND (score < 100))"
        );
    }

    #[test]
    fn index_options_keep_only_non_default_nulls() {
        assert_eq!(index_order(0), IndexOrder::default());
        assert_eq!(
            index_order(INDOPTION_DESC | INDOPTION_NULLS_FIRST),
            IndexOrder {
                descending: true,
                nulls: None
            }
        );
        assert_eq!(
            index_order(INDOPTION_DESC),
            IndexOrder {
                descending: true,
                nulls: Some(NullsOrder::Last)
            }
        );
        assert_eq!(referential_action("c"), ForeignKeyAction::Cascade);
    }
}
