//! Dialect capability descriptors.
//!
//! A dialect is a set of feature flags ([`Capabilities`]) plus the few
//! functions that genuinely differ between databases: identifier quoting,
//! type naming in both directions and a handful of statement shapes. The
//! differ and emitter branch on capabilities, never on which dialect they
//! were handed.

mod mysql;
mod postgres;
mod sqlite;

use std::fmt;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::naming;
use crate::schema::{Column, ColumnType, DefaultValue, Index, TableName};

/// How a dialect changes an existing column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAlteration {
    /// `ALTER COLUMN ... TYPE / SET NOT NULL / SET DEFAULT`, one attribute
    /// at a time.
    PerAttribute,
    /// `MODIFY COLUMN <full definition>`.
    ModifyDefinition,
    /// No in-place alteration: the table is rebuilt.
    Recreate,
}

/// Where comments live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// Comments are not supported and never diffed.
    Unsupported,
    /// Separate `COMMENT ON` statements.
    Statement,
    /// Inline `COMMENT '...'` clauses.
    Inline,
}

/// Feature flags of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Enums are standalone named types (`CREATE TYPE ... AS ENUM`).
    pub named_enums: bool,
    /// `ALTER TYPE ... ADD VALUE IF NOT EXISTS` is available.
    pub enum_add_value_if_not_exists: bool,
    pub column_alteration: ColumnAlteration,
    /// Constraints can be added and dropped after table creation.
    pub alter_constraints: bool,
    /// A table may reference a table that does not exist yet.
    pub forward_references: bool,
    /// DDL can be rolled back.
    pub transactional_ddl: bool,
    pub comments: CommentStyle,
    /// The database generates UUID values itself.
    pub uuid_generation: bool,
    pub partial_indexes: bool,
    pub nulls_ordering: bool,
}

impl Capabilities {
    /// True when a column type can change without rebuilding the table.
    #[must_use]
    pub fn in_place_alter_type(&self) -> bool {
        self.column_alteration != ColumnAlteration::Recreate
    }
}

/// Constraint kinds that have dialect-specific drop statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    ForeignKey,
    Unique,
    Check,
}

/// A native type mapped back to the logical model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    pub column_type: ColumnType,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl NativeType {
    /// A type without size arguments.
    #[must_use]
    pub const fn plain(column_type: ColumnType) -> Self {
        Self {
            column_type,
            length: None,
            precision: None,
            scale: None,
        }
    }

    /// A type with a length argument.
    #[must_use]
    pub const fn sized(column_type: ColumnType, length: Option<u32>) -> Self {
        Self {
            column_type,
            length,
            precision: None,
            scale: None,
        }
    }

    /// Copies type, length, precision and scale onto a column.
    pub fn apply(self, column: &mut Column) {
        column.column_type = self.column_type;
        column.length = self.length;
        column.precision = self.precision;
        column.scale = self.scale;
    }
}

/// SQL dialect consumed by the differ and the emitter.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the feature flags.
    fn capabilities(&self) -> Capabilities;

    /// Quotes an identifier.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes a possibly schema-qualified table name.
    fn quote_table(&self, table: &TableName) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&table.name)
            ),
            None => self.quote_identifier(&table.name),
        }
    }

    /// Quotes a string literal.
    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Maps a logical column type to the native type name.
    fn native_type(&self, column: &Column) -> String;

    /// Maps a native type name back to the logical type.
    fn normalize_type(&self, native: &str) -> NativeType;

    /// Renders a default value.
    fn render_default(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(true) => "TRUE".to_string(),
            DefaultValue::Bool(false) => "FALSE".to_string(),
            DefaultValue::Integer(value) => value.to_string(),
            DefaultValue::Float(value) => value.to_string(),
            DefaultValue::String(value) => self.quote_literal(value),
            DefaultValue::Expression(expression) => expression.clone(),
            DefaultValue::Json(value) => self.quote_literal(&value.to_string()),
        }
    }

    /// Clause appended to auto-incrementing columns.
    fn increment_clause(&self) -> Option<&'static str> {
        None
    }

    /// Default expression used for database-generated UUIDs.
    fn uuid_default(&self) -> Option<&'static str> {
        None
    }

    /// Auto-increment is only available on a sole column declared
    /// `PRIMARY KEY` inline.
    fn autoincrement_primary_key(&self) -> bool {
        false
    }

    /// Enum columns are plain strings guarded by an inline `CHECK`.
    fn enum_check_constraint(&self) -> bool {
        false
    }

    /// Keyword between `CREATE` and `INDEX`.
    fn index_modifier(&self, index: &Index) -> Option<&'static str> {
        index.unique.then_some("UNIQUE")
    }

    /// Access method for `USING`.
    fn index_method(&self, _index: &Index) -> Option<&'static str> {
        None
    }

    /// `DROP INDEX` statement.
    fn drop_index_sql(&self, table: &TableName, name: &str) -> String {
        let qualified = TableName {
            schema: table.schema.clone(),
            name: name.to_string(),
        };
        format!("DROP INDEX {}", self.quote_table(&qualified))
    }

    /// Statement dropping a named constraint.
    fn drop_constraint_sql(&self, table: &TableName, name: &str, _kind: ConstraintKind) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_table(table),
            self.quote_identifier(name)
        )
    }

    /// Statement dropping the primary key.
    fn drop_primary_key_sql(&self, table: &TableName) -> String {
        self.drop_constraint_sql(table, &naming::primary_key_name(table), ConstraintKind::Unique)
    }
}

/// Splits `character varying(255)` into `("character varying", [255])`.
///
/// The base name is lowercased with whitespace collapsed; arguments that
/// are not numbers are skipped.
#[must_use]
pub fn split_native_type(native: &str) -> (String, Vec<u32>) {
    let (base, args) = match (native.find('('), native.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            let args = native[open + 1..close]
                .split(',')
                .filter_map(|arg| arg.trim().parse().ok())
                .collect();
            (format!("{} {}", &native[..open], &native[close + 1..]), args)
        }
        _ => (native.to_string(), Vec::new()),
    };
    let base = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    (base, args)
}

/// Renders `name(length)` when a length is present.
fn with_length(name: &str, length: Option<u32>) -> String {
    match length {
        Some(length) => format!("{name}({length})"),
        None => name.to_string(),
    }
}

/// Renders `name(precision, scale)` from whatever arguments are present.
fn with_precision(name: &str, precision: Option<u32>, scale: Option<u32>) -> String {
    match (precision, scale) {
        (Some(p), Some(s)) => format!("{name}({p},{s})"),
        (Some(p), None) => format!("{name}({p})"),
        _ => name.to_string(),
    }
}

/// Builds a [`NativeType`] for `decimal`-like bases.
fn decimal_type(args: &[u32]) -> NativeType {
    NativeType {
        column_type: ColumnType::Decimal,
        length: None,
        precision: args.first().copied(),
        scale: args.get(1).copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_native_type_extracts_arguments() {
        assert_eq!(
            split_native_type("character varying(255)"),
            ("character varying".to_string(), vec![255])
        );
        assert_eq!(
            split_native_type("NUMERIC(10, 2)"),
            ("numeric".to_string(), vec![10, 2])
        );
        assert_eq!(
            split_native_type("timestamp(6) with time zone"),
            ("timestamp with time zone".to_string(), vec![6])
        );
        assert_eq!(split_native_type("text"), ("text".to_string(), vec![]));
    }

    #[test]
    fn capabilities_differ_per_dialect() {
        let pg = PostgresDialect::new().capabilities();
        let sqlite = SqliteDialect::new().capabilities();
        let mysql = MySqlDialect::new().capabilities();

        assert!(pg.named_enums && pg.enum_add_value_if_not_exists && pg.in_place_alter_type());
        assert!(!sqlite.in_place_alter_type());
        assert!(!mysql.transactional_ddl);
        assert_eq!(mysql.column_alteration, ColumnAlteration::ModifyDefinition);
    }
}
