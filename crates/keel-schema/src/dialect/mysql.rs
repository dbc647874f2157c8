//! MySQL dialect.

use super::{
    decimal_type, split_native_type, with_length, with_precision, Capabilities, ColumnAlteration,
    CommentStyle, ConstraintKind, Dialect, NativeType,
};
use crate::schema::{Column, ColumnType, Index, TableName};

/// MySQL dialect: inline `ENUM(...)` columns, `MODIFY COLUMN` alterations
/// and non-transactional DDL.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            named_enums: false,
            enum_add_value_if_not_exists: false,
            column_alteration: ColumnAlteration::ModifyDefinition,
            alter_constraints: true,
            forward_references: false,
            transactional_ddl: false,
            comments: CommentStyle::Inline,
            uuid_generation: false,
            partial_indexes: false,
            nulls_ordering: false,
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn native_type(&self, column: &Column) -> String {
        match &column.column_type {
            ColumnType::SmallInt => "smallint".to_string(),
            ColumnType::Integer => "int".to_string(),
            ColumnType::BigInt => "bigint".to_string(),
            ColumnType::Real => "float".to_string(),
            ColumnType::Double => "double".to_string(),
            ColumnType::Decimal => with_precision("decimal", column.precision, column.scale),
            ColumnType::Boolean => "tinyint(1)".to_string(),
            ColumnType::Char => with_length("char", column.length),
            ColumnType::Varchar => with_length("varchar", column.length.or(Some(255))),
            ColumnType::Text => "text".to_string(),
            ColumnType::Date => "date".to_string(),
            ColumnType::Time => "time".to_string(),
            ColumnType::Timestamp => "datetime".to_string(),
            ColumnType::TimestampTz => "timestamp".to_string(),
            ColumnType::Json | ColumnType::Jsonb => "json".to_string(),
            ColumnType::Uuid => "varchar(36)".to_string(),
            ColumnType::Blob => "blob".to_string(),
            ColumnType::Enum => {
                let values: Vec<String> = column
                    .enum_values
                    .iter()
                    .map(|v| self.quote_literal(v))
                    .collect();
                format!("enum({})", values.join(","))
            }
            ColumnType::Vector => with_length("vector", column.length),
            ColumnType::Geometry => "geometry".to_string(),
            ColumnType::Custom(native) => native.clone(),
        }
    }

    fn normalize_type(&self, native: &str) -> NativeType {
        let (base, args) = split_native_type(native);
        let length = args.first().copied();
        match base.as_str() {
            "smallint" => NativeType::plain(ColumnType::SmallInt),
            "int" | "integer" => NativeType::plain(ColumnType::Integer),
            "bigint" => NativeType::plain(ColumnType::BigInt),
            "float" => NativeType::plain(ColumnType::Real),
            "double" => NativeType::plain(ColumnType::Double),
            "decimal" | "numeric" => decimal_type(&args),
            "tinyint" if length == Some(1) => NativeType::plain(ColumnType::Boolean),
            "char" => NativeType::sized(ColumnType::Char, length),
            "varchar" => NativeType::sized(ColumnType::Varchar, length),
            "text" => NativeType::plain(ColumnType::Text),
            "date" => NativeType::plain(ColumnType::Date),
            "time" => NativeType::plain(ColumnType::Time),
            "datetime" => NativeType::plain(ColumnType::Timestamp),
            "timestamp" => NativeType::plain(ColumnType::TimestampTz),
            "json" => NativeType::plain(ColumnType::Json),
            "blob" => NativeType::plain(ColumnType::Blob),
            "enum" => NativeType::plain(ColumnType::Enum),
            "vector" => NativeType::sized(ColumnType::Vector, length),
            "geometry" => NativeType::plain(ColumnType::Geometry),
            _ => NativeType::plain(ColumnType::Custom(native.to_string())),
        }
    }

    fn increment_clause(&self) -> Option<&'static str> {
        Some("AUTO_INCREMENT")
    }

    fn index_modifier(&self, index: &Index) -> Option<&'static str> {
        if index.spatial {
            Some("SPATIAL")
        } else if index.fulltext {
            Some("FULLTEXT")
        } else {
            index.unique.then_some("UNIQUE")
        }
    }

    fn drop_index_sql(&self, table: &TableName, name: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(name),
            self.quote_table(table)
        )
    }

    fn drop_constraint_sql(&self, table: &TableName, name: &str, kind: ConstraintKind) -> String {
        let clause = match kind {
            ConstraintKind::ForeignKey => "DROP FOREIGN KEY",
            ConstraintKind::Unique => "DROP INDEX",
            ConstraintKind::Check => "DROP CHECK",
        };
        format!(
            "ALTER TABLE {} {clause} {}",
            self.quote_table(table),
            self.quote_identifier(name)
        )
    }

    fn drop_primary_key_sql(&self, table: &TableName) -> String {
        format!("ALTER TABLE {} DROP PRIMARY KEY", self.quote_table(table))
    }
}
