//! SQLite dialect.

use super::{
    decimal_type, split_native_type, with_length, with_precision, Capabilities, ColumnAlteration,
    CommentStyle, Dialect, NativeType,
};
use crate::schema::{Column, ColumnType, DefaultValue, Generation};

/// SQLite dialect.
///
/// SQLite cannot alter columns or constraints in place, so tables are
/// rebuilt instead. Enums are stored as `varchar` guarded by an inline
/// `CHECK (... IN (...))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

const BARE_DEFAULT_KEYWORDS: [&str; 3] = ["CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME"];

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            named_enums: false,
            enum_add_value_if_not_exists: false,
            column_alteration: ColumnAlteration::Recreate,
            alter_constraints: false,
            forward_references: true,
            transactional_ddl: true,
            comments: CommentStyle::Unsupported,
            uuid_generation: false,
            partial_indexes: true,
            nulls_ordering: true,
        }
    }

    fn native_type(&self, column: &Column) -> String {
        // AUTOINCREMENT is only accepted on an INTEGER PRIMARY KEY.
        if column.generation == Some(Generation::Increment) {
            return "integer".to_string();
        }
        match &column.column_type {
            ColumnType::SmallInt => "smallint".to_string(),
            ColumnType::Integer => "integer".to_string(),
            ColumnType::BigInt => "bigint".to_string(),
            ColumnType::Real => "real".to_string(),
            ColumnType::Double => "double".to_string(),
            ColumnType::Decimal => with_precision("decimal", column.precision, column.scale),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Char => with_length("char", column.length),
            ColumnType::Varchar => with_length("varchar", column.length),
            ColumnType::Text => "text".to_string(),
            ColumnType::Date => "date".to_string(),
            ColumnType::Time => "time".to_string(),
            ColumnType::Timestamp | ColumnType::TimestampTz => "datetime".to_string(),
            ColumnType::Json | ColumnType::Jsonb => "json".to_string(),
            ColumnType::Uuid | ColumnType::Enum => "varchar".to_string(),
            ColumnType::Blob | ColumnType::Vector | ColumnType::Geometry => "blob".to_string(),
            ColumnType::Custom(native) => native.clone(),
        }
    }

    fn normalize_type(&self, native: &str) -> NativeType {
        let (base, args) = split_native_type(native);
        let length = args.first().copied();
        match base.as_str() {
            "integer" | "int" => NativeType::plain(ColumnType::Integer),
            "smallint" => NativeType::plain(ColumnType::SmallInt),
            "bigint" => NativeType::plain(ColumnType::BigInt),
            "real" => NativeType::plain(ColumnType::Real),
            "double" | "double precision" | "float" => NativeType::plain(ColumnType::Double),
            "decimal" | "numeric" => decimal_type(&args),
            "boolean" => NativeType::plain(ColumnType::Boolean),
            "char" | "character" => NativeType::sized(ColumnType::Char, length),
            "varchar" | "character varying" => NativeType::sized(ColumnType::Varchar, length),
            "text" => NativeType::plain(ColumnType::Text),
            "date" => NativeType::plain(ColumnType::Date),
            "time" => NativeType::plain(ColumnType::Time),
            "datetime" | "timestamp" => NativeType::plain(ColumnType::Timestamp),
            "json" => NativeType::plain(ColumnType::Json),
            "blob" | "" => NativeType::plain(ColumnType::Blob),
            _ => NativeType::plain(ColumnType::Custom(native.to_string())),
        }
    }

    fn increment_clause(&self) -> Option<&'static str> {
        Some("AUTOINCREMENT")
    }

    fn autoincrement_primary_key(&self) -> bool {
        true
    }

    fn enum_check_constraint(&self) -> bool {
        true
    }

    fn render_default(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Expression(expression) => {
                let trimmed = expression.trim();
                if BARE_DEFAULT_KEYWORDS
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(trimmed))
                    || (trimmed.starts_with('(') && trimmed.ends_with(')'))
                {
                    trimmed.to_string()
                } else {
                    format!("({trimmed})")
                }
            }
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(value) => if *value { "1" } else { "0" }.to_string(),
            DefaultValue::Integer(value) => value.to_string(),
            DefaultValue::Float(value) => value.to_string(),
            DefaultValue::String(value) => self.quote_literal(value),
            DefaultValue::Json(value) => self.quote_literal(&value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{bigint, enumeration, varchar};

    #[test]
    fn increment_forces_integer() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.native_type(&bigint("id").increment().build()), "integer");
        assert_eq!(dialect.native_type(&bigint("id").build()), "bigint");
    }

    #[test]
    fn enums_are_varchar() {
        let dialect = SqliteDialect::new();
        assert_eq!(
            dialect.native_type(&enumeration("status", &["A"]).build()),
            "varchar"
        );
        assert_eq!(dialect.native_type(&varchar("name", 50).build()), "varchar(50)");
    }

    #[test]
    fn expression_defaults_are_parenthesized() {
        let dialect = SqliteDialect::new();
        assert_eq!(
            dialect.render_default(&DefaultValue::Expression("datetime('now')".into())),
            "(datetime('now'))"
        );
        assert_eq!(
            dialect.render_default(&DefaultValue::Expression("CURRENT_TIMESTAMP".into())),
            "CURRENT_TIMESTAMP"
        );
        assert_eq!(dialect.render_default(&DefaultValue::Bool(true)), "1");
    }
}
