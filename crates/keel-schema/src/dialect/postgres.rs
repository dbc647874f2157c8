//! PostgreSQL dialect.

use super::{
    decimal_type, split_native_type, with_length, with_precision, Capabilities, ColumnAlteration,
    CommentStyle, Dialect, NativeType,
};
use crate::schema::{Column, ColumnType, Index};

/// PostgreSQL dialect.
///
/// Type names follow `format_type()` output so that rendered desired
/// columns and introspected columns compare verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            named_enums: true,
            enum_add_value_if_not_exists: true,
            column_alteration: ColumnAlteration::PerAttribute,
            alter_constraints: true,
            forward_references: false,
            transactional_ddl: true,
            comments: CommentStyle::Statement,
            uuid_generation: true,
            partial_indexes: true,
            nulls_ordering: true,
        }
    }

    fn native_type(&self, column: &Column) -> String {
        match &column.column_type {
            ColumnType::SmallInt => "smallint".to_string(),
            ColumnType::Integer => "integer".to_string(),
            ColumnType::BigInt => "bigint".to_string(),
            ColumnType::Real => "real".to_string(),
            ColumnType::Double => "double precision".to_string(),
            ColumnType::Decimal => with_precision("numeric", column.precision, column.scale),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Char => with_length("character", column.length),
            ColumnType::Varchar => with_length("character varying", column.length),
            ColumnType::Text => "text".to_string(),
            ColumnType::Date => "date".to_string(),
            ColumnType::Time => "time without time zone".to_string(),
            ColumnType::Timestamp => "timestamp without time zone".to_string(),
            ColumnType::TimestampTz => "timestamp with time zone".to_string(),
            ColumnType::Json => "json".to_string(),
            ColumnType::Jsonb => "jsonb".to_string(),
            ColumnType::Uuid => "uuid".to_string(),
            ColumnType::Blob => "bytea".to_string(),
            ColumnType::Enum => {
                self.quote_identifier(column.enum_name.as_deref().unwrap_or(&column.name))
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
            "smallint" | "int2" => NativeType::plain(ColumnType::SmallInt),
            "integer" | "int" | "int4" => NativeType::plain(ColumnType::Integer),
            "bigint" | "int8" => NativeType::plain(ColumnType::BigInt),
            "real" | "float4" => NativeType::plain(ColumnType::Real),
            "double precision" | "float8" => NativeType::plain(ColumnType::Double),
            "numeric" | "decimal" => decimal_type(&args),
            "boolean" | "bool" => NativeType::plain(ColumnType::Boolean),
            "character" | "char" | "bpchar" => NativeType::sized(ColumnType::Char, length),
            "character varying" | "varchar" => NativeType::sized(ColumnType::Varchar, length),
            "text" => NativeType::plain(ColumnType::Text),
            "date" => NativeType::plain(ColumnType::Date),
            "time" | "time without time zone" => NativeType::plain(ColumnType::Time),
            "timestamp" | "timestamp without time zone" => {
                NativeType::plain(ColumnType::Timestamp)
            }
            "timestamptz" | "timestamp with time zone" => {
                NativeType::plain(ColumnType::TimestampTz)
            }
            "json" => NativeType::plain(ColumnType::Json),
            "jsonb" => NativeType::plain(ColumnType::Jsonb),
            "uuid" => NativeType::plain(ColumnType::Uuid),
            "bytea" => NativeType::plain(ColumnType::Blob),
            "vector" => NativeType::sized(ColumnType::Vector, length),
            "geometry" => NativeType::plain(ColumnType::Geometry),
            _ => NativeType::plain(ColumnType::Custom(native.to_string())),
        }
    }

    fn increment_clause(&self) -> Option<&'static str> {
        Some("GENERATED BY DEFAULT AS IDENTITY")
    }

    fn uuid_default(&self) -> Option<&'static str> {
        Some("gen_random_uuid()")
    }

    fn index_method(&self, index: &Index) -> Option<&'static str> {
        index.spatial.then_some("GiST")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{decimal, enumeration, varchar, vector};
    use crate::schema::TableName;

    #[test]
    fn native_types_match_format_type() {
        let dialect = PostgresDialect::new();
        assert_eq!(
            dialect.native_type(&varchar("email", 255).build()),
            "character varying(255)"
        );
        assert_eq!(dialect.native_type(&decimal("price", 10, 2).build()), "numeric(10,2)");
        assert_eq!(dialect.native_type(&vector("embedding", 3).build()), "vector(3)");
        assert_eq!(
            dialect.native_type(&enumeration("status", &["A"]).enum_name("shared_status_enum").build()),
            "\"shared_status_enum\""
        );
    }

    #[test]
    fn normalize_type_reads_catalog_names() {
        let dialect = PostgresDialect::new();
        let varchar = dialect.normalize_type("character varying(51)");
        assert_eq!(varchar.column_type, ColumnType::Varchar);
        assert_eq!(varchar.length, Some(51));

        let numeric = dialect.normalize_type("numeric(10,2)");
        assert_eq!((numeric.precision, numeric.scale), (Some(10), Some(2)));

        assert_eq!(
            dialect.normalize_type("timestamp(6) with time zone").column_type,
            ColumnType::TimestampTz
        );
        assert_eq!(
            dialect.normalize_type("citext").column_type,
            ColumnType::Custom("citext".to_string())
        );
    }

    #[test]
    fn quotes_schema_qualified_tables() {
        let dialect = PostgresDialect::new();
        assert_eq!(
            dialect.quote_table(&TableName::qualified("public", "users")),
            "\"public\".\"users\""
        );
        assert_eq!(dialect.quote_literal("it's"), "'it''s'");
    }
}
