//! Fluent builders for registering tables.
//!
//! [`TableBuilder`] uses the typestate pattern: `build()` is only
//! available once a name and at least one column are set.
//!
//! ```rust
//! use keel_schema::builder::{bigint, enumeration, varchar, TableBuilder};
//!
//! let table = TableBuilder::new()
//!     .name("users")
//!     .column(bigint("id").primary().increment().build())
//!     .column(varchar("email", 255).not_null().unique().build())
//!     .column(enumeration("role", &["admin", "member"]).default_str("member").build())
//!     .build();
//!
//! assert_eq!(table.columns.len(), 3);
//! ```

use std::marker::PhantomData;

use crate::schema::{
    CheckConstraint, Column, ColumnType, DefaultValue, ForeignKey, ForeignKeyAction, Generation,
    Index, IndexOrder, NullsOrder, Table, TableName, UniqueConstraint,
};

// =============================================================================
// ColumnBuilder
// =============================================================================

/// Builder for a [`Column`].
#[derive(Debug, Clone)]
pub struct ColumnBuilder {
    column: Column,
}

impl ColumnBuilder {
    /// Creates a builder for a nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            column: Column::new(name, column_type),
        }
    }

    /// Sets the length (varchar/char size, vector dimensions).
    #[must_use]
    pub const fn length(mut self, length: u32) -> Self {
        self.column.length = Some(length);
        self
    }

    /// Sets numeric precision and scale.
    #[must_use]
    pub const fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.column.precision = Some(precision);
        self.column.scale = Some(scale);
        self
    }

    /// Marks the column as NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.column.nullable = false;
        self
    }

    /// Marks the column as nullable (default).
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.column.nullable = true;
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub const fn primary(mut self) -> Self {
        self.column.primary = true;
        self.column.nullable = false;
        self
    }

    /// Adds a single-column unique constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.column.unique = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.column.default = Some(value);
        self
    }

    /// Sets an integer default value.
    #[must_use]
    pub fn default_int(self, value: i64) -> Self {
        self.default(DefaultValue::Integer(value))
    }

    /// Sets a boolean default value.
    #[must_use]
    pub fn default_bool(self, value: bool) -> Self {
        self.default(DefaultValue::Bool(value))
    }

    /// Sets a string default value.
    #[must_use]
    pub fn default_str(self, value: impl Into<String>) -> Self {
        self.default(DefaultValue::String(value.into()))
    }

    /// Sets a raw SQL expression as default (e.g. `CURRENT_TIMESTAMP`).
    #[must_use]
    pub fn default_expr(self, expression: impl Into<String>) -> Self {
        self.default(DefaultValue::Expression(expression.into()))
    }

    /// Sets a JSON default value.
    #[must_use]
    pub fn default_json(self, value: serde_json::Value) -> Self {
        self.default(DefaultValue::Json(value))
    }

    /// Auto-increments the column.
    #[must_use]
    pub fn increment(mut self) -> Self {
        self.column.generation = Some(Generation::Increment);
        self
    }

    /// Generates a UUID for each row.
    #[must_use]
    pub fn uuid_generated(mut self) -> Self {
        self.column.generation = Some(Generation::Uuid);
        self
    }

    /// Computes and stores the column from an expression.
    #[must_use]
    pub fn stored(mut self, expression: impl Into<String>) -> Self {
        self.column.generation = Some(Generation::Stored(expression.into()));
        self
    }

    /// Uses a named enum type, shared with every column using the same
    /// name.
    #[must_use]
    pub fn enum_name(mut self, name: impl Into<String>) -> Self {
        self.column.enum_name = Some(name.into());
        self
    }

    /// Sets the column comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.column.comment = Some(comment.into());
        self
    }

    /// Marks the column as projection-only.
    #[must_use]
    pub const fn virtual_column(mut self) -> Self {
        self.column.virtual_column = true;
        self
    }

    /// Builds the column.
    #[must_use]
    pub fn build(self) -> Column {
        self.column
    }
}

// =============================================================================
// Shorthand Functions for Common Types
// =============================================================================

/// Creates a SMALLINT column builder.
#[must_use]
pub fn smallint(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::SmallInt)
}

/// Creates an INTEGER column builder.
#[must_use]
pub fn integer(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Integer)
}

/// Creates a BIGINT column builder.
#[must_use]
pub fn bigint(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::BigInt)
}

/// Creates a REAL column builder.
#[must_use]
pub fn real(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Real)
}

/// Creates a DOUBLE column builder.
#[must_use]
pub fn double(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Double)
}

/// Creates a DECIMAL(precision, scale) column builder.
#[must_use]
pub fn decimal(name: impl Into<String>, precision: u32, scale: u32) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Decimal).precision(precision, scale)
}

/// Creates a BOOLEAN column builder.
#[must_use]
pub fn boolean(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Boolean)
}

/// Creates a CHAR(length) column builder.
#[must_use]
pub fn char(name: impl Into<String>, length: u32) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Char).length(length)
}

/// Creates a VARCHAR(length) column builder.
#[must_use]
pub fn varchar(name: impl Into<String>, length: u32) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Varchar).length(length)
}

/// Creates a TEXT column builder.
#[must_use]
pub fn text(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Text)
}

/// Creates a DATE column builder.
#[must_use]
pub fn date(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Date)
}

/// Creates a TIME column builder.
#[must_use]
pub fn time(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Time)
}

/// Creates a TIMESTAMP column builder.
#[must_use]
pub fn timestamp(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Timestamp)
}

/// Creates a TIMESTAMP WITH TIME ZONE column builder.
#[must_use]
pub fn timestamptz(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::TimestampTz)
}

/// Creates a JSON column builder.
#[must_use]
pub fn json(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Json)
}

/// Creates a JSONB column builder.
#[must_use]
pub fn jsonb(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Jsonb)
}

/// Creates a UUID column builder.
#[must_use]
pub fn uuid(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Uuid)
}

/// Creates a BLOB column builder.
#[must_use]
pub fn blob(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Blob)
}

/// Creates an enum column builder with the given values.
#[must_use]
pub fn enumeration(name: impl Into<String>, values: &[&str]) -> ColumnBuilder {
    let mut builder = ColumnBuilder::new(name, ColumnType::Enum);
    builder.column.enum_values = values.iter().map(ToString::to_string).collect();
    builder
}

/// Creates a VECTOR(dimensions) column builder.
#[must_use]
pub fn vector(name: impl Into<String>, dimensions: u32) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Vector).length(dimensions)
}

/// Creates a GEOMETRY column builder.
#[must_use]
pub fn geometry(name: impl Into<String>) -> ColumnBuilder {
    ColumnBuilder::new(name, ColumnType::Geometry)
}

// =============================================================================
// IndexBuilder / ForeignKeyBuilder
// =============================================================================

/// Builder for an [`Index`].
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    index: Index,
}

impl IndexBuilder {
    /// Creates a builder covering the given columns.
    #[must_use]
    pub fn new(columns: &[&str]) -> Self {
        Self {
            index: Index::new(columns.iter().map(ToString::to_string).collect()),
        }
    }

    /// Sets an explicit name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.index.name = name.into();
        self
    }

    /// Makes the index unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.index.unique = true;
        self
    }

    /// Makes the index partial.
    #[must_use]
    pub fn where_clause(mut self, predicate: impl Into<String>) -> Self {
        self.index.where_clause = Some(predicate.into());
        self
    }

    /// Sets the ordering of one column.
    #[must_use]
    pub fn order(mut self, column: &str, descending: bool, nulls: Option<NullsOrder>) -> Self {
        self.index
            .orders
            .insert(column.to_string(), IndexOrder { descending, nulls });
        self
    }

    /// Marks the index as spatial.
    #[must_use]
    pub const fn spatial(mut self) -> Self {
        self.index.spatial = true;
        self
    }

    /// Marks the index as fulltext.
    #[must_use]
    pub const fn fulltext(mut self) -> Self {
        self.index.fulltext = true;
        self
    }

    /// Excludes the index from synchronization.
    #[must_use]
    pub const fn no_sync(mut self) -> Self {
        self.index.synchronize = false;
        self
    }

    /// Builds the index.
    #[must_use]
    pub fn build(self) -> Index {
        self.index
    }
}

/// Builder for a [`ForeignKey`].
#[derive(Debug, Clone)]
pub struct ForeignKeyBuilder {
    foreign_key: ForeignKey,
}

impl ForeignKeyBuilder {
    /// Creates a foreign key from `columns` to `table(referenced)`.
    #[must_use]
    pub fn new(columns: &[&str], table: impl Into<TableName>, referenced: &[&str]) -> Self {
        Self {
            foreign_key: ForeignKey {
                name: String::new(),
                columns: columns.iter().map(ToString::to_string).collect(),
                referenced_table: table.into(),
                referenced_columns: referenced.iter().map(ToString::to_string).collect(),
                on_delete: ForeignKeyAction::NoAction,
                on_update: ForeignKeyAction::NoAction,
            },
        }
    }

    /// Sets an explicit name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.foreign_key.name = name.into();
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub const fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.foreign_key.on_delete = action;
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub const fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.foreign_key.on_update = action;
        self
    }

    /// Builds the foreign key.
    #[must_use]
    pub fn build(self) -> ForeignKey {
        self.foreign_key
    }
}

// =============================================================================
// Typestate Markers
// =============================================================================

/// Marker: table has no name set.
#[derive(Debug, Clone, Copy)]
pub struct NoName;

/// Marker: table has a name set.
#[derive(Debug, Clone, Copy)]
pub struct HasName;

/// Marker: table has no columns.
#[derive(Debug, Clone, Copy)]
pub struct NoColumns;

/// Marker: table has at least one column.
#[derive(Debug, Clone, Copy)]
pub struct HasColumns;

// =============================================================================
// TableBuilder
// =============================================================================

/// Type-safe table builder.
#[derive(Debug, Clone)]
pub struct TableBuilder<Name, Cols> {
    table: Table,
    _state: PhantomData<(Name, Cols)>,
}

impl Default for TableBuilder<NoName, NoColumns> {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder<NoName, NoColumns> {
    /// Creates a new `TableBuilder`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Table::new(TableName::new("")),
            _state: PhantomData,
        }
    }
}

impl<Cols> TableBuilder<NoName, Cols> {
    /// Sets the table name (`schema.table` is accepted).
    #[must_use]
    pub fn name(mut self, name: impl Into<TableName>) -> TableBuilder<HasName, Cols> {
        self.table.name = name.into();
        TableBuilder {
            table: self.table,
            _state: PhantomData,
        }
    }
}

impl<Name> TableBuilder<Name, NoColumns> {
    /// Adds the first column to the table.
    #[must_use]
    pub fn column(mut self, column: Column) -> TableBuilder<Name, HasColumns> {
        self.table.columns.push(column);
        TableBuilder {
            table: self.table,
            _state: PhantomData,
        }
    }
}

impl<Name> TableBuilder<Name, HasColumns> {
    /// Adds another column to the table.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.table.columns.push(column);
        self
    }
}

impl<Name, Cols> TableBuilder<Name, Cols> {
    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.table.indices.push(index);
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.table.foreign_keys.push(foreign_key);
        self
    }

    /// Adds a multi-column unique constraint.
    #[must_use]
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.table.uniques.push(UniqueConstraint {
            name: String::new(),
            columns: columns.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Adds a CHECK constraint.
    #[must_use]
    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.table.checks.push(CheckConstraint {
            name: String::new(),
            expression: expression.into(),
        });
        self
    }

    /// Sets the table comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.table.comment = Some(comment.into());
        self
    }
}

impl TableBuilder<HasName, HasColumns> {
    /// Builds the table.
    #[must_use]
    pub fn build(self) -> Table {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_implies_not_null() {
        let column = integer("id").primary().build();
        assert!(column.primary);
        assert!(!column.nullable);
    }

    #[test]
    fn enumeration_carries_values() {
        let column = enumeration("status", &["A", "B"])
            .enum_name("shared_status_enum")
            .build();
        assert!(column.is_enum());
        assert_eq!(column.enum_values, vec!["A", "B"]);
        assert_eq!(column.enum_name.as_deref(), Some("shared_status_enum"));
    }

    #[test]
    fn table_builder_collects_constraints() {
        let table = TableBuilder::new()
            .name("public.orders")
            .column(integer("id").primary().build())
            .column(integer("user_id").not_null().build())
            .foreign_key(
                ForeignKeyBuilder::new(&["user_id"], "public.users", &["id"])
                    .on_delete(ForeignKeyAction::Cascade)
                    .build(),
            )
            .index(IndexBuilder::new(&["user_id"]).order("user_id", true, None).build())
            .check("\"id\" > 0")
            .build();

        assert_eq!(table.name, TableName::qualified("public", "orders"));
        assert_eq!(table.foreign_keys[0].on_delete, ForeignKeyAction::Cascade);
        assert!(table.indices[0].order_of("user_id").descending);
        assert_eq!(table.checks.len(), 1);
    }
}
