//! Schema model.
//!
//! The same shape describes both the *desired* schema (built from entity
//! registrations) and the *actual* schema (read back from a database
//! catalog). Everything here derives serde so a desired schema can also be
//! loaded from a declarative JSON document.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

const fn default_true() -> bool {
    true
}

// ================================================================
// Table identity
// ================================================================

/// Qualified table name. Identity within a comparison scope is the
/// `(schema, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    /// Optional schema/database qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
}

impl TableName {
    /// Creates an unqualified table name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Creates a schema-qualified table name.
    #[must_use]
    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Parses `schema.table` or `table`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.split_once('.') {
            Some((schema, name)) => Self::qualified(schema, name),
            None => Self::new(value),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for TableName {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

/// A column of a specific table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Owning table.
    pub table: TableName,
    /// Column name.
    pub column: String,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

// ================================================================
// Column types and values
// ================================================================

/// Dialect-normalized logical column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Boolean,
    Char,
    Varchar,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
    Uuid,
    Blob,
    Enum,
    /// Fixed-dimension vector (`length` holds the dimension count).
    Vector,
    Geometry,
    /// Any native type the model has no tag for.
    Custom(String),
}

impl ColumnType {
    /// Returns the normalized type tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::SmallInt => "smallint",
            Self::Integer => "int",
            Self::BigInt => "bigint",
            Self::Real => "real",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Char => "char",
            Self::Varchar => "varchar",
            Self::Text => "text",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
            Self::Uuid => "uuid",
            Self::Blob => "blob",
            Self::Enum => "enum",
            Self::Vector => "vector",
            Self::Geometry => "geometry",
            Self::Custom(name) => name,
        }
    }

    /// Returns true for types whose `length` is significant.
    #[must_use]
    pub const fn has_length(&self) -> bool {
        matches!(self, Self::Char | Self::Varchar | Self::Vector)
    }

    /// Returns true for types whose precision/scale are significant.
    #[must_use]
    pub const fn has_precision(&self) -> bool {
        matches!(self, Self::Decimal)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Default value of a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Raw SQL expression (e.g. `CURRENT_TIMESTAMP`).
    Expression(String),
    /// JSON/object literal.
    Json(serde_json::Value),
}

impl DefaultValue {
    /// Semantic equality used by the differ.
    ///
    /// JSON values compare structurally (object key order is irrelevant),
    /// numbers compare by value and expressions ignore case and
    /// whitespace.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
    pub fn equivalent(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Json(value), Self::String(text)) | (Self::String(text), Self::Json(value)) => {
                serde_json::from_str::<serde_json::Value>(text).is_ok_and(|parsed| &parsed == value)
            }
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                *a as f64 == *b
            }
            (Self::Bool(flag), Self::Integer(value)) | (Self::Integer(value), Self::Bool(flag)) => {
                *value == i64::from(*flag)
            }
            (Self::Expression(a), Self::Expression(b)) => {
                normalize_expression(a) == normalize_expression(b)
            }
            _ => self == other,
        }
    }
}

/// Canonical form of a SQL expression for comparison: identifier quotes,
/// redundant parentheses, whitespace and case are stripped.
#[must_use]
pub fn normalize_expression(expression: &str) -> String {
    expression
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '"' | '`' | '(' | ')'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Value generation strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "expression", rename_all = "lowercase")]
pub enum Generation {
    /// Auto-incrementing integer.
    Increment,
    /// Database-generated UUID.
    Uuid,
    /// Computed column stored on disk.
    Stored(String),
}

// ================================================================
// Column
// ================================================================

/// A physical (or virtual) column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,
    /// Single-column uniqueness. Expanded into a [`UniqueConstraint`] on
    /// registration.
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    /// Named enum type; columns sharing a name share the type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Projection-only column. Never persisted, never diffed.
    #[serde(default, rename = "virtual")]
    pub virtual_column: bool,
}

impl Column {
    /// Creates a nullable column of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            default: None,
            generation: None,
            unique: false,
            primary: false,
            enum_values: Vec::new(),
            enum_name: None,
            comment: None,
            virtual_column: false,
        }
    }

    /// Returns true if the column uses an enumerated type.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.column_type == ColumnType::Enum
    }

    /// Default as the database sees it: generated columns have none and
    /// an explicit NULL default is the same as no default.
    #[must_use]
    pub fn effective_default(&self) -> Option<&DefaultValue> {
        if self.generation.is_some() {
            return None;
        }
        self.default
            .as_ref()
            .filter(|d| !matches!(d, DefaultValue::Null))
    }

    /// Returns the stored generation expression, if any.
    #[must_use]
    pub fn stored_expression(&self) -> Option<&str> {
        match &self.generation {
            Some(Generation::Stored(expression)) => Some(expression),
            _ => None,
        }
    }
}

// ================================================================
// Indices and constraints
// ================================================================

/// NULLS FIRST / NULLS LAST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

/// Per-column ordering inside an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOrder {
    #[serde(default)]
    pub descending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nulls: Option<NullsOrder>,
}

/// A table index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name. Derived on registration when empty.
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    /// Partial-index predicate.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    /// Ordering overrides keyed by column name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub orders: BTreeMap<String, IndexOrder>,
    #[serde(default)]
    pub spatial: bool,
    #[serde(default)]
    pub fulltext: bool,
    /// When false the index is left alone by the differ.
    #[serde(default = "default_true")]
    pub synchronize: bool,
}

impl Index {
    /// Creates a plain index with no name yet.
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            name: String::new(),
            columns,
            unique: false,
            where_clause: None,
            orders: BTreeMap::new(),
            spatial: false,
            fulltext: false,
            synchronize: true,
        }
    }

    /// Returns the effective ordering of a column.
    #[must_use]
    pub fn order_of(&self, column: &str) -> IndexOrder {
        self.orders.get(column).copied().unwrap_or_default()
    }
}

/// Referential action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of the action.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses a catalog action name. Unknown values map to `NO ACTION`.
    #[must_use]
    pub fn from_sql(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: TableName,
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ForeignKeyAction,
    #[serde(default)]
    pub on_update: ForeignKeyAction,
}

/// A multi-column unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
}

/// A CHECK constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraint {
    #[serde(default)]
    pub name: String,
    pub expression: String,
}

/// A named enumerated type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

// ================================================================
// Table
// ================================================================

/// A table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(flatten)]
    pub name: TableName,
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<Index>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uniques: Vec<UniqueConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<CheckConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Table {
    /// Creates an empty table.
    #[must_use]
    pub fn new(name: impl Into<TableName>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            foreign_keys: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            comment: None,
        }
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Iterates over the columns that physically exist.
    pub fn persisted_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.virtual_column)
    }

    /// Names of the primary key columns, in column order.
    #[must_use]
    pub fn primary_columns(&self) -> Vec<String> {
        self.persisted_columns()
            .filter(|c| c.primary)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Tables this table references through foreign keys, excluding
    /// itself.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<TableName> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.referenced_table.clone())
            .filter(|t| *t != self.name)
            .collect()
    }
}

// ================================================================
// Schema
// ================================================================

/// A complete schema: tables plus named types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub tables: Vec<Table>,
    /// Named enum types known to exist (actual) or required (desired).
    #[serde(default)]
    pub enums: BTreeMap<String, EnumType>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a table.
    #[must_use]
    pub fn table(&self, name: &TableName) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == *name)
    }

    /// Returns the set of table names.
    #[must_use]
    pub fn table_names(&self) -> BTreeSet<TableName> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Columns referencing each named enum type. Derived on demand, never
    /// stored.
    #[must_use]
    pub fn enum_usages(&self) -> BTreeMap<String, Vec<ColumnRef>> {
        let mut usages: BTreeMap<String, Vec<ColumnRef>> = BTreeMap::new();
        for table in &self.tables {
            for column in table.persisted_columns().filter(|c| c.is_enum()) {
                if let Some(enum_name) = &column.enum_name {
                    usages.entry(enum_name.clone()).or_default().push(ColumnRef {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
        }
        usages
    }

    /// Rebuilds `enums` from the enum columns of every table.
    pub fn collect_enums(&mut self) {
        let mut enums = BTreeMap::new();
        for table in &self.tables {
            for column in table.persisted_columns().filter(|c| c.is_enum()) {
                if let Some(enum_name) = &column.enum_name {
                    enums.entry(enum_name.clone()).or_insert_with(|| EnumType {
                        name: enum_name.clone(),
                        values: column.enum_values.clone(),
                    });
                }
            }
        }
        self.enums = enums;
    }

    /// Checks the model invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidSchema`] describing the first
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        let mut enum_values: BTreeMap<&str, &[String]> = BTreeMap::new();

        for table in &self.tables {
            if !seen.insert(&table.name) {
                return Err(invalid(format!("table '{}' is declared twice", table.name)));
            }
            validate_table(table)?;

            for column in table.persisted_columns().filter(|c| c.is_enum()) {
                let Some(enum_name) = column.enum_name.as_deref() else {
                    continue;
                };
                match enum_values.get(enum_name) {
                    Some(values) if *values != column.enum_values.as_slice() => {
                        return Err(invalid(format!(
                            "enum type '{enum_name}' is declared with different values on {}.{}",
                            table.name, column.name
                        )));
                    }
                    Some(_) => {}
                    None => {
                        enum_values.insert(enum_name, &column.enum_values);
                    }
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> SchemaError {
    SchemaError::InvalidSchema(message)
}

fn validate_table(table: &Table) -> Result<()> {
    let mut names = BTreeSet::new();
    for column in &table.columns {
        if !names.insert(column.name.as_str()) {
            return Err(invalid(format!(
                "column '{}' is declared twice on '{}'",
                column.name, table.name
            )));
        }
        if column.primary && column.nullable {
            return Err(invalid(format!(
                "primary column {}.{} cannot be nullable",
                table.name, column.name
            )));
        }
        if matches!(&column.generation, Some(Generation::Stored(expr)) if expr.trim().is_empty()) {
            return Err(invalid(format!(
                "stored column {}.{} has no generation expression",
                table.name, column.name
            )));
        }
        if column.is_enum() && column.enum_values.is_empty() {
            return Err(invalid(format!(
                "enum column {}.{} has no values",
                table.name, column.name
            )));
        }
    }

    let physical: BTreeSet<&str> = table.persisted_columns().map(|c| c.name.as_str()).collect();
    let check_columns = |kind: &str, name: &str, columns: &[String]| -> Result<()> {
        if columns.is_empty() {
            return Err(invalid(format!("{kind} '{name}' on '{}' has no columns", table.name)));
        }
        match columns.iter().find(|c| !physical.contains(c.as_str())) {
            Some(missing) => Err(invalid(format!(
                "{kind} '{name}' on '{}' references unknown column '{missing}'",
                table.name
            ))),
            None => Ok(()),
        }
    };

    for index in &table.indices {
        check_columns("index", &index.name, &index.columns)?;
    }
    for unique in &table.uniques {
        check_columns("unique constraint", &unique.name, &unique.columns)?;
    }
    for fk in &table.foreign_keys {
        check_columns("foreign key", &fk.name, &fk.columns)?;
        if fk.columns.len() != fk.referenced_columns.len() {
            return Err(invalid(format!(
                "foreign key '{}' on '{}' has {} local and {} referenced columns",
                fk.name,
                table.name,
                fk.columns.len(),
                fk.referenced_columns.len()
            )));
        }
    }
    Ok(())
}
