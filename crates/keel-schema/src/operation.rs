//! Atomic schema change operations.
//!
//! Every operation carries the complete definition of what it creates or
//! removes, so its inverse is always available through
//! [`ChangeOperation::reverse`] without consulting the database again.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::{
    CheckConstraint, Column, DefaultValue, EnumType, ForeignKey, Index, Table, TableName,
    UniqueConstraint,
};

/// What an [`ChangeOperation::AlterEnum`] does to the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnumChange {
    /// Values added in place, each at its position in the new list.
    AddValues(Vec<AddedValue>),
    /// The type is recreated with the new value list and every using
    /// column is converted.
    Replace,
}

/// Where an added enum value goes relative to an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValuePosition {
    Before(String),
    After(String),
}

/// A value added to an enum type. Without a position it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedValue {
    pub value: String,
    pub position: Option<ValuePosition>,
}

impl AddedValue {
    /// A value appended after every existing one.
    #[must_use]
    pub fn appended(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            position: None,
        }
    }

    /// A value inserted before `neighbor`.
    #[must_use]
    pub fn before(value: impl Into<String>, neighbor: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            position: Some(ValuePosition::Before(neighbor.into())),
        }
    }
}

/// A column that uses an enum type being altered.
///
/// Defaults are dropped before a type replacement and set again after
/// it, since they are typed by the enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumColumn {
    pub table: TableName,
    pub column: String,
    pub from_default: Option<DefaultValue>,
    pub to_default: Option<DefaultValue>,
}

impl EnumColumn {
    /// Swaps the before and after defaults.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            table: self.table.clone(),
            column: self.column.clone(),
            from_default: self.to_default.clone(),
            to_default: self.from_default.clone(),
        }
    }
}

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Create a table with its columns, constraints and indices.
    CreateTable { table: Table },
    /// Drop a table. Carries the full definition for the reverse.
    DropTable { table: Table },
    AddColumn { table: TableName, column: Column },
    DropColumn { table: TableName, column: Column },
    /// Change one or more attributes of an existing column.
    ChangeColumn {
        table: TableName,
        from: Column,
        to: Column,
    },
    CreatePrimaryKey {
        table: TableName,
        columns: Vec<String>,
    },
    DropPrimaryKey {
        table: TableName,
        columns: Vec<String>,
    },
    ChangeTableComment {
        table: TableName,
        from: Option<String>,
        to: Option<String>,
    },
    /// Rebuild a table for dialects without in-place alteration.
    RecreateTable { from: Table, to: Table },
    CreateIndex { table: TableName, index: Index },
    DropIndex { table: TableName, index: Index },
    CreateForeignKey {
        table: TableName,
        foreign_key: ForeignKey,
    },
    DropForeignKey {
        table: TableName,
        foreign_key: ForeignKey,
    },
    CreateUniqueConstraint {
        table: TableName,
        constraint: UniqueConstraint,
    },
    DropUniqueConstraint {
        table: TableName,
        constraint: UniqueConstraint,
    },
    CreateCheckConstraint {
        table: TableName,
        constraint: CheckConstraint,
    },
    DropCheckConstraint {
        table: TableName,
        constraint: CheckConstraint,
    },
    CreateEnum { enum_type: EnumType },
    DropEnum { enum_type: EnumType },
    /// Alter the value list of a named enum type.
    AlterEnum {
        name: String,
        from: Vec<String>,
        to: Vec<String>,
        change: EnumChange,
        columns: Vec<EnumColumn>,
    },
}

impl ChangeOperation {
    /// Returns the operation that undoes this one.
    #[must_use]
    pub fn reverse(&self) -> Self {
        match self.clone() {
            Self::CreateTable { table } => Self::DropTable { table },
            Self::DropTable { table } => Self::CreateTable { table },
            Self::AddColumn { table, column } => Self::DropColumn { table, column },
            Self::DropColumn { table, column } => Self::AddColumn { table, column },
            Self::ChangeColumn { table, from, to } => Self::ChangeColumn {
                table,
                from: to,
                to: from,
            },
            Self::CreatePrimaryKey { table, columns } => Self::DropPrimaryKey { table, columns },
            Self::DropPrimaryKey { table, columns } => Self::CreatePrimaryKey { table, columns },
            Self::ChangeTableComment { table, from, to } => Self::ChangeTableComment {
                table,
                from: to,
                to: from,
            },
            Self::RecreateTable { from, to } => Self::RecreateTable { from: to, to: from },
            Self::CreateIndex { table, index } => Self::DropIndex { table, index },
            Self::DropIndex { table, index } => Self::CreateIndex { table, index },
            Self::CreateForeignKey { table, foreign_key } => {
                Self::DropForeignKey { table, foreign_key }
            }
            Self::DropForeignKey { table, foreign_key } => {
                Self::CreateForeignKey { table, foreign_key }
            }
            Self::CreateUniqueConstraint { table, constraint } => {
                Self::DropUniqueConstraint { table, constraint }
            }
            Self::DropUniqueConstraint { table, constraint } => {
                Self::CreateUniqueConstraint { table, constraint }
            }
            Self::CreateCheckConstraint { table, constraint } => {
                Self::DropCheckConstraint { table, constraint }
            }
            Self::DropCheckConstraint { table, constraint } => {
                Self::CreateCheckConstraint { table, constraint }
            }
            Self::CreateEnum { enum_type } => Self::DropEnum { enum_type },
            Self::DropEnum { enum_type } => Self::CreateEnum { enum_type },
            // Appended values cannot be removed in place.
            Self::AlterEnum {
                name,
                from,
                to,
                columns,
                ..
            } => Self::AlterEnum {
                name,
                from: to,
                to: from,
                change: EnumChange::Replace,
                columns: columns.iter().map(EnumColumn::reversed).collect(),
            },
        }
    }

    /// Returns the table the operation belongs to, if any.
    #[must_use]
    pub fn table(&self) -> Option<&TableName> {
        match self {
            Self::CreateTable { table } | Self::DropTable { table } => Some(&table.name),
            Self::RecreateTable { to, .. } => Some(&to.name),
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::ChangeColumn { table, .. }
            | Self::CreatePrimaryKey { table, .. }
            | Self::DropPrimaryKey { table, .. }
            | Self::ChangeTableComment { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::CreateForeignKey { table, .. }
            | Self::DropForeignKey { table, .. }
            | Self::CreateUniqueConstraint { table, .. }
            | Self::DropUniqueConstraint { table, .. }
            | Self::CreateCheckConstraint { table, .. }
            | Self::DropCheckConstraint { table, .. } => Some(table),
            Self::CreateEnum { .. } | Self::DropEnum { .. } | Self::AlterEnum { .. } => None,
        }
    }

    /// Returns a short description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { table } => format!("Create table {}", table.name),
            Self::DropTable { table } => format!("Drop table {}", table.name),
            Self::AddColumn { table, column } => format!("Add column {} to {table}", column.name),
            Self::DropColumn { table, column } => {
                format!("Drop column {} from {table}", column.name)
            }
            Self::ChangeColumn { table, to, .. } => format!("Change column {table}.{}", to.name),
            Self::CreatePrimaryKey { table, columns } => {
                format!("Create primary key ({}) on {table}", columns.join(", "))
            }
            Self::DropPrimaryKey { table, .. } => format!("Drop primary key of {table}"),
            Self::ChangeTableComment { table, .. } => format!("Change comment of {table}"),
            Self::RecreateTable { to, .. } => format!("Recreate table {}", to.name),
            Self::CreateIndex { table, index } => format!("Create index {} on {table}", index.name),
            Self::DropIndex { table, index } => format!("Drop index {} on {table}", index.name),
            Self::CreateForeignKey { table, foreign_key } => format!(
                "Create foreign key {} on {table} -> {}",
                foreign_key.name, foreign_key.referenced_table
            ),
            Self::DropForeignKey { table, foreign_key } => {
                format!("Drop foreign key {} on {table}", foreign_key.name)
            }
            Self::CreateUniqueConstraint { table, constraint } => {
                format!("Create unique constraint {} on {table}", constraint.name)
            }
            Self::DropUniqueConstraint { table, constraint } => {
                format!("Drop unique constraint {} on {table}", constraint.name)
            }
            Self::CreateCheckConstraint { table, constraint } => {
                format!("Create check constraint {} on {table}", constraint.name)
            }
            Self::DropCheckConstraint { table, constraint } => {
                format!("Drop check constraint {} on {table}", constraint.name)
            }
            Self::CreateEnum { enum_type } => format!("Create enum type {}", enum_type.name),
            Self::DropEnum { enum_type } => format!("Drop enum type {}", enum_type.name),
            Self::AlterEnum { name, change, .. } => match change {
                EnumChange::AddValues(values) => {
                    let values: Vec<&str> = values.iter().map(|v| v.value.as_str()).collect();
                    format!("Add values {} to enum type {name}", values.join(", "))
                }
                EnumChange::Replace => format!("Replace enum type {name}"),
            },
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
