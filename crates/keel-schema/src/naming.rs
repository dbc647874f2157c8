//! Deterministic constraint and index names.
//!
//! Both sides of a diff must agree on names, so every derived name is a
//! pure function of the table and the covered columns (or expression).

use sha2::{Digest, Sha256};

use crate::schema::TableName;

/// PostgreSQL truncates identifiers beyond this length.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Primary key constraint name.
#[must_use]
pub fn primary_key_name(table: &TableName) -> String {
    bounded("PK", &table.name, &[])
}

/// Index name.
#[must_use]
pub fn index_name(table: &TableName, columns: &[String]) -> String {
    bounded("IDX", &table.name, columns)
}

/// Unique constraint name.
#[must_use]
pub fn unique_name(table: &TableName, columns: &[String]) -> String {
    bounded("UQ", &table.name, columns)
}

/// Foreign key constraint name.
#[must_use]
pub fn foreign_key_name(table: &TableName, columns: &[String]) -> String {
    bounded("FK", &table.name, columns)
}

/// Check constraint name, derived from the expression.
#[must_use]
pub fn check_name(table: &TableName, expression: &str) -> String {
    format!("CHK_{}_{}", table.name, &hash(&[&table.name, expression])[..12])
}

/// Enum type name for a column without an explicit shared name.
#[must_use]
pub fn enum_name(table: &TableName, column: &str) -> String {
    format!("{}_{column}_enum", table.name)
}

fn bounded(prefix: &str, table: &str, columns: &[String]) -> String {
    let mut name = format!("{prefix}_{table}");
    for column in columns {
        name.push('_');
        name.push_str(column);
    }
    if name.len() <= MAX_IDENTIFIER_LENGTH {
        return name;
    }
    let mut parts = vec![table];
    parts.extend(columns.iter().map(String::as_str));
    format!("{prefix}_{}", &hash(&parts)[..26])
}

fn hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("_").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
