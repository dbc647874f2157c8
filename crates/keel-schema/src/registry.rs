//! Entity registry.
//!
//! A registry is created per data source, filled with table definitions
//! and turned into the *desired* [`Schema`]. Nothing is global: two
//! registries never see each other's tables.

use tracing::debug;

use crate::error::Result;
use crate::naming;
use crate::schema::{Schema, Table, UniqueConstraint};

/// Collects table definitions for one data source.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    tables: Vec<Table>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table definition.
    pub fn register(&mut self, table: Table) -> &mut Self {
        debug!(table = %table.name, "Registering entity");
        self.tables.push(table);
        self
    }

    /// Registers a table definition, builder style.
    #[must_use]
    pub fn with(mut self, table: Table) -> Self {
        self.register(table);
        self
    }

    /// Registers every table of a declarative schema document.
    pub fn register_schema(&mut self, schema: Schema) -> &mut Self {
        for table in schema.tables {
            self.register(table);
        }
        self
    }

    /// Returns the registered definitions as given.
    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Produces the desired schema: names derived, column-level unique
    /// flags expanded, enum types collected and invariants checked.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SchemaError::InvalidSchema`] if a definition
    /// violates a model invariant.
    pub fn build(&self) -> Result<Schema> {
        let mut schema = Schema {
            tables: self.tables.clone(),
            ..Schema::default()
        };
        normalize(&mut schema);
        schema.validate()?;
        Ok(schema)
    }
}

/// Fills in derived names and expands shorthand declarations in place.
pub fn normalize(schema: &mut Schema) {
    for table in &mut schema.tables {
        normalize_table(table);
    }
    schema.collect_enums();
}

fn normalize_table(table: &mut Table) {
    let name = table.name.clone();

    for column in &mut table.columns {
        if column.is_enum() && column.enum_name.is_none() {
            column.enum_name = Some(naming::enum_name(&name, &column.name));
        }
        if column.unique {
            column.unique = false;
            let columns = vec![column.name.clone()];
            let single_column_primary = column.primary;
            if !single_column_primary && !table.uniques.iter().any(|u| u.columns == columns) {
                table.uniques.push(UniqueConstraint {
                    name: naming::unique_name(&name, &columns),
                    columns,
                });
            }
        }
    }

    for index in &mut table.indices {
        if index.name.is_empty() {
            index.name = naming::index_name(&name, &index.columns);
        }
    }
    for unique in &mut table.uniques {
        if unique.name.is_empty() {
            unique.name = naming::unique_name(&name, &unique.columns);
        }
    }
    for fk in &mut table.foreign_keys {
        if fk.name.is_empty() {
            fk.name = naming::foreign_key_name(&name, &fk.columns);
        }
    }
    for check in &mut table.checks {
        if check.name.is_empty() {
            check.name = naming::check_name(&name, &check.expression);
        }
    }
}
