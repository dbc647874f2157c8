//! Schema differ.
//!
//! Compares the *desired* schema (from the registry) with the *actual*
//! schema (from introspection) and produces the [`ChangeOperation`]s that
//! turn one into the other. The order of the result is provisional; the
//! [`crate::planner::Planner`] establishes the execution order.
//!
//! Named enum types are shared resources. A type is only dropped when no
//! desired column uses it any more and every column that used it was in
//! sync scope. Removing a value from a type used by more than one column
//! is rejected before any SQL is produced.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::dialect::{Capabilities, ColumnAlteration, CommentStyle, Dialect};
use crate::error::{Result, SchemaError};
use crate::operation::{AddedValue, ChangeOperation, EnumChange, EnumColumn};
use crate::schema::{
    normalize_expression, CheckConstraint, Column, ColumnRef, DefaultValue, EnumType, ForeignKey,
    Generation, Index, Schema, Table, TableName, UniqueConstraint,
};

/// Scope and policy of a diff.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Tables never touched: neither created, altered nor dropped.
    pub ignored_tables: BTreeSet<TableName>,
    /// Drop in-scope tables that no entity maps to.
    pub drop_unknown_tables: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ignored_tables: BTreeSet::new(),
            drop_unknown_tables: true,
        }
    }
}

/// Computes change operations between two schemas for one dialect.
#[derive(Debug)]
pub struct Differ<'a> {
    dialect: &'a dyn Dialect,
    capabilities: Capabilities,
    options: DiffOptions,
}

impl<'a> Differ<'a> {
    /// Creates a differ with default options.
    #[must_use]
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            capabilities: dialect.capabilities(),
            options: DiffOptions::default(),
        }
    }

    /// Replaces the diff options.
    #[must_use]
    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    /// Diffs `desired` against `actual`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnsupportedChange`] when a change cannot be
    /// expressed safely, e.g. removing a value from a shared enum type.
    pub fn diff(&self, desired: &Schema, actual: &Schema) -> Result<Vec<ChangeOperation>> {
        let desired_tables = self.scoped(desired);
        let actual_tables = self.scoped(actual);

        let mut operations = Vec::new();

        if self.capabilities.named_enums {
            self.diff_enum_types(desired, actual, &mut operations)?;
        }

        // ---- Tables only in desired ------------------------------------
        for (name, table) in &desired_tables {
            if !actual_tables.contains_key(name) {
                debug!(table = %name, "Table missing from database");
                operations.push(ChangeOperation::CreateTable {
                    table: physical(table),
                });
            }
        }

        // ---- Tables in both --------------------------------------------
        for (name, desired_table) in &desired_tables {
            if let Some(actual_table) = actual_tables.get(name) {
                operations.extend(self.diff_table(desired_table, actual_table));
            }
        }

        // ---- Tables only in actual -------------------------------------
        if self.options.drop_unknown_tables {
            for (name, table) in &actual_tables {
                if !desired_tables.contains_key(name) {
                    debug!(table = %name, "Table no longer mapped");
                    operations.push(ChangeOperation::DropTable {
                        table: (*table).clone(),
                    });
                }
            }
        }

        if self.capabilities.named_enums {
            self.drop_orphaned_enum_types(desired, actual, &mut operations);
        }

        debug!(operations = operations.len(), "Schema diff computed");
        Ok(operations)
    }

    fn scoped<'s>(&self, schema: &'s Schema) -> BTreeMap<&'s TableName, &'s Table> {
        schema
            .tables
            .iter()
            .filter(|t| !self.options.ignored_tables.contains(&t.name))
            .map(|t| (&t.name, t))
            .collect()
    }

    // ================================================================
    // Table-level diff
    // ================================================================

    /// Compares one table present on both sides.
    fn diff_table(&self, desired: &Table, actual: &Table) -> Vec<ChangeOperation> {
        let name = &desired.name;
        let mut operations = Vec::new();

        // ---- Columns ---------------------------------------------------
        for column in desired.persisted_columns() {
            match actual.column(&column.name) {
                None => operations.push(ChangeOperation::AddColumn {
                    table: name.clone(),
                    column: column.clone(),
                }),
                Some(existing) if self.column_changed(column, existing) => {
                    operations.push(ChangeOperation::ChangeColumn {
                        table: name.clone(),
                        from: existing.clone(),
                        to: column.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        for column in &actual.columns {
            if !desired.persisted_columns().any(|c| c.name == column.name) {
                operations.push(ChangeOperation::DropColumn {
                    table: name.clone(),
                    column: column.clone(),
                });
            }
        }

        // ---- Primary key -----------------------------------------------
        let desired_pk = desired.primary_columns();
        let actual_pk = actual.primary_columns();
        if desired_pk != actual_pk {
            if !actual_pk.is_empty() {
                operations.push(ChangeOperation::DropPrimaryKey {
                    table: name.clone(),
                    columns: actual_pk,
                });
            }
            if !desired_pk.is_empty() {
                operations.push(ChangeOperation::CreatePrimaryKey {
                    table: name.clone(),
                    columns: desired_pk,
                });
            }
        }

        // ---- Comment ---------------------------------------------------
        if self.capabilities.comments != CommentStyle::Unsupported
            && non_empty(&desired.comment) != non_empty(&actual.comment)
        {
            operations.push(ChangeOperation::ChangeTableComment {
                table: name.clone(),
                from: actual.comment.clone(),
                to: desired.comment.clone(),
            });
        }

        self.diff_indices(desired, actual, &mut operations);
        diff_by_name(
            &desired.uniques,
            &actual.uniques,
            |u: &UniqueConstraint| &u.name,
            |a, b| a.columns == b.columns,
            |constraint| ChangeOperation::CreateUniqueConstraint {
                table: name.clone(),
                constraint,
            },
            |constraint| ChangeOperation::DropUniqueConstraint {
                table: name.clone(),
                constraint,
            },
            &mut operations,
        );
        diff_by_name(
            &desired.checks,
            &actual.checks,
            |c: &CheckConstraint| &c.name,
            |a, b| normalize_expression(&a.expression) == normalize_expression(&b.expression),
            |constraint| ChangeOperation::CreateCheckConstraint {
                table: name.clone(),
                constraint,
            },
            |constraint| ChangeOperation::DropCheckConstraint {
                table: name.clone(),
                constraint,
            },
            &mut operations,
        );
        diff_by_name(
            &desired.foreign_keys,
            &actual.foreign_keys,
            |fk: &ForeignKey| &fk.name,
            foreign_keys_equivalent,
            |foreign_key| ChangeOperation::CreateForeignKey {
                table: name.clone(),
                foreign_key,
            },
            |foreign_key| ChangeOperation::DropForeignKey {
                table: name.clone(),
                foreign_key,
            },
            &mut operations,
        );

        if self.capabilities.column_alteration == ColumnAlteration::Recreate
            && operations.iter().any(|op| !self.applies_in_place(op))
        {
            debug!(table = %name, "Table will be recreated");
            return vec![ChangeOperation::RecreateTable {
                from: actual.clone(),
                to: physical(desired),
            }];
        }

        operations
    }

    /// Whether a dialect without column alteration can still run `op`
    /// as a plain statement.
    fn applies_in_place(&self, op: &ChangeOperation) -> bool {
        match op {
            ChangeOperation::CreateIndex { .. } | ChangeOperation::DropIndex { .. } => true,
            ChangeOperation::AddColumn { column, .. } => {
                !column.primary
                    && column.generation.is_none()
                    && (column.nullable || column.default.is_some())
            }
            ChangeOperation::CreateForeignKey { .. }
            | ChangeOperation::DropForeignKey { .. }
            | ChangeOperation::CreateUniqueConstraint { .. }
            | ChangeOperation::DropUniqueConstraint { .. }
            | ChangeOperation::CreateCheckConstraint { .. }
            | ChangeOperation::DropCheckConstraint { .. } => self.capabilities.alter_constraints,
            _ => false,
        }
    }

    // ================================================================
    // Column comparison
    // ================================================================

    /// Deep field-by-field comparison. The emitter later touches only
    /// the attributes that actually differ.
    fn column_changed(&self, desired: &Column, actual: &Column) -> bool {
        let desired_type = self.dialect.native_type(desired);
        let actual_type = self.dialect.native_type(actual);
        if !desired_type.eq_ignore_ascii_case(&actual_type) {
            debug!(column = %desired.name, from = %actual_type, to = %desired_type, "Type changed");
            return true;
        }
        if !self.capabilities.named_enums
            && desired.is_enum()
            && desired.enum_values != actual.enum_values
        {
            return true;
        }
        if desired.nullable != actual.nullable {
            return true;
        }
        if self.generation(desired) != self.generation(actual) {
            return true;
        }
        if !defaults_equivalent(desired.effective_default(), actual.effective_default()) {
            return true;
        }
        self.capabilities.comments != CommentStyle::Unsupported
            && non_empty(&desired.comment) != non_empty(&actual.comment)
    }

    /// Generation strategy as the database sees it.
    fn generation(&self, column: &Column) -> Option<String> {
        match &column.generation {
            None => None,
            Some(Generation::Increment) => Some("increment".to_string()),
            Some(Generation::Uuid) if self.capabilities.uuid_generation => {
                Some("uuid".to_string())
            }
            Some(Generation::Uuid) => None,
            Some(Generation::Stored(expression)) => Some(normalize_expression(expression)),
        }
    }

    // ================================================================
    // Indices
    // ================================================================

    fn diff_indices(&self, desired: &Table, actual: &Table, operations: &mut Vec<ChangeOperation>) {
        let unmanaged: BTreeSet<&str> = desired
            .indices
            .iter()
            .filter(|i| !i.synchronize)
            .map(|i| i.name.as_str())
            .collect();
        let desired_indices: Vec<Index> = desired
            .indices
            .iter()
            .filter(|i| i.synchronize)
            .cloned()
            .collect();
        let actual_indices: Vec<Index> = actual
            .indices
            .iter()
            .filter(|i| !unmanaged.contains(i.name.as_str()))
            .cloned()
            .collect();

        diff_by_name(
            &desired_indices,
            &actual_indices,
            |i: &Index| &i.name,
            |a, b| self.indices_equivalent(a, b),
            |index| ChangeOperation::CreateIndex {
                table: desired.name.clone(),
                index,
            },
            |index| ChangeOperation::DropIndex {
                table: desired.name.clone(),
                index,
            },
            operations,
        );
    }

    fn indices_equivalent(&self, a: &Index, b: &Index) -> bool {
        let orders_match = a.columns.iter().all(|column| {
            let (x, y) = (a.order_of(column), b.order_of(column));
            x.descending == y.descending && (!self.capabilities.nulls_ordering || x.nulls == y.nulls)
        });
        a.columns == b.columns
            && a.unique == b.unique
            && a.spatial == b.spatial
            && a.fulltext == b.fulltext
            && a.where_clause.as_deref().map(normalize_expression)
                == b.where_clause.as_deref().map(normalize_expression)
            && orders_match
    }

    // ================================================================
    // Enum types
    // ================================================================

    /// Emits create/alter operations, once per distinct enum name.
    fn diff_enum_types(
        &self,
        desired: &Schema,
        actual: &Schema,
        operations: &mut Vec<ChangeOperation>,
    ) -> Result<()> {
        let desired_usages = desired.enum_usages();
        let actual_usages = actual.enum_usages();

        for (name, values) in desired_enum_values(desired) {
            let Some(existing) = actual.enums.get(&name) else {
                operations.push(ChangeOperation::CreateEnum {
                    enum_type: EnumType { name, values },
                });
                continue;
            };
            if existing.values == values {
                continue;
            }

            let columns = self.enum_columns(&name, desired, actual, &actual_usages);

            if let Some(added) = insertions(&existing.values, &values) {
                operations.push(ChangeOperation::AlterEnum {
                    name,
                    from: existing.values.clone(),
                    to: values,
                    change: EnumChange::AddValues(added),
                    columns,
                });
                continue;
            }

            // Replacement retypes every using column; refuse when the type
            // is shared.
            let mut users: BTreeSet<ColumnRef> = desired_usages
                .get(&name)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect();
            users.extend(
                actual_usages
                    .get(&name)
                    .into_iter()
                    .flatten()
                    .filter(|usage| self.kept_outside_scope(&usage.table, desired))
                    .cloned(),
            );
            if users.len() > 1 {
                let removed: Vec<&str> = existing
                    .values
                    .iter()
                    .filter(|v| !values.contains(v))
                    .map(String::as_str)
                    .collect();
                let users: Vec<String> = users.iter().map(ToString::to_string).collect();
                return Err(SchemaError::unsupported(
                    format!("enum type {name}"),
                    format!(
                        "removing or reordering values ({}) requires replacing a type shared by {}",
                        removed.join(", "),
                        users.join(", ")
                    ),
                ));
            }

            operations.push(ChangeOperation::AlterEnum {
                name,
                from: existing.values.clone(),
                to: values,
                change: EnumChange::Replace,
                columns,
            });
        }
        Ok(())
    }

    /// Whether an existing table survives the pass without being
    /// described by the desired schema: ignored tables, and unmapped
    /// tables when those are kept.
    fn kept_outside_scope(&self, table: &TableName, desired: &Schema) -> bool {
        if self.options.ignored_tables.contains(table) {
            return true;
        }
        !self.options.drop_unknown_tables && desired.table(table).is_none()
    }

    /// Existing columns that keep using `name` and must follow a type
    /// replacement.
    fn enum_columns(
        &self,
        name: &str,
        desired: &Schema,
        actual: &Schema,
        actual_usages: &BTreeMap<String, Vec<ColumnRef>>,
    ) -> Vec<EnumColumn> {
        let Some(usages) = actual_usages.get(name) else {
            return Vec::new();
        };
        usages
            .iter()
            .filter_map(|usage| {
                let before = actual.table(&usage.table)?.column(&usage.column)?;
                let after = desired
                    .table(&usage.table)
                    .and_then(|t| t.column(&usage.column))
                    .filter(|c| c.enum_name.as_deref() == Some(name));
                if after.is_none() && !self.kept_outside_scope(&usage.table, desired) {
                    return None;
                }
                Some(EnumColumn {
                    table: usage.table.clone(),
                    column: usage.column.clone(),
                    from_default: before.default.clone(),
                    to_default: after.map_or_else(|| before.default.clone(), |c| c.default.clone()),
                })
            })
            .collect()
    }

    /// Drops enum types whose last in-scope user is going away.
    fn drop_orphaned_enum_types(
        &self,
        desired: &Schema,
        actual: &Schema,
        operations: &mut Vec<ChangeOperation>,
    ) {
        let still_used = desired_enum_values(desired);
        for (name, usages) in actual.enum_usages() {
            if still_used.contains_key(&name) {
                continue;
            }
            let Some(enum_type) = actual.enums.get(&name) else {
                continue;
            };
            if let Some(outside) = usages
                .iter()
                .find(|u| self.kept_outside_scope(&u.table, desired))
            {
                warn!(
                    enum_type = %name,
                    column = %outside,
                    "Enum type still used by a table outside the desired schema, not dropping"
                );
                continue;
            }
            operations.push(ChangeOperation::DropEnum {
                enum_type: enum_type.clone(),
            });
        }
    }
}

// ================================================================
// Helpers
// ================================================================

/// Copy of a table without its virtual columns.
fn physical(table: &Table) -> Table {
    let mut table = table.clone();
    table.columns.retain(|c| !c.virtual_column);
    table
}

/// Values added to `existing` to reach `values`, each placed before the
/// next existing value or appended. `None` when existing values are
/// removed or reordered.
fn insertions(existing: &[String], values: &[String]) -> Option<Vec<AddedValue>> {
    let retained: Vec<&String> = values.iter().filter(|v| existing.contains(v)).collect();
    if retained.len() != existing.len() || retained.iter().zip(existing).any(|(a, b)| *a != b) {
        return None;
    }

    let mut added = Vec::new();
    for (index, value) in values.iter().enumerate() {
        if existing.contains(value) {
            continue;
        }
        let next = values[index + 1..].iter().find(|v| existing.contains(v));
        added.push(match next {
            Some(neighbor) => AddedValue::before(value.clone(), neighbor.clone()),
            None => AddedValue::appended(value.clone()),
        });
    }
    Some(added)
}

/// Enum name to value list over every desired enum column.
fn desired_enum_values(desired: &Schema) -> BTreeMap<String, Vec<String>> {
    let mut values = BTreeMap::new();
    for table in &desired.tables {
        for column in table.persisted_columns().filter(|c| c.is_enum()) {
            if let Some(name) = &column.enum_name {
                values
                    .entry(name.clone())
                    .or_insert_with(|| column.enum_values.clone());
            }
        }
    }
    values
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

pub(crate) fn defaults_equivalent(a: Option<&DefaultValue>, b: Option<&DefaultValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.equivalent(b),
        _ => false,
    }
}

/// Referenced tables compare by name, and by schema only when both sides
/// name one.
fn foreign_keys_equivalent(a: &ForeignKey, b: &ForeignKey) -> bool {
    let same_schema = match (&a.referenced_table.schema, &b.referenced_table.schema) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    };
    a.columns == b.columns
        && a.referenced_table.name == b.referenced_table.name
        && same_schema
        && a.referenced_columns == b.referenced_columns
        && a.on_delete == b.on_delete
        && a.on_update == b.on_update
}

/// Matches two lists by name: missing ones are created, extra ones are
/// dropped, changed ones are dropped and created again.
fn diff_by_name<T: Clone>(
    desired: &[T],
    actual: &[T],
    name: impl Fn(&T) -> &String,
    equivalent: impl Fn(&T, &T) -> bool,
    create: impl Fn(T) -> ChangeOperation,
    drop: impl Fn(T) -> ChangeOperation,
    operations: &mut Vec<ChangeOperation>,
) {
    for existing in actual {
        match desired.iter().find(|d| name(d) == name(existing)) {
            Some(wanted) if equivalent(wanted, existing) => {}
            _ => operations.push(drop(existing.clone())),
        }
    }
    for wanted in desired {
        match actual.iter().find(|a| name(a) == name(wanted)) {
            Some(existing) if equivalent(wanted, existing) => {}
            _ => operations.push(create(wanted.clone())),
        }
    }
}
