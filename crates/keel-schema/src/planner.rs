//! Dependency planner.
//!
//! Orders change operations so every statement finds its prerequisites in
//! place: constraints are dropped before the objects they reference,
//! types exist before the columns that use them, referenced tables are
//! created before referencing ones, and foreign keys come last.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::dialect::Capabilities;
use crate::error::{Result, SchemaError};
use crate::operation::ChangeOperation;
use crate::schema::{ForeignKey, Table, TableName};

/// Execution phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    DropForeignKeys,
    DropConstraints,
    DropTables,
    DropColumns,
    CreateTypes,
    CreateTables,
    AlterColumns,
    DropTypes,
    CreateConstraints,
    CreateForeignKeys,
}

impl Phase {
    const fn of(operation: &ChangeOperation) -> Self {
        match operation {
            ChangeOperation::DropForeignKey { .. } => Self::DropForeignKeys,
            ChangeOperation::DropIndex { .. }
            | ChangeOperation::DropUniqueConstraint { .. }
            | ChangeOperation::DropCheckConstraint { .. }
            | ChangeOperation::DropPrimaryKey { .. } => Self::DropConstraints,
            ChangeOperation::DropTable { .. } => Self::DropTables,
            ChangeOperation::DropColumn { .. } => Self::DropColumns,
            ChangeOperation::CreateEnum { .. } | ChangeOperation::AlterEnum { .. } => {
                Self::CreateTypes
            }
            ChangeOperation::CreateTable { .. } => Self::CreateTables,
            ChangeOperation::AddColumn { .. }
            | ChangeOperation::ChangeColumn { .. }
            | ChangeOperation::RecreateTable { .. }
            | ChangeOperation::ChangeTableComment { .. } => Self::AlterColumns,
            ChangeOperation::DropEnum { .. } => Self::DropTypes,
            ChangeOperation::CreateUniqueConstraint { .. }
            | ChangeOperation::CreateCheckConstraint { .. }
            | ChangeOperation::CreatePrimaryKey { .. }
            | ChangeOperation::CreateIndex { .. } => Self::CreateConstraints,
            ChangeOperation::CreateForeignKey { .. } => Self::CreateForeignKeys,
        }
    }
}

/// Orders operations for execution.
#[derive(Debug, Clone, Copy)]
pub struct Planner {
    capabilities: Capabilities,
}

impl Planner {
    /// Creates a planner for a dialect's capabilities.
    #[must_use]
    pub const fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    /// Returns `operations` in execution order.
    ///
    /// Operations within a phase keep their relative order, except table
    /// creation and removal which follow foreign key dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::CyclicDependency`] when new tables reference
    /// each other in a cycle and the dialect can neither add foreign keys
    /// afterwards nor reference missing tables.
    pub fn plan(&self, operations: Vec<ChangeOperation>) -> Result<Vec<ChangeOperation>> {
        let mut phases: BTreeMap<Phase, Vec<ChangeOperation>> = BTreeMap::new();
        for operation in operations {
            phases.entry(Phase::of(&operation)).or_default().push(operation);
        }

        if let Some(drops) = phases.remove(&Phase::DropTables) {
            let (drops, detached) = self.order_drops(drops);
            phases.entry(Phase::DropForeignKeys).or_default().extend(detached);
            phases.insert(Phase::DropTables, drops);
        }
        if let Some(creates) = phases.remove(&Phase::CreateTables) {
            let (creates, deferred) = self.order_creates(creates)?;
            phases.entry(Phase::CreateForeignKeys).or_default().extend(deferred);
            phases.insert(Phase::CreateTables, creates);
        }

        let planned: Vec<ChangeOperation> = phases.into_values().flatten().collect();
        debug!(operations = planned.len(), "Operations planned");
        Ok(planned)
    }

    /// Orders new tables so referenced tables come first.
    fn order_creates(
        &self,
        creates: Vec<ChangeOperation>,
    ) -> Result<(Vec<ChangeOperation>, Vec<ChangeOperation>)> {
        let mut tables = into_tables(creates);
        let mut deferred = Vec::new();

        let order = match topological_order(&tables) {
            Ok(order) => order,
            Err(cycle) if self.capabilities.alter_constraints => {
                debug!(tables = ?cycle, "Deferring foreign keys of cyclic tables");
                for table in &mut tables {
                    for foreign_key in detach_foreign_keys(table, &cycle) {
                        deferred.push(ChangeOperation::CreateForeignKey {
                            table: table.name.clone(),
                            foreign_key,
                        });
                    }
                }
                topological_order(&tables).map_err(cyclic)?
            }
            Err(_) if self.capabilities.forward_references => (0..tables.len()).collect(),
            Err(cycle) => return Err(cyclic(cycle)),
        };

        let creates = pick(tables, &order)
            .into_iter()
            .map(|table| ChangeOperation::CreateTable { table })
            .collect();
        Ok((creates, deferred))
    }

    /// Orders dropped tables so referencing tables go first. Foreign keys
    /// closing a cycle are dropped beforehand where the dialect allows.
    fn order_drops(&self, drops: Vec<ChangeOperation>) -> (Vec<ChangeOperation>, Vec<ChangeOperation>) {
        let mut tables = into_tables(drops);
        let mut detached = Vec::new();

        let order = match topological_order(&tables) {
            Ok(order) => order,
            Err(cycle) => {
                if self.capabilities.alter_constraints {
                    for table in &mut tables {
                        for foreign_key in detach_foreign_keys(table, &cycle) {
                            detached.push(ChangeOperation::DropForeignKey {
                                table: table.name.clone(),
                                foreign_key,
                            });
                        }
                    }
                }
                topological_order(&tables).unwrap_or_else(|_| (0..tables.len()).collect())
            }
        };

        let drops = pick(tables, &order)
            .into_iter()
            .rev()
            .map(|table| ChangeOperation::DropTable { table })
            .collect();
        (drops, detached)
    }
}

fn cyclic(tables: BTreeSet<TableName>) -> SchemaError {
    SchemaError::CyclicDependency {
        tables: tables.iter().map(ToString::to_string).collect(),
    }
}

fn into_tables(operations: Vec<ChangeOperation>) -> Vec<Table> {
    operations
        .into_iter()
        .filter_map(|operation| match operation {
            ChangeOperation::CreateTable { table } | ChangeOperation::DropTable { table } => {
                Some(table)
            }
            _ => None,
        })
        .collect()
}

fn pick(tables: Vec<Table>, order: &[usize]) -> Vec<Table> {
    let mut slots: Vec<Option<Table>> = tables.into_iter().map(Some).collect();
    order.iter().filter_map(|&i| slots[i].take()).collect()
}

/// Removes foreign keys pointing into `cycle` from a table inside it.
fn detach_foreign_keys(table: &mut Table, cycle: &BTreeSet<TableName>) -> Vec<ForeignKey> {
    if !cycle.contains(&table.name) {
        return Vec::new();
    }
    let (detached, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut table.foreign_keys)
        .into_iter()
        .partition(|fk| fk.referenced_table != table.name && cycle.contains(&fk.referenced_table));
    table.foreign_keys = kept;
    detached
}

/// Kahn's algorithm over the foreign keys between `tables`.
///
/// Returns indices into `tables`, dependencies first, ties broken by input
/// order. References to tables outside the list and self-references are
/// ignored. On failure returns the tables that lie on a cycle.
fn topological_order(tables: &[Table]) -> std::result::Result<Vec<usize>, BTreeSet<TableName>> {
    let position: BTreeMap<&TableName, usize> =
        tables.iter().enumerate().map(|(i, t)| (&t.name, i)).collect();

    let mut in_degree = vec![0_usize; tables.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    for (i, table) in tables.iter().enumerate() {
        for dependency in table.dependencies() {
            if let Some(&j) = position.get(&dependency) {
                in_degree[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..tables.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(tables.len());
    let mut remaining = in_degree.clone();

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &dependent in &dependents[i] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() == tables.len() {
        return Ok(order);
    }

    // Peel off tables that only hang off a cycle without being part of it.
    let mut core: BTreeSet<usize> = (0..tables.len()).filter(|&i| remaining[i] > 0).collect();
    loop {
        let leaves: Vec<usize> = core
            .iter()
            .copied()
            .filter(|&i| !core.iter().any(|&j| dependents[i].contains(&j)))
            .collect();
        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            core.remove(&leaf);
        }
    }

    Err(core.into_iter().map(|i| tables[i].name.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{integer, ForeignKeyBuilder, TableBuilder};
    use crate::dialect::{Dialect, PostgresDialect, SqliteDialect};
    use crate::schema::EnumType;

    fn table(name: &str, references: &[&str]) -> Table {
        let mut builder = TableBuilder::new()
            .name(name)
            .column(integer("id").primary().build());
        for target in references {
            let column = format!("{target}_id");
            builder = builder
                .column(integer(column.as_str()).build())
                .foreign_key(
                    ForeignKeyBuilder::new(&[column.as_str()], *target, &["id"])
                        .name(format!("FK_{name}_{target}"))
                        .build(),
                );
        }
        builder.build()
    }

    fn create(table: Table) -> ChangeOperation {
        ChangeOperation::CreateTable { table }
    }

    fn names(operations: &[ChangeOperation]) -> Vec<String> {
        operations
            .iter()
            .filter_map(|op| op.table().map(ToString::to_string))
            .collect()
    }

    fn pg() -> Planner {
        Planner::new(PostgresDialect::new().capabilities())
    }

    #[test]
    fn referenced_tables_are_created_first() {
        let plan = pg()
            .plan(vec![
                create(table("comments", &["posts", "users"])),
                create(table("posts", &["users"])),
                create(table("users", &[])),
            ])
            .unwrap();
        assert_eq!(names(&plan), vec!["users", "posts", "comments"]);
    }

    #[test]
    fn referencing_tables_are_dropped_first() {
        let plan = pg()
            .plan(vec![
                ChangeOperation::DropTable {
                    table: table("users", &[]),
                },
                ChangeOperation::DropTable {
                    table: table("posts", &["users"]),
                },
            ])
            .unwrap();
        assert_eq!(names(&plan), vec!["posts", "users"]);
    }

    #[test]
    fn cycles_defer_foreign_keys() {
        let plan = pg()
            .plan(vec![
                create(table("a", &["b"])),
                create(table("b", &["a"])),
                create(table("c", &["a"])),
            ])
            .unwrap();

        let creates = plan
            .iter()
            .filter(|op| matches!(op, ChangeOperation::CreateTable { .. }))
            .count();
        let deferred: Vec<_> = plan
            .iter()
            .filter_map(|op| match op {
                ChangeOperation::CreateForeignKey { foreign_key, .. } => {
                    Some(foreign_key.name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(creates, 3);
        assert_eq!(deferred, vec!["FK_a_b", "FK_b_a"]);
        // c only hangs off the cycle and keeps its inline foreign key.
        assert!(matches!(plan.last(), Some(ChangeOperation::CreateForeignKey { .. })));
        assert_eq!(names(&plan)[2], "c");
    }

    #[test]
    fn cycles_fail_without_constraint_alteration() {
        let capabilities = Capabilities {
            alter_constraints: false,
            forward_references: false,
            ..PostgresDialect::new().capabilities()
        };
        let err = Planner::new(capabilities)
            .plan(vec![create(table("a", &["b"])), create(table("b", &["a"]))])
            .unwrap_err();
        match err {
            SchemaError::CyclicDependency { tables } => assert_eq!(tables, vec!["a", "b"]),
            _ => panic!("Expected CyclicDependency"),
        }
    }

    #[test]
    fn forward_references_tolerate_cycles() {
        let planner = Planner::new(SqliteDialect::new().capabilities());
        let plan = planner
            .plan(vec![create(table("a", &["b"])), create(table("b", &["a"]))])
            .unwrap();
        assert_eq!(names(&plan), vec!["a", "b"]);
    }

    #[test]
    fn self_references_are_not_cycles() {
        let plan = pg().plan(vec![create(table("nodes", &["nodes"]))]).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn phases_are_respected() {
        let users = TableName::new("users");
        let enum_type = EnumType {
            name: "status_enum".into(),
            values: vec!["A".into()],
        };
        let plan = pg()
            .plan(vec![
                ChangeOperation::DropEnum {
                    enum_type: enum_type.clone(),
                },
                ChangeOperation::AddColumn {
                    table: users.clone(),
                    column: integer("age").build(),
                },
                ChangeOperation::CreateEnum { enum_type },
                ChangeOperation::DropPrimaryKey {
                    table: users.clone(),
                    columns: vec!["id".into()],
                },
                ChangeOperation::DropColumn {
                    table: users,
                    column: integer("id").build(),
                },
            ])
            .unwrap();

        let kinds: Vec<_> = plan.iter().map(Phase::of).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
        assert!(matches!(plan[0], ChangeOperation::DropPrimaryKey { .. }));
        assert!(matches!(plan[4], ChangeOperation::DropEnum { .. }));
    }
}
