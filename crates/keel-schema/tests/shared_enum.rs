//! Shared enum type scenarios on PostgreSQL.
//!
//! `table_a.status` and `table_b.status` both use the named type
//! `shared_status_enum`. The actual schema is what introspection would
//! return after the previous synchronisation.

use keel_schema::prelude::*;

fn status(values: &[&str]) -> Column {
    enumeration("status", values)
        .enum_name("shared_status_enum")
        .build()
}

fn table(name: &str, status_column: Option<Column>) -> Table {
    let mut table = TableBuilder::new()
        .name(name)
        .column(integer("id").primary().increment().build())
        .build();
    table.columns.extend(status_column);
    table
}

fn schema(tables: Vec<Table>) -> Schema {
    let mut registry = EntityRegistry::new();
    for table in tables {
        registry.register(table);
    }
    registry.build().unwrap()
}

fn both(values: &[&str]) -> Schema {
    schema(vec![
        table("table_a", Some(status(values))),
        table("table_b", Some(status(values))),
    ])
}

fn plan_sql(desired: &Schema, actual: &Schema, options: DiffOptions) -> Result<SqlInMemory> {
    let dialect = PostgresDialect::new();
    let operations = Differ::new(&dialect)
        .with_options(options)
        .diff(desired, actual)?;
    let planned = Planner::new(dialect.capabilities()).plan(operations)?;
    emit_all(&planned, &dialect)
}

fn ignoring(table: &str) -> DiffOptions {
    let mut options = DiffOptions::default();
    options.ignored_tables.insert(TableName::new(table));
    options
}

// =============================================================================
// Dropping a usage
// =============================================================================

#[test]
fn dropping_one_usage_keeps_the_type() {
    let actual = both(&["A", "B"]);
    let desired = schema(vec![
        table("table_a", None),
        table("table_b", Some(status(&["A", "B"]))),
    ]);

    let sql = plan_sql(&desired, &actual, DiffOptions::default()).unwrap();
    assert_eq!(
        sql.up_queries,
        vec!["ALTER TABLE \"table_a\" DROP COLUMN \"status\""]
    );
    assert!(sql.up_queries.iter().all(|q| !q.contains("DROP TYPE")));
    assert_eq!(
        desired.enums["shared_status_enum"].values,
        vec!["A".to_string(), "B".to_string()]
    );
}

#[test]
fn dropping_every_usage_drops_the_type_last() {
    let actual = both(&["A", "B"]);
    let desired = schema(vec![table("table_a", None), table("table_b", None)]);

    let sql = plan_sql(&desired, &actual, DiffOptions::default()).unwrap();
    assert_eq!(
        sql.up_queries,
        vec![
            "ALTER TABLE \"table_a\" DROP COLUMN \"status\"",
            "ALTER TABLE \"table_b\" DROP COLUMN \"status\"",
            "DROP TYPE \"shared_status_enum\"",
        ]
    );
    assert_eq!(
        sql.down_queries[0],
        "CREATE TYPE \"shared_status_enum\" AS ENUM ('A', 'B')"
    );
}

#[test]
fn usage_outside_sync_scope_keeps_the_type() {
    let actual = both(&["A", "B"]);
    let desired = schema(vec![table("table_a", None)]);

    let sql = plan_sql(&desired, &actual, ignoring("table_b")).unwrap();
    assert_eq!(
        sql.up_queries,
        vec!["ALTER TABLE \"table_a\" DROP COLUMN \"status\""]
    );
}

#[test]
fn dropping_a_table_keeps_the_type_used_elsewhere() {
    let actual = both(&["A", "B"]);
    let desired = schema(vec![table("table_b", Some(status(&["A", "B"])))]);

    let sql = plan_sql(&desired, &actual, DiffOptions::default()).unwrap();
    assert_eq!(sql.up_queries, vec!["DROP TABLE \"table_a\""]);
}

// =============================================================================
// Adding a value
// =============================================================================

#[test]
fn adding_a_value_is_emitted_once_per_type() {
    let actual = both(&["A", "B"]);
    let desired = both(&["A", "B", "C"]);

    let sql = plan_sql(&desired, &actual, DiffOptions::default()).unwrap();
    assert_eq!(
        sql.up_queries,
        vec!["ALTER TYPE \"shared_status_enum\" ADD VALUE IF NOT EXISTS 'C'"]
    );
}

#[test]
fn adding_a_value_per_table_pass_is_idempotent() {
    let actual = both(&["A", "B"]);
    let desired = both(&["A", "B", "C"]);

    // One pass per table, as when each table is synchronised on its own.
    let first = plan_sql(&desired, &actual, ignoring("table_b")).unwrap();
    let second = plan_sql(&desired, &actual, ignoring("table_a")).unwrap();
    assert_eq!(first.up_queries, second.up_queries);
    assert!(first.up_queries[0].contains("ADD VALUE IF NOT EXISTS"));

    // Once the value exists nothing is left to do.
    let applied = both(&["A", "B", "C"]);
    let sql = plan_sql(&desired, &applied, DiffOptions::default()).unwrap();
    assert!(sql.is_empty());
}

// =============================================================================
// Removing a value
// =============================================================================

#[test]
fn removing_a_value_from_a_shared_type_fails_before_sql() {
    let actual = both(&["A", "B"]);
    let desired = both(&["A"]);

    let err = plan_sql(&desired, &actual, DiffOptions::default()).unwrap_err();
    match err {
        SchemaError::UnsupportedChange { object, reason } => {
            assert_eq!(object, "enum type shared_status_enum");
            assert!(reason.contains("table_a.status"));
            assert!(reason.contains("table_b.status"));
        }
        other => panic!("Expected UnsupportedChange, got {other:?}"),
    }
}

#[test]
fn removing_a_value_counts_users_outside_scope() {
    let actual = both(&["A", "B"]);
    let desired = schema(vec![table("table_a", Some(status(&["A"])))]);

    let err = plan_sql(&desired, &actual, ignoring("table_b")).unwrap_err();
    assert!(matches!(err, SchemaError::UnsupportedChange { .. }));
}

#[test]
fn removing_a_value_from_a_private_type_replaces_it() {
    let actual = schema(vec![table("table_a", Some(status(&["A", "B"])))]);
    let desired = schema(vec![table("table_a", Some(status(&["A"])))]);

    let sql = plan_sql(&desired, &actual, DiffOptions::default()).unwrap();
    assert_eq!(
        sql.up_queries,
        vec![
            "ALTER TYPE \"shared_status_enum\" RENAME TO \"shared_status_enum_old\"",
            "CREATE TYPE \"shared_status_enum\" AS ENUM ('A')",
            "ALTER TABLE \"table_a\" ALTER COLUMN \"status\" TYPE \"shared_status_enum\" \
             USING \"status\"::text::\"shared_status_enum\"",
            "DROP TYPE \"shared_status_enum_old\"",
        ]
    );
}

// =============================================================================
// Inserting a value
// =============================================================================

#[test]
fn inserting_a_value_keeps_its_position() {
    let actual = both(&["A", "B"]);
    let desired = both(&["A", "C", "B"]);

    let sql = plan_sql(&desired, &actual, DiffOptions::default()).unwrap();
    assert_eq!(
        sql.up_queries,
        vec!["ALTER TYPE \"shared_status_enum\" ADD VALUE IF NOT EXISTS 'C' BEFORE 'B'"]
    );

    // The catalog now lists the values in the desired order.
    let applied = both(&["A", "C", "B"]);
    let sql = plan_sql(&desired, &applied, DiffOptions::default()).unwrap();
    assert!(sql.is_empty());
}

// =============================================================================
// Unmapped tables kept in place
// =============================================================================

fn keeping_unknown_tables() -> DiffOptions {
    DiffOptions {
        drop_unknown_tables: false,
        ..DiffOptions::default()
    }
}

#[test]
fn kept_unmapped_table_keeps_the_type() {
    let actual = both(&["A", "B"]);
    let desired = schema(vec![table("table_a", None)]);

    let sql = plan_sql(&desired, &actual, keeping_unknown_tables()).unwrap();
    assert_eq!(
        sql.up_queries,
        vec!["ALTER TABLE \"table_a\" DROP COLUMN \"status\""]
    );

    // Dropping unmapped tables frees the type.
    let sql = plan_sql(&desired, &actual, DiffOptions::default()).unwrap();
    assert_eq!(sql.up_queries.last().unwrap(), "DROP TYPE \"shared_status_enum\"");
}

#[test]
fn removing_a_value_counts_kept_unmapped_tables() {
    let actual = both(&["A", "B"]);
    let desired = schema(vec![table("table_a", Some(status(&["A"])))]);

    let err = plan_sql(&desired, &actual, keeping_unknown_tables()).unwrap_err();
    match err {
        SchemaError::UnsupportedChange { reason, .. } => {
            assert!(reason.contains("table_b.status"));
        }
        other => panic!("Expected UnsupportedChange, got {other:?}"),
    }
}
