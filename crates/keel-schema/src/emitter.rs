//! DDL emitter.
//!
//! Translates planned [`ChangeOperation`]s into dialect SQL. Every
//! operation yields an `up` list and a `down` list; `down` is always the
//! SQL of [`ChangeOperation::reverse`], so the inverse is built from the
//! definition carried by the operation and never re-derived.

use serde::Serialize;

use crate::diff::defaults_equivalent;
use crate::dialect::{Capabilities, ColumnAlteration, CommentStyle, ConstraintKind, Dialect};
use crate::error::{Result, SchemaError};
use crate::naming;
use crate::operation::{AddedValue, ChangeOperation, EnumChange, EnumColumn, ValuePosition};
use crate::schema::{
    CheckConstraint, Column, ForeignKey, Generation, Index, NullsOrder, Table, TableName,
    UniqueConstraint,
};

/// Forward and reverse SQL of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlPair {
    pub up: Vec<String>,
    pub down: Vec<String>,
}

/// SQL of a whole plan.
///
/// `down_queries` undo `up_queries` when run in the order given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SqlInMemory {
    pub up_queries: Vec<String>,
    pub down_queries: Vec<String>,
}

impl SqlInMemory {
    /// Returns true when there is nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.up_queries.is_empty() && self.down_queries.is_empty()
    }
}

/// Emits the up/down SQL of a single operation.
///
/// # Errors
///
/// Returns [`SchemaError::UnsupportedChange`] when the dialect cannot
/// express the operation or its reverse.
pub fn emit(operation: &ChangeOperation, dialect: &dyn Dialect) -> Result<SqlPair> {
    let emitter = Emitter::new(dialect);
    Ok(SqlPair {
        up: emitter.statements(operation)?,
        down: emitter.statements(&operation.reverse())?,
    })
}

/// Emits a planned list of operations.
///
/// # Errors
///
/// Returns the first emission error.
pub fn emit_all(operations: &[ChangeOperation], dialect: &dyn Dialect) -> Result<SqlInMemory> {
    let mut sql = SqlInMemory::default();
    let mut downs = Vec::with_capacity(operations.len());
    for operation in operations {
        let pair = emit(operation, dialect)?;
        sql.up_queries.extend(pair.up);
        downs.push(pair.down);
    }
    sql.down_queries = downs.into_iter().rev().flatten().collect();
    Ok(sql)
}

struct Emitter<'a> {
    dialect: &'a dyn Dialect,
    capabilities: Capabilities,
}

impl<'a> Emitter<'a> {
    fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            capabilities: dialect.capabilities(),
        }
    }

    fn qi(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn qt(&self, table: &TableName) -> String {
        self.dialect.quote_table(table)
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.qi(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn statements(&self, operation: &ChangeOperation) -> Result<Vec<String>> {
        match operation {
            ChangeOperation::CreateTable { table } => self.create_table(table),
            ChangeOperation::DropTable { table } => Ok(vec![format!("DROP TABLE {}", self.qt(&table.name))]),
            ChangeOperation::AddColumn { table, column } => Ok(vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.qt(table),
                self.column_definition(column, false)
            )]),
            ChangeOperation::DropColumn { table, column } => Ok(vec![self.drop_column(table, column)]),
            ChangeOperation::ChangeColumn { table, from, to } => self.change_column(table, from, to),
            ChangeOperation::CreatePrimaryKey { table, columns } => {
                self.require_alter_constraints(table, "adding a primary key")?;
                Ok(vec![format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                    self.qt(table),
                    self.qi(&naming::primary_key_name(table)),
                    self.column_list(columns)
                )])
            }
            ChangeOperation::DropPrimaryKey { table, .. } => {
                self.require_alter_constraints(table, "dropping a primary key")?;
                Ok(vec![self.dialect.drop_primary_key_sql(table)])
            }
            ChangeOperation::ChangeTableComment { table, to, .. } => {
                Ok(self.table_comment(table, to.as_deref()).into_iter().collect())
            }
            ChangeOperation::RecreateTable { from, to } => self.recreate_table(from, to),
            ChangeOperation::CreateIndex { table, index } => Ok(vec![self.create_index(table, index)?]),
            ChangeOperation::DropIndex { table, index } => {
                Ok(vec![self.dialect.drop_index_sql(table, &index.name)])
            }
            ChangeOperation::CreateForeignKey { table, foreign_key } => {
                self.require_alter_constraints(table, "adding a foreign key")?;
                Ok(vec![format!(
                    "ALTER TABLE {} ADD {}",
                    self.qt(table),
                    self.foreign_key_clause(foreign_key)
                )])
            }
            ChangeOperation::DropForeignKey { table, foreign_key } => {
                self.require_alter_constraints(table, "dropping a foreign key")?;
                Ok(vec![self.dialect.drop_constraint_sql(
                    table,
                    &foreign_key.name,
                    ConstraintKind::ForeignKey,
                )])
            }
            ChangeOperation::CreateUniqueConstraint { table, constraint } => {
                self.require_alter_constraints(table, "adding a unique constraint")?;
                Ok(vec![format!(
                    "ALTER TABLE {} ADD {}",
                    self.qt(table),
                    self.unique_clause(constraint)
                )])
            }
            ChangeOperation::DropUniqueConstraint { table, constraint } => {
                self.require_alter_constraints(table, "dropping a unique constraint")?;
                Ok(vec![self.dialect.drop_constraint_sql(
                    table,
                    &constraint.name,
                    ConstraintKind::Unique,
                )])
            }
            ChangeOperation::CreateCheckConstraint { table, constraint } => {
                self.require_alter_constraints(table, "adding a check constraint")?;
                Ok(vec![format!(
                    "ALTER TABLE {} ADD {}",
                    self.qt(table),
                    self.check_clause(constraint)
                )])
            }
            ChangeOperation::DropCheckConstraint { table, constraint } => {
                self.require_alter_constraints(table, "dropping a check constraint")?;
                Ok(vec![self.dialect.drop_constraint_sql(
                    table,
                    &constraint.name,
                    ConstraintKind::Check,
                )])
            }
            ChangeOperation::CreateEnum { enum_type } => {
                self.require_named_enums(&enum_type.name)?;
                Ok(vec![format!(
                    "CREATE TYPE {} AS ENUM ({})",
                    self.qi(&enum_type.name),
                    self.literal_list(&enum_type.values)
                )])
            }
            ChangeOperation::DropEnum { enum_type } => {
                self.require_named_enums(&enum_type.name)?;
                Ok(vec![format!("DROP TYPE {}", self.qi(&enum_type.name))])
            }
            ChangeOperation::AlterEnum {
                name,
                to,
                change,
                columns,
                ..
            } => {
                self.require_named_enums(name)?;
                match change {
                    EnumChange::AddValues(values) => Ok(self.add_enum_values(name, values)),
                    EnumChange::Replace => Ok(self.replace_enum(name, to, columns)),
                }
            }
        }
    }

    fn require_alter_constraints(&self, table: &TableName, what: &str) -> Result<()> {
        if self.capabilities.alter_constraints {
            Ok(())
        } else {
            Err(SchemaError::unsupported(
                format!("table {table}"),
                format!("{} cannot alter constraints ({what})", self.dialect.name()),
            ))
        }
    }

    fn require_named_enums(&self, name: &str) -> Result<()> {
        if self.capabilities.named_enums {
            Ok(())
        } else {
            Err(SchemaError::unsupported(
                format!("enum type {name}"),
                format!("{} has no named enum types", self.dialect.name()),
            ))
        }
    }

    fn literal_list(&self, values: &[String]) -> String {
        values
            .iter()
            .map(|v| self.dialect.quote_literal(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ================================================================
    // Column definitions
    // ================================================================

    /// Renders the default clause value, including generated UUIDs.
    fn default_sql(&self, column: &Column) -> Option<String> {
        if column.generation == Some(Generation::Uuid) && self.capabilities.uuid_generation {
            return self.dialect.uuid_default().map(ToString::to_string);
        }
        column
            .effective_default()
            .map(|d| self.dialect.render_default(d))
    }

    /// `"name" type [GENERATED ...] [NOT NULL] [DEFAULT ...] ...`
    ///
    /// `inline_primary` declares the column as the table's sole key, as
    /// needed for auto-increment on some dialects.
    fn column_definition(&self, column: &Column, inline_primary: bool) -> String {
        let mut sql = format!(
            "{} {}",
            self.qi(&column.name),
            self.dialect.native_type(column)
        );

        match &column.generation {
            Some(Generation::Stored(expression)) => {
                sql.push_str(&format!(" GENERATED ALWAYS AS ({expression}) STORED"));
            }
            Some(Generation::Increment) => {
                let clause = self.dialect.increment_clause();
                if self.dialect.autoincrement_primary_key() {
                    if inline_primary {
                        sql.push_str(" PRIMARY KEY");
                        if let Some(clause) = clause {
                            sql.push(' ');
                            sql.push_str(clause);
                        }
                    }
                } else if let Some(clause) = clause {
                    sql.push(' ');
                    sql.push_str(clause);
                }
            }
            Some(Generation::Uuid) | None => {}
        }

        if !column.nullable && !inline_primary {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = self.default_sql(column) {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default);
        }
        if column.is_enum() && self.dialect.enum_check_constraint() {
            sql.push_str(&format!(
                " CHECK ({} IN ({}))",
                self.qi(&column.name),
                self.literal_list(&column.enum_values)
            ));
        }
        if self.capabilities.comments == CommentStyle::Inline {
            if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
                sql.push_str(" COMMENT ");
                sql.push_str(&self.dialect.quote_literal(comment));
            }
        }
        sql
    }

    fn drop_column(&self, table: &TableName, column: &Column) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.qt(table),
            self.qi(&column.name)
        )
    }

    fn column_comment(&self, table: &TableName, column: &str, comment: Option<&str>) -> String {
        format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            self.qt(table),
            self.qi(column),
            comment.map_or_else(|| "NULL".to_string(), |c| self.dialect.quote_literal(c))
        )
    }

    fn table_comment(&self, table: &TableName, comment: Option<&str>) -> Option<String> {
        let comment = comment.filter(|c| !c.is_empty());
        match self.capabilities.comments {
            CommentStyle::Unsupported => None,
            CommentStyle::Statement => Some(format!(
                "COMMENT ON TABLE {} IS {}",
                self.qt(table),
                comment.map_or_else(|| "NULL".to_string(), |c| self.dialect.quote_literal(c))
            )),
            CommentStyle::Inline => Some(format!(
                "ALTER TABLE {} COMMENT = {}",
                self.qt(table),
                self.dialect.quote_literal(comment.unwrap_or_default())
            )),
        }
    }

    // ================================================================
    // Tables
    // ================================================================

    /// The column declared as an inline auto-increment key, if any.
    fn inline_primary<'t>(&self, table: &'t Table) -> Option<&'t str> {
        if !self.dialect.autoincrement_primary_key() {
            return None;
        }
        let primary = table.primary_columns();
        match primary.as_slice() {
            [only] => table
                .column(only)
                .filter(|c| c.generation == Some(Generation::Increment))
                .map(|c| c.name.as_str()),
            _ => None,
        }
    }

    /// `CREATE TABLE` for `table` under the name `name`, without indices.
    fn create_table_statement(&self, name: &TableName, table: &Table) -> String {
        let inline_primary = self.inline_primary(table);
        let mut parts: Vec<String> = table
            .persisted_columns()
            .map(|c| self.column_definition(c, inline_primary == Some(c.name.as_str())))
            .collect();

        let primary = table.primary_columns();
        if !primary.is_empty() && inline_primary.is_none() {
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.qi(&naming::primary_key_name(&table.name)),
                self.column_list(&primary)
            ));
        }
        parts.extend(table.uniques.iter().map(|u| self.unique_clause(u)));
        parts.extend(table.checks.iter().map(|c| self.check_clause(c)));
        parts.extend(table.foreign_keys.iter().map(|fk| self.foreign_key_clause(fk)));

        let mut sql = format!("CREATE TABLE {} ({})", self.qt(name), parts.join(", "));
        if self.capabilities.comments == CommentStyle::Inline {
            if let Some(comment) = table.comment.as_deref().filter(|c| !c.is_empty()) {
                sql.push_str(" COMMENT = ");
                sql.push_str(&self.dialect.quote_literal(comment));
            }
        }
        sql
    }

    fn create_table(&self, table: &Table) -> Result<Vec<String>> {
        let mut statements = vec![self.create_table_statement(&table.name, table)];
        for index in &table.indices {
            statements.push(self.create_index(&table.name, index)?);
        }
        if self.capabilities.comments == CommentStyle::Statement {
            if table.comment.as_deref().is_some_and(|c| !c.is_empty()) {
                statements.extend(self.table_comment(&table.name, table.comment.as_deref()));
            }
            for column in table.persisted_columns() {
                if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
                    statements.push(self.column_comment(&table.name, &column.name, Some(comment)));
                }
            }
        }
        Ok(statements)
    }

    /// Rebuilds a table under a temporary name, copies the rows of the
    /// columns both versions share, then swaps it in.
    fn recreate_table(&self, from: &Table, to: &Table) -> Result<Vec<String>> {
        let temporary = TableName {
            schema: to.name.schema.clone(),
            name: format!("temporary_{}", to.name.name),
        };
        let mut statements = vec![self.create_table_statement(&temporary, to)];

        let shared: Vec<String> = to
            .persisted_columns()
            .filter(|c| c.stored_expression().is_none())
            .filter(|c| {
                from.column(&c.name)
                    .is_some_and(|old| old.stored_expression().is_none())
            })
            .map(|c| self.qi(&c.name))
            .collect();
        if !shared.is_empty() {
            let columns = shared.join(", ");
            statements.push(format!(
                "INSERT INTO {}({columns}) SELECT {columns} FROM {}",
                self.qt(&temporary),
                self.qt(&from.name)
            ));
        }

        statements.push(format!("DROP TABLE {}", self.qt(&from.name)));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.qt(&temporary),
            self.qi(&to.name.name)
        ));
        for index in &to.indices {
            statements.push(self.create_index(&to.name, index)?);
        }
        Ok(statements)
    }

    // ================================================================
    // Column changes
    // ================================================================

    fn change_column(&self, table: &TableName, from: &Column, to: &Column) -> Result<Vec<String>> {
        // Computed columns cannot be altered in place anywhere.
        let stored_changed = (from.stored_expression().is_some() || to.stored_expression().is_some())
            && from.generation != to.generation;
        if stored_changed {
            return Ok(vec![
                self.drop_column(table, from),
                format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    self.qt(table),
                    self.column_definition(to, false)
                ),
            ]);
        }

        match self.capabilities.column_alteration {
            ColumnAlteration::Recreate => Err(SchemaError::unsupported(
                format!("column {table}.{}", to.name),
                format!("{} requires recreating the table", self.dialect.name()),
            )),
            ColumnAlteration::ModifyDefinition => Ok(vec![format!(
                "ALTER TABLE {} MODIFY COLUMN {}",
                self.qt(table),
                self.column_definition(to, false)
            )]),
            ColumnAlteration::PerAttribute => Ok(self.alter_column_attributes(table, from, to)),
        }
    }

    /// One `ALTER COLUMN` per attribute that actually differs.
    fn alter_column_attributes(&self, table: &TableName, from: &Column, to: &Column) -> Vec<String> {
        let alter = |clause: String| {
            format!(
                "ALTER TABLE {} ALTER COLUMN {} {clause}",
                self.qt(table),
                self.qi(&to.name)
            )
        };
        let mut statements = Vec::new();

        let from_type = self.dialect.native_type(from);
        let to_type = self.dialect.native_type(to);
        let type_changed = !from_type.eq_ignore_ascii_case(&to_type);

        let from_default = self.default_sql(from);
        let to_default = self.default_sql(to);
        let default_changed = match (from.effective_default(), to.effective_default()) {
            (Some(_), Some(_)) => {
                !defaults_equivalent(from.effective_default(), to.effective_default())
            }
            _ => from_default != to_default,
        };
        // A typed default may not survive the cast.
        let reset_default = type_changed && from_default.is_some();

        if from.generation == Some(Generation::Increment)
            && to.generation != Some(Generation::Increment)
        {
            statements.push(alter("DROP IDENTITY IF EXISTS".to_string()));
        }
        if reset_default || (default_changed && to_default.is_none() && from_default.is_some()) {
            statements.push(alter("DROP DEFAULT".to_string()));
        }
        if type_changed {
            let using = if to.is_enum() {
                format!(
                    " USING {}::text::{to_type}",
                    self.qi(&to.name)
                )
            } else {
                String::new()
            };
            statements.push(alter(format!("TYPE {to_type}{using}")));
        }
        if from.nullable != to.nullable {
            statements.push(alter(
                if to.nullable { "DROP NOT NULL" } else { "SET NOT NULL" }.to_string(),
            ));
        }
        if let Some(default) = &to_default {
            if default_changed || reset_default {
                statements.push(alter(format!("SET DEFAULT {default}")));
            }
        }
        if to.generation == Some(Generation::Increment)
            && from.generation != Some(Generation::Increment)
        {
            if let Some(clause) = self.dialect.increment_clause() {
                statements.push(alter(format!("ADD {clause}")));
            }
        }
        if self.capabilities.comments == CommentStyle::Statement
            && from.comment.as_deref().filter(|c| !c.is_empty())
                != to.comment.as_deref().filter(|c| !c.is_empty())
        {
            statements.push(self.column_comment(table, &to.name, to.comment.as_deref()));
        }
        statements
    }

    // ================================================================
    // Indices and constraints
    // ================================================================

    fn create_index(&self, table: &TableName, index: &Index) -> Result<String> {
        if index.where_clause.is_some() && !self.capabilities.partial_indexes {
            return Err(SchemaError::unsupported(
                format!("index {}", index.name),
                format!("{} has no partial indexes", self.dialect.name()),
            ));
        }

        let columns: Vec<String> = index
            .columns
            .iter()
            .map(|column| {
                let order = index.order_of(column);
                let mut sql = self.qi(column);
                if order.descending {
                    sql.push_str(" DESC");
                }
                if self.capabilities.nulls_ordering {
                    match order.nulls {
                        Some(NullsOrder::First) => sql.push_str(" NULLS FIRST"),
                        Some(NullsOrder::Last) => sql.push_str(" NULLS LAST"),
                        None => {}
                    }
                }
                sql
            })
            .collect();

        let modifier = self
            .dialect
            .index_modifier(index)
            .map(|m| format!("{m} "))
            .unwrap_or_default();
        let method = self
            .dialect
            .index_method(index)
            .map(|m| format!(" USING {m}"))
            .unwrap_or_default();
        let mut sql = format!(
            "CREATE {modifier}INDEX {} ON {}{method} ({})",
            self.qi(&index.name),
            self.qt(table),
            columns.join(", ")
        );
        if let Some(predicate) = &index.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        Ok(sql)
    }

    fn unique_clause(&self, constraint: &UniqueConstraint) -> String {
        format!(
            "CONSTRAINT {} UNIQUE ({})",
            self.qi(&constraint.name),
            self.column_list(&constraint.columns)
        )
    }

    fn check_clause(&self, constraint: &CheckConstraint) -> String {
        format!(
            "CONSTRAINT {} CHECK ({})",
            self.qi(&constraint.name),
            constraint.expression
        )
    }

    fn foreign_key_clause(&self, foreign_key: &ForeignKey) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            self.qi(&foreign_key.name),
            self.column_list(&foreign_key.columns),
            self.qt(&foreign_key.referenced_table),
            self.column_list(&foreign_key.referenced_columns),
            foreign_key.on_delete.as_sql(),
            foreign_key.on_update.as_sql()
        )
    }

    // ================================================================
    // Enum types
    // ================================================================

    fn add_enum_values(&self, name: &str, values: &[AddedValue]) -> Vec<String> {
        let if_not_exists = if self.capabilities.enum_add_value_if_not_exists {
            "IF NOT EXISTS "
        } else {
            ""
        };
        values
            .iter()
            .map(|added| {
                let position = match &added.position {
                    None => String::new(),
                    Some(ValuePosition::Before(neighbor)) => {
                        format!(" BEFORE {}", self.dialect.quote_literal(neighbor))
                    }
                    Some(ValuePosition::After(neighbor)) => {
                        format!(" AFTER {}", self.dialect.quote_literal(neighbor))
                    }
                };
                format!(
                    "ALTER TYPE {} ADD VALUE {if_not_exists}{}{position}",
                    self.qi(name),
                    self.dialect.quote_literal(&added.value)
                )
            })
            .collect()
    }

    /// Renames the type away, creates the new one, converts every using
    /// column through text and drops the old type.
    fn replace_enum(&self, name: &str, values: &[String], columns: &[EnumColumn]) -> Vec<String> {
        let old = format!("{name}_old");
        let mut statements = vec![
            format!("ALTER TYPE {} RENAME TO {}", self.qi(name), self.qi(&old)),
            format!(
                "CREATE TYPE {} AS ENUM ({})",
                self.qi(name),
                self.literal_list(values)
            ),
        ];
        for usage in columns {
            let alter = |clause: String| {
                format!(
                    "ALTER TABLE {} ALTER COLUMN {} {clause}",
                    self.qt(&usage.table),
                    self.qi(&usage.column)
                )
            };
            if usage.from_default.is_some() {
                statements.push(alter("DROP DEFAULT".to_string()));
            }
            statements.push(alter(format!(
                "TYPE {} USING {}::text::{}",
                self.qi(name),
                self.qi(&usage.column),
                self.qi(name)
            )));
            if let Some(default) = &usage.to_default {
                statements.push(alter(format!(
                    "SET DEFAULT {}",
                    self.dialect.render_default(default)
                )));
            }
        }
        statements.push(format!("DROP TYPE {}", self.qi(&old)));
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{enumeration, integer, text, varchar, IndexBuilder, TableBuilder};
    use crate::dialect::{MySqlDialect, PostgresDialect, SqliteDialect};
    use crate::registry::EntityRegistry;
    use crate::schema::{DefaultValue, EnumType};

    fn users() -> Table {
        let schema = EntityRegistry::new()
            .with(
                TableBuilder::new()
                    .name("users")
                    .column(integer("id").primary().increment().build())
                    .column(varchar("email", 255).not_null().unique().build())
                    .index(IndexBuilder::new(&["email"]).where_clause("email IS NOT NULL").build())
                    .build(),
            )
            .build()
            .unwrap();
        schema.tables[0].clone()
    }

    #[test]
    fn create_table_postgres() {
        let pair = emit(&ChangeOperation::CreateTable { table: users() }, &PostgresDialect::new()).unwrap();
        assert_eq!(
            pair.up[0],
            "CREATE TABLE \"users\" (\"id\" integer GENERATED BY DEFAULT AS IDENTITY NOT NULL, \
             \"email\" character varying(255) NOT NULL, \
             CONSTRAINT \"PK_users\" PRIMARY KEY (\"id\"), \
             CONSTRAINT \"UQ_users_email\" UNIQUE (\"email\"))"
        );
        assert_eq!(
            pair.up[1],
            "CREATE INDEX \"IDX_users_email\" ON \"users\" (\"email\") WHERE email IS NOT NULL"
        );
        assert_eq!(pair.down, vec!["DROP TABLE \"users\""]);
    }

    #[test]
    fn create_table_sqlite_inlines_autoincrement_key() {
        let pair = emit(&ChangeOperation::CreateTable { table: users() }, &SqliteDialect::new()).unwrap();
        assert!(pair.up[0].starts_with(
            "CREATE TABLE \"users\" (\"id\" integer PRIMARY KEY AUTOINCREMENT, \"email\" varchar(255) NOT NULL"
        ));
        assert!(!pair.up[0].contains("PK_users"));
    }

    #[test]
    fn widening_varchar_alters_type_in_place() {
        let op = ChangeOperation::ChangeColumn {
            table: TableName::new("users"),
            from: varchar("name", 50).build(),
            to: varchar("name", 51).build(),
        };
        let pair = emit(&op, &PostgresDialect::new()).unwrap();
        assert_eq!(
            pair.up,
            vec!["ALTER TABLE \"users\" ALTER COLUMN \"name\" TYPE character varying(51)"]
        );
        assert_eq!(
            pair.down,
            vec!["ALTER TABLE \"users\" ALTER COLUMN \"name\" TYPE character varying(50)"]
        );
    }

    #[test]
    fn change_column_touches_only_changed_attributes() {
        let op = ChangeOperation::ChangeColumn {
            table: TableName::new("users"),
            from: integer("age").build(),
            to: integer("age").not_null().default_int(18).build(),
        };
        let pair = emit(&op, &PostgresDialect::new()).unwrap();
        assert_eq!(
            pair.up,
            vec![
                "ALTER TABLE \"users\" ALTER COLUMN \"age\" SET NOT NULL",
                "ALTER TABLE \"users\" ALTER COLUMN \"age\" SET DEFAULT 18",
            ]
        );
        assert_eq!(
            pair.down,
            vec![
                "ALTER TABLE \"users\" ALTER COLUMN \"age\" DROP DEFAULT",
                "ALTER TABLE \"users\" ALTER COLUMN \"age\" DROP NOT NULL",
            ]
        );
    }

    #[test]
    fn mysql_modifies_whole_definition() {
        let op = ChangeOperation::ChangeColumn {
            table: TableName::new("users"),
            from: varchar("name", 50).build(),
            to: varchar("name", 80).not_null().build(),
        };
        let pair = emit(&op, &MySqlDialect::new()).unwrap();
        assert_eq!(
            pair.up,
            vec!["ALTER TABLE `users` MODIFY COLUMN `name` varchar(80) NOT NULL"]
        );
    }

    #[test]
    fn sqlite_cannot_alter_columns() {
        let op = ChangeOperation::ChangeColumn {
            table: TableName::new("users"),
            from: varchar("name", 50).build(),
            to: varchar("name", 51).build(),
        };
        assert!(matches!(
            emit(&op, &SqliteDialect::new()),
            Err(SchemaError::UnsupportedChange { .. })
        ));
    }

    #[test]
    fn sqlite_recreate_copies_shared_columns() {
        let from = TableBuilder::new()
            .name("users")
            .column(integer("id").primary().build())
            .column(varchar("name", 50).build())
            .column(text("legacy").build())
            .build();
        let mut to = from.clone();
        to.columns.retain(|c| c.name != "legacy");
        to.columns[1].length = Some(51);

        let pair = emit(&ChangeOperation::RecreateTable { from, to }, &SqliteDialect::new()).unwrap();
        assert_eq!(
            pair.up,
            vec![
                "CREATE TABLE \"temporary_users\" (\"id\" integer NOT NULL, \"name\" varchar(51), \
                 CONSTRAINT \"PK_users\" PRIMARY KEY (\"id\"))",
                "INSERT INTO \"temporary_users\"(\"id\", \"name\") SELECT \"id\", \"name\" FROM \"users\"",
                "DROP TABLE \"users\"",
                "ALTER TABLE \"temporary_users\" RENAME TO \"users\"",
            ]
        );
        assert!(pair.down[0].contains("\"legacy\" text"));
    }

    #[test]
    fn sqlite_enum_uses_check() {
        let column = enumeration("status", &["A", "B"]).build();
        let pair = emit(
            &ChangeOperation::AddColumn {
                table: TableName::new("t"),
                column,
            },
            &SqliteDialect::new(),
        )
        .unwrap();
        assert_eq!(
            pair.up,
            vec!["ALTER TABLE \"t\" ADD COLUMN \"status\" varchar CHECK (\"status\" IN ('A', 'B'))"]
        );
    }

    #[test]
    fn enum_add_value_is_idempotent_form() {
        let op = ChangeOperation::AlterEnum {
            name: "shared_status_enum".into(),
            from: vec!["A".into(), "B".into()],
            to: vec!["A".into(), "B".into(), "C".into()],
            change: EnumChange::AddValues(vec![AddedValue::appended("C")]),
            columns: vec![],
        };
        let pair = emit(&op, &PostgresDialect::new()).unwrap();
        assert_eq!(
            pair.up,
            vec!["ALTER TYPE \"shared_status_enum\" ADD VALUE IF NOT EXISTS 'C'"]
        );
        assert_eq!(pair.down[0], "ALTER TYPE \"shared_status_enum\" RENAME TO \"shared_status_enum_old\"");
        assert_eq!(pair.down.last().unwrap(), "DROP TYPE \"shared_status_enum_old\"");
    }

    #[test]
    fn enum_added_values_keep_their_position() {
        let op = ChangeOperation::AlterEnum {
            name: "shared_status_enum".into(),
            from: vec!["A".into(), "B".into()],
            to: vec!["A".into(), "C".into(), "B".into(), "D".into()],
            change: EnumChange::AddValues(vec![
                AddedValue::before("C", "B"),
                AddedValue {
                    value: "D".into(),
                    position: Some(ValuePosition::After("B".into())),
                },
            ]),
            columns: vec![],
        };
        let pair = emit(&op, &PostgresDialect::new()).unwrap();
        assert_eq!(
            pair.up,
            vec![
                "ALTER TYPE \"shared_status_enum\" ADD VALUE IF NOT EXISTS 'C' BEFORE 'B'",
                "ALTER TYPE \"shared_status_enum\" ADD VALUE IF NOT EXISTS 'D' AFTER 'B'",
            ]
        );
    }

    #[test]
    fn enum_replace_converts_columns_and_defaults() {
        let op = ChangeOperation::AlterEnum {
            name: "state_enum".into(),
            from: vec!["new".into(), "void".into()],
            to: vec!["new".into()],
            change: EnumChange::Replace,
            columns: vec![EnumColumn {
                table: TableName::new("orders"),
                column: "state".into(),
                from_default: Some(DefaultValue::String("new".into())),
                to_default: Some(DefaultValue::String("new".into())),
            }],
        };
        let pair = emit(&op, &PostgresDialect::new()).unwrap();
        assert_eq!(
            pair.up,
            vec![
                "ALTER TYPE \"state_enum\" RENAME TO \"state_enum_old\"",
                "CREATE TYPE \"state_enum\" AS ENUM ('new')",
                "ALTER TABLE \"orders\" ALTER COLUMN \"state\" DROP DEFAULT",
                "ALTER TABLE \"orders\" ALTER COLUMN \"state\" TYPE \"state_enum\" USING \"state\"::text::\"state_enum\"",
                "ALTER TABLE \"orders\" ALTER COLUMN \"state\" SET DEFAULT 'new'",
                "DROP TYPE \"state_enum_old\"",
            ]
        );
    }

    #[test]
    fn create_enum_pairs_with_drop() {
        let op = ChangeOperation::CreateEnum {
            enum_type: EnumType {
                name: "mood".into(),
                values: vec!["sad".into(), "ok".into()],
            },
        };
        let pair = emit(&op, &PostgresDialect::new()).unwrap();
        assert_eq!(pair.up, vec!["CREATE TYPE \"mood\" AS ENUM ('sad', 'ok')"]);
        assert_eq!(pair.down, vec!["DROP TYPE \"mood\""]);
    }

    #[test]
    fn partial_index_rejected_on_mysql() {
        let op = ChangeOperation::CreateIndex {
            table: TableName::new("users"),
            index: IndexBuilder::new(&["email"])
                .name("IDX_x")
                .where_clause("email IS NOT NULL")
                .build(),
        };
        assert!(emit(&op, &MySqlDialect::new()).is_err());
    }

    #[test]
    fn index_orders_and_methods() {
        let op = ChangeOperation::CreateIndex {
            table: TableName::new("events"),
            index: IndexBuilder::new(&["created_at", "id"])
                .name("IDX_events")
                .order("created_at", true, Some(NullsOrder::Last))
                .build(),
        };
        let pair = emit(&op, &PostgresDialect::new()).unwrap();
        assert_eq!(
            pair.up,
            vec!["CREATE INDEX \"IDX_events\" ON \"events\" (\"created_at\" DESC NULLS LAST, \"id\")"]
        );
        assert_eq!(pair.down, vec!["DROP INDEX \"IDX_events\""]);

        let spatial = ChangeOperation::CreateIndex {
            table: TableName::new("places"),
            index: IndexBuilder::new(&["area"]).name("IDX_area").spatial().build(),
        };
        assert_eq!(
            emit(&spatial, &PostgresDialect::new()).unwrap().up,
            vec!["CREATE INDEX \"IDX_area\" ON \"places\" USING GiST (\"area\")"]
        );
        assert_eq!(
            emit(&spatial, &MySqlDialect::new()).unwrap().up,
            vec!["CREATE SPATIAL INDEX `IDX_area` ON `places` (`area`)"]
        );
    }

    #[test]
    fn emit_all_reverses_down_queries() {
        let table = TableName::new("users");
        let ops = vec![
            ChangeOperation::AddColumn {
                table: table.clone(),
                column: integer("a").build(),
            },
            ChangeOperation::AddColumn {
                table,
                column: integer("b").build(),
            },
        ];
        let sql = emit_all(&ops, &PostgresDialect::new()).unwrap();
        assert_eq!(sql.up_queries.len(), 2);
        assert!(sql.down_queries[0].ends_with("DROP COLUMN \"b\""));
        assert!(sql.down_queries[1].ends_with("DROP COLUMN \"a\""));
    }

    #[test]
    fn foreign_keys_need_constraint_alteration() {
        let op = ChangeOperation::CreateForeignKey {
            table: TableName::new("posts"),
            foreign_key: crate::builder::ForeignKeyBuilder::new(&["user_id"], "users", &["id"])
                .name("FK_posts_user_id")
                .build(),
        };
        assert_eq!(
            emit(&op, &PostgresDialect::new()).unwrap().up,
            vec!["ALTER TABLE \"posts\" ADD CONSTRAINT \"FK_posts_user_id\" FOREIGN KEY (\"user_id\") \
                  REFERENCES \"users\" (\"id\") ON DELETE NO ACTION ON UPDATE NO ACTION"]
        );
        assert!(emit(&op, &SqliteDialect::new()).is_err());
    }
}
