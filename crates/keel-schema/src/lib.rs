//! # keel-schema
//!
//! Schema model, diffing, dependency planning and DDL emission.
//!
//! This crate is pure: it never talks to a database. The runtime in
//! `keel-migrate` introspects the live catalog into a [`Schema`] and feeds
//! it here together with the desired schema:
//!
//! - **Registry** - builds the desired [`Schema`] from explicit table
//!   registrations, deriving names and validating invariants
//! - **Differ** - compares desired and actual schemas into
//!   [`ChangeOperation`]s, treating named enum types as shared resources
//! - **Planner** - orders operations by phase and foreign key dependency
//! - **Emitter** - renders each operation as up/down SQL for a [`Dialect`]
//!
//! ## Example
//!
//! ```rust
//! use keel_schema::prelude::*;
//!
//! let desired = EntityRegistry::new()
//!     .with(
//!         TableBuilder::new()
//!             .name("users")
//!             .column(integer("id").primary().increment().build())
//!             .column(varchar("email", 255).not_null().unique().build())
//!             .build(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let dialect = PostgresDialect::new();
//! let operations = Differ::new(&dialect).diff(&desired, &Schema::new()).unwrap();
//! let planned = Planner::new(dialect.capabilities()).plan(operations).unwrap();
//! let sql = emit_all(&planned, &dialect).unwrap();
//!
//! assert!(sql.up_queries[0].starts_with("CREATE TABLE \"users\""));
//! assert_eq!(sql.down_queries, vec!["DROP TABLE \"users\""]);
//! ```

pub mod builder;
pub mod dialect;
pub mod diff;
pub mod emitter;
pub mod error;
pub mod naming;
pub mod operation;
pub mod planner;
pub mod registry;
pub mod schema;

pub use dialect::{Capabilities, Dialect, MySqlDialect, PostgresDialect, SqliteDialect};
pub use diff::{DiffOptions, Differ};
pub use emitter::{emit, emit_all, SqlInMemory, SqlPair};
pub use error::{Result, SchemaError};
pub use operation::ChangeOperation;
pub use planner::Planner;
pub use registry::EntityRegistry;
pub use schema::{Column, Schema, Table, TableName};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::{
        bigint, blob, boolean, date, decimal, double, enumeration, geometry, integer, json,
        jsonb, real, smallint, text, time, timestamp, timestamptz, uuid, varchar, vector,
        ColumnBuilder, ForeignKeyBuilder, IndexBuilder, TableBuilder,
    };
    pub use crate::dialect::{
        Capabilities, ColumnAlteration, CommentStyle, Dialect, MySqlDialect, PostgresDialect,
        SqliteDialect,
    };
    pub use crate::diff::{DiffOptions, Differ};
    pub use crate::emitter::{emit, emit_all, SqlInMemory, SqlPair};
    pub use crate::error::{Result, SchemaError};
    pub use crate::operation::{AddedValue, ChangeOperation, EnumChange, EnumColumn, ValuePosition};
    pub use crate::planner::Planner;
    pub use crate::registry::EntityRegistry;
    pub use crate::schema::{
        CheckConstraint, Column, ColumnRef, ColumnType, DefaultValue, EnumType, ForeignKey,
        ForeignKeyAction, Generation, Index, IndexOrder, NullsOrder, Schema, Table, TableName,
        UniqueConstraint,
    };
}
