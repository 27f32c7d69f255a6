//! # multisql-core
//!
//! Driver-free building blocks of a dialect-agnostic ORM for MySQL and
//! SQLite.
//!
//! This crate provides:
//! - Column descriptors derived once per type by `#[derive(Entity)]`
//! - Row identification (identity, primary key, or every column)
//! - Parameter binding with per-dialect GUID and date handling
//! - Parameterized SELECT/INSERT/UPDATE/UPSERT/DELETE rendering
//!
//! Nothing here talks to a database; `multisql-orm` executes the
//! statements.
//!
//! ## Building statements
//!
//! ```rust
//! use multisql_core::builder::StatementBuilder;
//! use multisql_core::dialect::{Dialect, SqlContext};
//! use multisql_core::predicate::{Combine, Criterion};
//! use multisql_core::schema::{ColumnDescriptor, Operator};
//!
//! let builder = StatementBuilder::new(SqlContext::new(Dialect::Sqlite), "Cliente");
//! let criteria: Vec<ColumnDescriptor> = vec![
//!     Criterion::new("Nome", "ana").with_operator(Operator::Contains).into(),
//! ];
//! let statement = builder.select_where(&criteria, Combine::And).unwrap();
//!
//! assert_eq!(
//!     statement.sql,
//!     r#"SELECT * FROM "Cliente" WHERE "Nome" LIKE ? COLLATE NOCASE"#
//! );
//! assert_eq!(statement.dump(), "Nome=%ana%|");
//! ```

pub mod audit;
pub mod binder;
pub mod builder;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod key;
pub mod predicate;
pub mod record;
pub mod schema;
pub mod value;

pub use audit::AuditContext;
pub use binder::{BoundParam, ParamType, ParameterBinder, Statement};
pub use builder::StatementBuilder;
pub use dialect::{Dialect, Quoting, SqlContext};
pub use entity::{describe, introspect, merge_generated, rehydrate, write_back, Capabilities, Entity, SqlEnum};
pub use error::{CoreError, Result};
pub use key::{select_key, KeySelection, KeyStrategy};
pub use predicate::{Combine, Criterion, WhereBuilder};
pub use record::Record;
pub use schema::{
    ColumnDef, ColumnDescriptor, ColumnFlags, ColumnRole, ColumnType, FieldShape, IndexDescriptor,
    Operator,
};
pub use value::{FromSqlValue, SqlValue, ToSqlValue};
