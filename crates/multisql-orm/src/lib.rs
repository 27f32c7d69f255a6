//! # multisql-orm
//!
//! Executes the statements rendered by `multisql-core` against MySQL or
//! SQLite through sqlx.
//!
//! This crate provides:
//! - [`ConnectionConfig`], loadable from JSON
//! - [`ConnectionManager`]: one connection per repository, fixed-delay
//!   reconnect, server version check, SQLite WAL and busy timeout
//! - [`RetryPolicy`]: backoff retry of busy/locked statements
//! - [`Repository`]: reads, single row writes, select-then-write saves and
//!   chunked transactional bulk writes
//! - [`EventSink`]: where failures and progress are reported
//!
//! ## Quick Start
//!
//! ```ignore
//! use multisql_derive::Entity;
//! use multisql_orm::{ConnectionConfig, Repository};
//!
//! #[derive(Debug, Default, Clone, Entity)]
//! #[table(name = "Cliente")]
//! struct Cliente {
//!     #[column(name = "Id", auto_increment)]
//!     id: i64,
//!     #[column(name = "Nome", search)]
//!     nome: String,
//! }
//!
//! async fn example() -> multisql_orm::Result<()> {
//!     let mut repo = Repository::<Cliente>::new(ConnectionConfig::sqlite("sqlite://loja.db"));
//!
//!     let mut cliente = Cliente { nome: String::from("Ana"), ..Default::default() };
//!     repo.insert(&mut cliente).await?;
//!     assert!(cliente.id > 0);
//!
//!     let found = repo.search("an").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure reporting
//!
//! Configuration errors (no key to update by, no identity, no upsert
//! syntax) are returned as `Err`. Other failures are reported to the
//! [`EventSink`] with the SQL text and parameters, kept as
//! [`Repository::last_error`], and the operation returns an empty result.

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod repository;
pub mod retry;

pub use config::ConnectionConfig;
pub use connection::{ConnectionManager, LockStatus};
pub use driver::{DbConnection, DbTransaction, ExecOutcome, Session};
pub use error::{OrmError, Result};
pub use events::{Event, EventSink, MemorySink, TracingSink};
pub use repository::Repository;
pub use retry::{BusyOrLocked, RetryPolicy};
