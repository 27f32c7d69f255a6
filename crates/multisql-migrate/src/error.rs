//! Error types for schema reconciliation.

use multisql_core::CoreError;
use multisql_orm::OrmError;

/// Errors raised while reading or changing the live schema.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Database error during DDL or metadata queries.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Connection or statement failure from the repository layer.
    #[error(transparent)]
    Orm(#[from] OrmError),

    /// Statement building error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The entity or dialect cannot be reconciled.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A DDL script failed.
    #[error("{source} [{sql}]")]
    Ddl {
        /// Script text.
        sql: String,
        /// Underlying failure.
        #[source]
        source: Box<MigrateError>,
    },
}

impl MigrateError {
    /// Attaches the failing script.
    #[must_use]
    pub fn in_script(self, sql: impl Into<String>) -> Self {
        Self::Ddl {
            sql: sql.into(),
            source: Box::new(self),
        }
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, MigrateError>;
