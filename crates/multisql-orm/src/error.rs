//! Error types for the repository engine.

use multisql_core::CoreError;
use thiserror::Error;

/// Repository errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// No connection could be opened within the configured attempts.
    #[error("could not connect after {attempts} attempt(s): {source}")]
    ConnectionFailure {
        /// Attempts made.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The database stayed busy or locked after every retry.
    #[error("database busy or locked after {attempts} attempt(s): {source}")]
    BusyOrLocked {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: Box<OrmError>,
    },

    /// More than one row matched a key that should be unique.
    #[error("{count} rows match the key, expected at most one [{params}]")]
    AmbiguousKeyMatch {
        /// Matching rows.
        count: usize,
        /// Parameter dump of the key.
        params: String,
    },

    /// A row of a batch failed.
    #[error("row {row} failed: {source} [{sql}] [{params}]")]
    ConstraintViolation {
        /// Index of the row in the caller's list.
        row: usize,
        /// Statement text.
        sql: String,
        /// Parameter dump.
        params: String,
        /// Underlying failure.
        #[source]
        source: Box<OrmError>,
    },

    /// A statement failed.
    #[error("{source} [{sql}] [{params}]")]
    Statement {
        /// Statement text.
        sql: String,
        /// Parameter dump.
        params: String,
        /// Underlying failure.
        #[source]
        source: Box<OrmError>,
    },

    /// Programmer error: missing table, key or identity.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Statement building or value conversion error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl OrmError {
    /// Whether the error is a programmer error that is raised to the caller
    /// instead of being reported.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::Core(CoreError::Configuration(_)) => true,
            Self::Statement { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// Annotates an error with the statement that produced it.
    pub fn in_statement(self, sql: impl Into<String>, params: impl Into<String>) -> Self {
        if self.is_configuration() {
            return self;
        }
        Self::Statement {
            sql: sql.into(),
            params: params.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, OrmError>;
