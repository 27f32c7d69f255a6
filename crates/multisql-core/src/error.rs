//! Error types for descriptor handling and statement building.

use thiserror::Error;

/// Errors raised while building statements or converting values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The caller asked for something that can never succeed with the
    /// given entity layout (no key for a DELETE, no identity to update by).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A GUID value could not be normalized for the target dialect.
    #[error("invalid format for column '{column}': {detail}")]
    InvalidFormat {
        /// Column being bound.
        column: String,
        /// What was wrong with the value.
        detail: String,
    },

    /// A database value could not be converted into the field type.
    #[error("cannot convert column '{column}': {detail}")]
    Conversion {
        /// Column being assigned.
        column: String,
        /// Conversion failure.
        detail: String,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
