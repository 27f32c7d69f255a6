//! SQL dialect support.
//!
//! MySQL and SQLite differ in identifier quoting, upsert syntax, identity
//! retrieval and GUID storage. Everything that renders SQL takes a
//! [`SqlContext`] describing the active backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// MySQL / MariaDB.
    #[serde(alias = "mariadb")]
    MySql,
    /// SQLite 3.
    #[default]
    Sqlite,
    /// Any other backend. Renders plain SQL; upsert is unavailable.
    Generic,
}

impl Dialect {
    /// Returns the name of the dialect.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Generic => "generic",
        }
    }

    /// Default identifier quoting pair.
    #[must_use]
    pub const fn default_quoting(self) -> Quoting {
        match self {
            Self::MySql => Quoting::new('`', '`'),
            Self::Sqlite | Self::Generic => Quoting::new('"', '"'),
        }
    }

    /// Whether GUIDs are stored as 16-byte blobs instead of a native or
    /// textual representation.
    #[must_use]
    pub const fn stores_guid_as_blob(self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Collation appended to LIKE comparisons so they ignore case.
    ///
    /// MySQL's default collations are already case-insensitive.
    #[must_use]
    pub const fn like_collation(self) -> &'static str {
        match self {
            Self::Sqlite => " COLLATE NOCASE",
            Self::MySql | Self::Generic => "",
        }
    }

    /// Trailing statement that returns the identity generated by an insert.
    #[must_use]
    pub const fn last_insert_id_query(self) -> &'static str {
        match self {
            Self::MySql => "; SELECT LAST_INSERT_ID();",
            Self::Sqlite => ";SELECT last_insert_rowid();",
            Self::Generic => "",
        }
    }

    /// Statement opening an explicit transaction inside a DDL script.
    #[must_use]
    pub const fn begin_transaction(self) -> &'static str {
        match self {
            Self::MySql => "START TRANSACTION;",
            Self::Sqlite | Self::Generic => "BEGIN TRANSACTION;",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "generic" => Ok(Self::Generic),
            other => Err(CoreError::configuration(format!("unknown dialect '{other}'"))),
        }
    }
}

/// Identifier quoting pair, e.g. `` ` `` / `` ` `` or `[` / `]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quoting {
    /// Opening quote.
    pub open: char,
    /// Closing quote.
    pub close: char,
}

impl Quoting {
    /// Creates a quoting pair.
    #[must_use]
    pub const fn new(open: char, close: char) -> Self {
        Self { open, close }
    }

    /// Quotes an identifier.
    #[must_use]
    pub fn quote(&self, name: &str) -> String {
        format!("{}{name}{}", self.open, self.close)
    }
}

/// Rendering context shared by every statement builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlContext {
    /// Active backend.
    pub dialect: Dialect,
    /// Identifier quoting.
    pub quoting: Quoting,
    /// Whether the server fills auto dates itself (`DEFAULT CURRENT_TIMESTAMP`).
    pub allow_current_timestamp: bool,
}

impl SqlContext {
    /// Context with the dialect's default quoting and no server-managed dates.
    #[must_use]
    pub const fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            quoting: dialect.default_quoting(),
            allow_current_timestamp: false,
        }
    }

    /// Overrides the quoting pair.
    #[must_use]
    pub const fn with_quoting(mut self, quoting: Quoting) -> Self {
        self.quoting = quoting;
        self
    }

    /// Sets whether the server manages auto dates.
    #[must_use]
    pub const fn with_current_timestamp(mut self, allow: bool) -> Self {
        self.allow_current_timestamp = allow;
        self
    }

    /// Quotes an identifier with the context's pair.
    #[must_use]
    pub fn quote(&self, name: &str) -> String {
        self.quoting.quote(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_per_dialect() {
        assert_eq!(SqlContext::new(Dialect::MySql).quote("Cliente"), "`Cliente`");
        assert_eq!(SqlContext::new(Dialect::Sqlite).quote("Cliente"), "\"Cliente\"");
        let bracketed = SqlContext::new(Dialect::Generic).with_quoting(Quoting::new('[', ']'));
        assert_eq!(bracketed.quote("Cliente"), "[Cliente]");
    }

    #[test]
    fn test_parse_dialect() {
        assert_eq!("MySQL".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_like_collation_only_on_sqlite() {
        assert_eq!(Dialect::Sqlite.like_collation(), " COLLATE NOCASE");
        assert_eq!(Dialect::MySql.like_collation(), "");
    }
}
