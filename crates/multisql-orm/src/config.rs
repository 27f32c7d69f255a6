//! Connection configuration.

use std::time::Duration;

use multisql_core::{Dialect, Quoting};
use serde::{Deserialize, Serialize};

use crate::error::{OrmError, Result};

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Settings of one repository's connection.
///
/// Zero values for `try_reconnect` and `seconds_wait_to_try` select the
/// defaults (3 attempts, 1 second).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Backend.
    pub dialect: Dialect,
    /// sqlx connection URL, e.g. `sqlite://data.db` or `mysql://u:p@host/db`.
    pub url: String,
    /// Opening identifier quote, defaults per dialect.
    pub open_quote: Option<char>,
    /// Closing identifier quote, defaults per dialect.
    pub close_quote: Option<char>,
    /// Connection attempts before giving up.
    pub try_reconnect: u32,
    /// Fixed delay between connection attempts, in seconds.
    pub seconds_wait_to_try: u64,
    /// Log every statement at debug level.
    pub verbose: bool,
    /// Overrides the server timestamp capability check.
    pub allow_current_timestamp: Option<bool>,
    /// Acting user stamped on audit columns.
    pub user: Option<String>,
    /// Origin stamped on audit columns, defaults to the host name.
    pub origin: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            url: String::from("sqlite::memory:"),
            open_quote: None,
            close_quote: None,
            try_reconnect: 0,
            seconds_wait_to_try: 0,
            verbose: false,
            allow_current_timestamp: None,
            user: None,
            origin: None,
        }
    }
}

impl ConnectionConfig {
    /// Configuration for a URL.
    pub fn new(dialect: Dialect, url: impl Into<String>) -> Self {
        Self {
            dialect,
            url: url.into(),
            ..Self::default()
        }
    }

    /// SQLite configuration.
    pub fn sqlite(url: impl Into<String>) -> Self {
        Self::new(Dialect::Sqlite, url)
    }

    /// MySQL configuration.
    pub fn mysql(url: impl Into<String>) -> Self {
        Self::new(Dialect::MySql, url)
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| OrmError::Configuration(format!("invalid connection configuration: {e}")))
    }

    /// Sets the acting user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Sets the reconnect policy.
    #[must_use]
    pub const fn with_reconnect(mut self, attempts: u32, seconds: u64) -> Self {
        self.try_reconnect = attempts;
        self.seconds_wait_to_try = seconds;
        self
    }

    /// Identifier quoting pair.
    #[must_use]
    pub fn quoting(&self) -> Quoting {
        let fallback = self.dialect.default_quoting();
        Quoting::new(
            self.open_quote.unwrap_or(fallback.open),
            self.close_quote.unwrap_or(fallback.close),
        )
    }

    /// Connection attempts, at least one.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        if self.try_reconnect == 0 {
            DEFAULT_RECONNECT_ATTEMPTS
        } else {
            self.try_reconnect
        }
    }

    /// Delay between connection attempts.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        if self.seconds_wait_to_try == 0 {
            DEFAULT_RECONNECT_DELAY
        } else {
            Duration::from_secs(self.seconds_wait_to_try)
        }
    }

    /// Origin stamped on writes.
    #[must_use]
    pub fn origin(&self) -> String {
        self.origin.clone().unwrap_or_else(host_name)
    }
}

/// Name of the machine, from `HOSTNAME` or `COMPUTERNAME`.
#[must_use]
pub fn host_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| String::from("localhost"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values_select_defaults() {
        let config = ConnectionConfig::sqlite("sqlite::memory:");
        assert_eq!(config.reconnect_attempts(), 3);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));

        let tuned = config.with_reconnect(5, 2);
        assert_eq!(tuned.reconnect_attempts(), 5);
        assert_eq!(tuned.reconnect_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_from_json_with_partial_fields() {
        let config = ConnectionConfig::from_json(
            r#"{ "dialect": "mysql", "url": "mysql://root@localhost/loja", "open_quote": "[", "close_quote": "]", "user": "ana" }"#,
        )
        .unwrap();
        assert_eq!(config.dialect, Dialect::MySql);
        assert_eq!(config.quoting(), Quoting::new('[', ']'));
        assert_eq!(config.user.as_deref(), Some("ana"));
        assert!(!config.verbose);

        assert!(ConnectionConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_origin_defaults_to_host() {
        let config = ConnectionConfig::sqlite("sqlite::memory:");
        assert!(!config.origin().is_empty());
        assert_eq!(config.with_origin("caixa-01").origin(), "caixa-01");
    }
}
