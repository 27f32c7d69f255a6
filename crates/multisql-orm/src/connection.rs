//! Connection lifecycle: one live connection per repository, opened with a
//! bounded fixed-delay retry.

use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use multisql_core::{Dialect, SqlContext, Statement};
use regex::Regex;
use serde::Serialize;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::ConnectOptions;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::driver::{DbConnection, Session};
use crate::error::{OrmError, Result};

/// Busy timeout applied to SQLite connections without an explicit one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Idle time after which a reused connection is pinged again.
pub const IDLE_CHECK: Duration = Duration::from_secs(30);

/// Whether a reused connection must be pinged before the next statement:
/// after a failure or once it sat idle for [`IDLE_CHECK`].
#[must_use]
pub fn needs_ping(suspect: bool, idle: Option<Duration>) -> bool {
    suspect || idle.map_or(true, |idle| idle >= IDLE_CHECK)
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\d+)\.(\d+)").ok())
        .as_ref()
}

/// Major and minor numbers of a server version string such as
/// `8.0.36` or `10.11.6-MariaDB`.
#[must_use]
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let captures = version_pattern()?.captures(version)?;
    let major = captures.get(1)?.as_str().parse().ok()?;
    let minor = captures.get(2)?.as_str().parse().ok()?;
    Some((major, minor))
}

/// Whether a server of `dialect` running `version` fills timestamp
/// defaults itself.
#[must_use]
pub fn supports_current_timestamp(dialect: Dialect, version: &str) -> bool {
    match dialect {
        Dialect::Sqlite => false,
        Dialect::MySql => parse_version(version).is_some_and(|v| v >= (5, 7)),
        Dialect::Generic => true,
    }
}

/// Removes every `busy_timeout=<ms>` query pair from a SQLite URL.
///
/// Returns the cleaned URL and the last timeout found, if any.
#[must_use]
pub fn split_busy_timeout(url: &str) -> (String, Option<Duration>) {
    let Some((base, query)) = url.split_once('?') else {
        return (url.to_string(), None);
    };

    let mut timeout = None;
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.trim().eq_ignore_ascii_case("busy_timeout") {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    timeout = Some(Duration::from_millis(ms));
                }
                false
            } else {
                !pair.is_empty()
            }
        })
        .collect();

    if kept.is_empty() {
        (base.to_string(), timeout)
    } else {
        (format!("{base}?{}", kept.join("&")), timeout)
    }
}

/// SQLite lock diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    /// Current journal mode, e.g. `wal`.
    pub journal_mode: String,
    /// First column of `PRAGMA wal_checkpoint`: 1 when the checkpoint was blocked.
    pub checkpoint_busy: i64,
    /// Frames in the WAL file.
    pub wal_frames: i64,
    /// Frames moved back into the database.
    pub checkpointed_frames: i64,
    /// Whether a write lock could be taken right now.
    pub can_write: bool,
}

/// Owns the single connection of a repository.
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    connection: Option<DbConnection>,
    server_version: Option<String>,
    last_used: Option<Instant>,
    suspect: bool,
}

impl ConnectionManager {
    /// Creates a manager; nothing is opened until [`Self::acquire`].
    #[must_use]
    pub const fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connection: None,
            server_version: None,
            last_used: None,
            suspect: false,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Backend.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// Flags the connection for a ping on the next [`Self::acquire`].
    pub fn mark_suspect(&mut self) {
        self.suspect = true;
    }

    /// Whether the next [`Self::acquire`] pings before reusing the connection.
    #[must_use]
    pub fn is_suspect(&self) -> bool {
        self.connection.is_some() && needs_ping(self.suspect, self.last_used.map(|t| t.elapsed()))
    }

    /// Returns the open connection, reopening it when missing. A reused
    /// connection is pinged only after a failure or a long idle period.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::ConnectionFailure`] once every attempt failed and
    /// a configuration error for a dialect without a driver.
    pub async fn acquire(&mut self) -> Result<&mut DbConnection> {
        let check = self.is_suspect();
        let healthy = match self.connection.as_mut() {
            Some(conn) if check => conn.ping().await.is_ok(),
            Some(_) => true,
            None => false,
        };

        if !healthy {
            if let Some(stale) = self.connection.take() {
                debug!(dialect = %self.config.dialect, "dropping stale connection");
                if let Err(e) = stale.close().await {
                    debug!(error = %e, "closing stale connection failed");
                }
            }
            let mut conn = self.open_with_retry().await?;
            if self.server_version.is_none() {
                self.server_version = Some(query_version(&mut conn).await);
            }
            self.connection = Some(conn);
        }
        self.suspect = false;
        self.last_used = Some(Instant::now());

        self.connection
            .as_mut()
            .ok_or_else(|| OrmError::Configuration(String::from("connection was not opened")))
    }

    async fn open_with_retry(&self) -> Result<DbConnection> {
        let attempts = self.config.reconnect_attempts();
        let delay = self.config.reconnect_delay();
        let mut attempt = 1;

        loop {
            match self.open().await {
                Ok(conn) => {
                    debug!(dialect = %self.config.dialect, attempt, "connection opened");
                    return Ok(conn);
                }
                Err(OrmError::Database(source)) => {
                    if attempt >= attempts {
                        return Err(OrmError::ConnectionFailure { attempts, source });
                    }
                    warn!(
                        dialect = %self.config.dialect,
                        attempt,
                        error = %source,
                        "connection failed, retrying in {}s",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn open(&self) -> Result<DbConnection> {
        match self.config.dialect {
            Dialect::Sqlite => {
                let (url, timeout) = split_busy_timeout(&self.config.url);
                let options = SqliteConnectOptions::from_str(&url)?
                    .create_if_missing(true)
                    .busy_timeout(timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT));
                let mut conn = DbConnection::Sqlite(options.connect().await?);
                enable_wal(&mut conn).await;
                Ok(conn)
            }
            Dialect::MySql => {
                let options = MySqlConnectOptions::from_str(&self.config.url)?;
                Ok(DbConnection::MySql(options.connect().await?))
            }
            Dialect::Generic => Err(OrmError::Configuration(String::from(
                "the generic dialect has no driver, use mysql or sqlite",
            ))),
        }
    }

    /// Server version, resolved on the first successful open.
    ///
    /// # Errors
    ///
    /// Returns an error when no connection can be opened.
    pub async fn server_version(&mut self) -> Result<String> {
        if self.server_version.is_none() {
            self.acquire().await?;
        }
        Ok(self.server_version.clone().unwrap_or_default())
    }

    /// Whether the server fills timestamp defaults itself. The
    /// configuration override wins over the version check.
    ///
    /// # Errors
    ///
    /// Returns an error when no connection can be opened.
    pub async fn allow_current_timestamp(&mut self) -> Result<bool> {
        if let Some(allow) = self.config.allow_current_timestamp {
            return Ok(allow);
        }
        let version = self.server_version().await?;
        Ok(supports_current_timestamp(self.config.dialect, &version))
    }

    /// SQL rendering context for the connected server.
    ///
    /// # Errors
    ///
    /// Returns an error when no connection can be opened.
    pub async fn context(&mut self) -> Result<SqlContext> {
        let allow = self.allow_current_timestamp().await?;
        Ok(SqlContext::new(self.config.dialect)
            .with_quoting(self.config.quoting())
            .with_current_timestamp(allow))
    }

    /// Whether a live connection answers.
    pub async fn is_connected(&mut self) -> bool {
        match self.connection.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => self.acquire().await.is_ok(),
        }
    }

    /// Closes the connection, releasing its file handles.
    pub async fn reset_connection(&mut self) {
        if let Some(conn) = self.connection.take() {
            info!(dialect = %self.config.dialect, "resetting connection");
            if let Err(e) = conn.close().await {
                warn!(error = %e, "closing connection failed");
            }
        }
    }

    /// Resets, reopens and, on SQLite, checkpoints the WAL and shrinks the
    /// page cache.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be reopened or the
    /// checkpoint fails.
    pub async fn release_locks(&mut self) -> Result<()> {
        self.reset_connection().await;
        let conn = self.acquire().await?;
        if conn.dialect() == Dialect::Sqlite {
            conn.execute_raw("PRAGMA wal_checkpoint(TRUNCATE); PRAGMA shrink_memory;")
                .await?;
            info!("wal checkpoint and cache shrink done");
        }
        Ok(())
    }

    /// Journal mode, WAL checkpoint counters and write availability of a
    /// SQLite database.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on other dialects and a database error
    /// when a pragma fails.
    pub async fn lock_status(&mut self) -> Result<LockStatus> {
        if self.config.dialect != Dialect::Sqlite {
            return Err(OrmError::Configuration(String::from(
                "lock status is only available for sqlite",
            )));
        }
        let conn = self.acquire().await?;

        let journal = conn.fetch_all(&Statement::raw("PRAGMA journal_mode")).await?;
        let journal_mode = first_value(&journal, 0)
            .map(|v| v.to_plain_text())
            .unwrap_or_default();

        let checkpoint = conn
            .fetch_all(&Statement::raw("PRAGMA wal_checkpoint(PASSIVE)"))
            .await?;
        let counter = |index| {
            first_value(&checkpoint, index)
                .and_then(multisql_core::SqlValue::as_i64)
                .unwrap_or(-1)
        };
        let (checkpoint_busy, wal_frames, checkpointed_frames) = (counter(0), counter(1), counter(2));

        let can_write = match conn.execute_raw("BEGIN IMMEDIATE").await {
            Ok(_) => {
                conn.execute_raw("ROLLBACK").await?;
                true
            }
            Err(e) => {
                debug!(error = %e, "write lock unavailable");
                false
            }
        };

        Ok(LockStatus {
            journal_mode,
            checkpoint_busy,
            wal_frames,
            checkpointed_frames,
            can_write,
        })
    }
}

fn first_value(rows: &[multisql_core::Record], index: usize) -> Option<&multisql_core::SqlValue> {
    rows.first()?.iter().nth(index).map(|(_, value)| value)
}

async fn enable_wal(conn: &mut DbConnection) {
    match conn.execute_raw("PRAGMA journal_mode=WAL;").await {
        Ok(_) => debug!("journal mode set to wal"),
        Err(e) => warn!(error = %e, "could not enable wal"),
    }
}

async fn query_version(conn: &mut DbConnection) -> String {
    let sql = match conn.dialect() {
        Dialect::Sqlite => "SELECT sqlite_version()",
        Dialect::MySql | Dialect::Generic => "SELECT VERSION()",
    };
    match conn.fetch_all(&Statement::raw(sql)).await {
        Ok(rows) => first_value(&rows, 0)
            .map(multisql_core::SqlValue::to_plain_text)
            .unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "could not read server version");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(parse_version("8.0.36"), Some((8, 0)));
        assert_eq!(parse_version("5.6.51-log"), Some((5, 6)));
        assert_eq!(parse_version("10.11.6-MariaDB"), Some((10, 11)));
        assert_eq!(parse_version("unknown"), None);
    }

    #[test]
    fn test_current_timestamp_support() {
        assert!(supports_current_timestamp(Dialect::MySql, "5.7.44"));
        assert!(supports_current_timestamp(Dialect::MySql, "8.0.36"));
        assert!(!supports_current_timestamp(Dialect::MySql, "5.6.51"));
        assert!(!supports_current_timestamp(Dialect::MySql, ""));
        assert!(!supports_current_timestamp(Dialect::Sqlite, "3.45.1"));
        assert!(supports_current_timestamp(Dialect::Generic, ""));
    }

    #[test]
    fn test_busy_timeout_is_stripped() {
        assert_eq!(
            split_busy_timeout("sqlite://loja.db?Busy_Timeout=5000&mode=rwc"),
            (
                String::from("sqlite://loja.db?mode=rwc"),
                Some(Duration::from_millis(5000))
            )
        );
        assert_eq!(
            split_busy_timeout("sqlite://loja.db?busy_timeout=100"),
            (String::from("sqlite://loja.db"), Some(Duration::from_millis(100)))
        );
        assert_eq!(
            split_busy_timeout("sqlite::memory:"),
            (String::from("sqlite::memory:"), None)
        );
    }

    #[tokio::test]
    async fn test_acquire_reuses_connection_and_caches_version() {
        let mut manager = ConnectionManager::new(ConnectionConfig::sqlite("sqlite::memory:"));
        manager
            .acquire()
            .await
            .unwrap()
            .execute_raw("CREATE TABLE t (Id INTEGER)")
            .await
            .unwrap();

        let rows = manager
            .acquire()
            .await
            .unwrap()
            .fetch_all(&Statement::raw("SELECT * FROM t"))
            .await
            .unwrap();
        assert!(rows.is_empty());

        let version = manager.server_version().await.unwrap();
        assert!(parse_version(&version).is_some());
        assert!(!manager.allow_current_timestamp().await.unwrap());
    }

    #[tokio::test]
    async fn test_config_override_wins() {
        let mut config = ConnectionConfig::sqlite("sqlite::memory:");
        config.allow_current_timestamp = Some(true);
        let mut manager = ConnectionManager::new(config);
        assert!(manager.allow_current_timestamp().await.unwrap());
        assert!(manager.context().await.unwrap().allow_current_timestamp);
    }

    #[tokio::test]
    async fn test_connection_failure_after_attempts() {
        let config = ConnectionConfig::sqlite("sqlite:///nonexistent-dir/sub/loja.db?mode=ro")
            .with_reconnect(2, 1);
        let mut manager = ConnectionManager::new(config);
        match manager.acquire().await {
            Err(OrmError::ConnectionFailure { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected connection failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generic_dialect_is_a_configuration_error() {
        let mut manager =
            ConnectionManager::new(ConnectionConfig::new(Dialect::Generic, "generic://"));
        assert!(manager.acquire().await.unwrap_err().is_configuration());
    }

    #[test]
    fn test_ping_only_after_failure_or_idle() {
        assert!(!needs_ping(false, Some(Duration::from_millis(5))));
        assert!(needs_ping(true, Some(Duration::from_millis(5))));
        assert!(needs_ping(false, Some(IDLE_CHECK)));
        assert!(needs_ping(false, None));
    }

    #[tokio::test]
    async fn test_failure_flags_connection_for_a_ping() {
        let mut manager = ConnectionManager::new(ConnectionConfig::sqlite("sqlite::memory:"));
        assert!(!manager.is_suspect());

        manager.acquire().await.unwrap();
        assert!(!manager.is_suspect());

        manager.mark_suspect();
        assert!(manager.is_suspect());

        manager
            .acquire()
            .await
            .unwrap()
            .execute_raw("CREATE TABLE t (Id INTEGER)")
            .await
            .unwrap();
        assert!(!manager.is_suspect());
        let rows = manager
            .acquire()
            .await
            .unwrap()
            .fetch_all(&Statement::raw("SELECT * FROM t"))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_lock_status_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("locks.db").display());
        let mut manager = ConnectionManager::new(ConnectionConfig::sqlite(url));

        let status = manager.lock_status().await.unwrap();
        assert_eq!(status.journal_mode, "wal");
        assert!(status.can_write);

        manager.release_locks().await.unwrap();
        assert!(manager.is_connected().await);
    }
}
