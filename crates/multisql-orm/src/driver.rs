//! sqlx adapter: one live connection per backend, statement execution with
//! positional binding, and dynamic row decoding into [`Record`]s.

use multisql_core::{Dialect, Record, SqlValue, Statement};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Executor, Row, Transaction, TypeInfo, ValueRef};
use tracing::debug;

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Rows changed.
    pub rows_affected: u64,
    /// Identity generated by the last insert, when the backend reports one.
    pub last_insert_id: Option<i64>,
}

/// A live connection.
#[derive(Debug)]
pub enum DbConnection {
    /// SQLite connection.
    Sqlite(SqliteConnection),
    /// MySQL connection.
    MySql(MySqlConnection),
}

/// An open transaction on a [`DbConnection`].
#[derive(Debug)]
pub enum DbTransaction<'c> {
    /// SQLite transaction.
    Sqlite(Transaction<'c, Sqlite>),
    /// MySQL transaction.
    MySql(Transaction<'c, MySql>),
}

/// Anything statements can run on: a connection or a transaction.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// Backend of the session.
    fn dialect(&self) -> Dialect;

    /// Runs a statement that returns no rows.
    async fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, sqlx::Error>;

    /// Runs a query and decodes every row.
    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Record>, sqlx::Error>;

    /// Runs unprepared SQL, possibly several statements.
    async fn execute_raw(&mut self, sql: &str) -> Result<ExecOutcome, sqlx::Error>;
}

fn bind_sqlite<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Blob(b) => query.bind(b.clone()),
        SqlValue::DateTime(dt) => query.bind(*dt),
        SqlValue::Time(t) => query.bind(*t),
        SqlValue::Guid(g) => query.bind(g.as_bytes().to_vec()),
    }
}

fn bind_mysql<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Blob(b) => query.bind(b.clone()),
        SqlValue::DateTime(dt) => query.bind(*dt),
        SqlValue::Time(t) => query.bind(*t),
        SqlValue::Guid(g) => query.bind(g.hyphenated().to_string()),
    }
}

fn sqlite_query(statement: &Statement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), |query, param| {
            bind_sqlite(query, &param.value)
        })
}

fn mysql_query(statement: &Statement) -> Query<'_, MySql, MySqlArguments> {
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), |query, param| {
            bind_mysql(query, &param.value)
        })
}

/// Decodes a SQLite row using the storage class of each value.
fn decode_sqlite_row(row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" | "BOOL" => {
                    SqlValue::Int(row.try_get_unchecked::<i64, _>(index)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
                    SqlValue::Float(row.try_get_unchecked::<f64, _>(index)?)
                }
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        record.push(column.name(), value);
    }
    Ok(record)
}

/// Decodes a MySQL row using the declared type of each column.
fn decode_mysql_row(row: &MySqlRow) -> Result<Record, sqlx::Error> {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        if row.try_get_raw(index)?.is_null() {
            record.push(column.name(), SqlValue::Null);
            continue;
        }
        let type_name = column.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "BOOLEAN" => SqlValue::Bool(row.try_get_unchecked::<bool, _>(index)?),
            name if name.ends_with("UNSIGNED") => {
                let n = row.try_get_unchecked::<u64, _>(index)?;
                i64::try_from(n).map_or_else(|_| SqlValue::Text(n.to_string()), SqlValue::Int)
            }
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                SqlValue::Int(row.try_get_unchecked::<i64, _>(index)?)
            }
            "FLOAT" => SqlValue::Float(f64::from(row.try_get_unchecked::<f32, _>(index)?)),
            "DOUBLE" => SqlValue::Float(row.try_get_unchecked::<f64, _>(index)?),
            "DECIMAL" => {
                let text = row.try_get_unchecked::<String, _>(index)?;
                text.trim()
                    .parse::<f64>()
                    .map_or(SqlValue::Text(text), SqlValue::Float)
            }
            "DATETIME" | "TIMESTAMP" => {
                SqlValue::DateTime(row.try_get::<chrono::NaiveDateTime, _>(index)?)
            }
            "DATE" => SqlValue::DateTime(
                row.try_get::<chrono::NaiveDate, _>(index)?
                    .and_time(chrono::NaiveTime::MIN),
            ),
            "TIME" => SqlValue::Time(row.try_get::<chrono::NaiveTime, _>(index)?),
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT" => {
                SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?)
            }
            _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
        };
        record.push(column.name(), value);
    }
    Ok(record)
}

async fn sqlite_execute<'c, E>(executor: E, statement: &Statement) -> Result<ExecOutcome, sqlx::Error>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlite_query(statement).execute(executor).await?;
    Ok(ExecOutcome {
        rows_affected: result.rows_affected(),
        last_insert_id: Some(result.last_insert_rowid()),
    })
}

async fn mysql_execute<'c, E>(executor: E, statement: &Statement) -> Result<ExecOutcome, sqlx::Error>
where
    E: Executor<'c, Database = MySql>,
{
    let result = mysql_query(statement).execute(executor).await?;
    Ok(ExecOutcome {
        rows_affected: result.rows_affected(),
        last_insert_id: i64::try_from(result.last_insert_id()).ok(),
    })
}

async fn sqlite_fetch<'c, E>(executor: E, statement: &Statement) -> Result<Vec<Record>, sqlx::Error>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = sqlite_query(statement).fetch_all(executor).await?;
    rows.iter().map(decode_sqlite_row).collect()
}

async fn mysql_fetch<'c, E>(executor: E, statement: &Statement) -> Result<Vec<Record>, sqlx::Error>
where
    E: Executor<'c, Database = MySql>,
{
    let rows = mysql_query(statement).fetch_all(executor).await?;
    rows.iter().map(decode_mysql_row).collect()
}

impl DbConnection {
    /// Checks that the connection still answers.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the server does not respond.
    pub async fn ping(&mut self) -> Result<(), sqlx::Error> {
        match self {
            Self::Sqlite(conn) => conn.ping().await,
            Self::MySql(conn) => conn.ping().await,
        }
    }

    /// Closes the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns the driver error raised while closing.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            Self::Sqlite(conn) => conn.close().await,
            Self::MySql(conn) => conn.close().await,
        }
    }

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns the driver error raised by `BEGIN`.
    pub async fn begin(&mut self) -> Result<DbTransaction<'_>, sqlx::Error> {
        Ok(match self {
            Self::Sqlite(conn) => DbTransaction::Sqlite(conn.begin().await?),
            Self::MySql(conn) => DbTransaction::MySql(conn.begin().await?),
        })
    }
}

impl Session for DbConnection {
    fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite(_) => Dialect::Sqlite,
            Self::MySql(_) => Dialect::MySql,
        }
    }

    async fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, sqlx::Error> {
        debug!(sql = %statement.sql, params = %statement.dump(), "execute");
        match self {
            Self::Sqlite(conn) => sqlite_execute(&mut *conn, statement).await,
            Self::MySql(conn) => mysql_execute(&mut *conn, statement).await,
        }
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Record>, sqlx::Error> {
        debug!(sql = %statement.sql, params = %statement.dump(), "fetch");
        match self {
            Self::Sqlite(conn) => sqlite_fetch(&mut *conn, statement).await,
            Self::MySql(conn) => mysql_fetch(&mut *conn, statement).await,
        }
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<ExecOutcome, sqlx::Error> {
        debug!(sql, "execute raw");
        match self {
            Self::Sqlite(conn) => {
                let result = sqlx::raw_sql(sql).execute(&mut *conn).await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: None,
                })
            }
            Self::MySql(conn) => {
                let result = sqlx::raw_sql(sql).execute(&mut *conn).await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: None,
                })
            }
        }
    }
}

impl DbTransaction<'_> {
    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns the driver error raised by `COMMIT`.
    pub async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            Self::Sqlite(tx) => tx.commit().await,
            Self::MySql(tx) => tx.commit().await,
        }
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns the driver error raised by `ROLLBACK`.
    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            Self::Sqlite(tx) => tx.rollback().await,
            Self::MySql(tx) => tx.rollback().await,
        }
    }
}

impl Session for DbTransaction<'_> {
    fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite(_) => Dialect::Sqlite,
            Self::MySql(_) => Dialect::MySql,
        }
    }

    async fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, sqlx::Error> {
        debug!(sql = %statement.sql, params = %statement.dump(), "execute in transaction");
        match self {
            Self::Sqlite(tx) => sqlite_execute(&mut **tx, statement).await,
            Self::MySql(tx) => mysql_execute(&mut **tx, statement).await,
        }
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Record>, sqlx::Error> {
        debug!(sql = %statement.sql, params = %statement.dump(), "fetch in transaction");
        match self {
            Self::Sqlite(tx) => sqlite_fetch(&mut **tx, statement).await,
            Self::MySql(tx) => mysql_fetch(&mut **tx, statement).await,
        }
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<ExecOutcome, sqlx::Error> {
        debug!(sql, "execute raw in transaction");
        match self {
            Self::Sqlite(tx) => {
                let result = sqlx::raw_sql(sql).execute(&mut **tx).await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: None,
                })
            }
            Self::MySql(tx) => {
                let result = sqlx::raw_sql(sql).execute(&mut **tx).await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: None,
                })
            }
        }
    }
}
