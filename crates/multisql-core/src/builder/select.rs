//! SELECT statements, date ranges and id set lookups.

use chrono::{Local, NaiveDateTime, TimeZone};

use super::{Statement, StatementBuilder};
use crate::binder::{BoundParam, ParamType};
use crate::dialect::Dialect;
use crate::error::{CoreError, Result};
use crate::key::select_key;
use crate::predicate::{Combine, Criterion};
use crate::schema::{ColumnDescriptor, ColumnType, Operator};
use crate::value::SqlValue;

/// Largest id set looked up with an `IN (...)` list. Bigger sets go through
/// the staging table.
pub const IN_LIST_LIMIT: usize = 100;

/// Staging table used for large id set lookups.
pub const STAGING_TABLE: &str = "Temp_In_Use";

fn to_utc(local: NaiveDateTime) -> NaiveDateTime {
    Local
        .from_local_datetime(&local)
        .earliest()
        .map_or(local, |dt| dt.naive_utc())
}

fn id_param(name: String, id: i64) -> BoundParam {
    BoundParam {
        name,
        kind: ParamType::Integer,
        value: SqlValue::Int(id),
    }
}

impl StatementBuilder {
    /// `SELECT * FROM t`, ordered by the identity column when there is one.
    #[must_use]
    pub fn select_all(&self, identity: Option<&str>) -> Statement {
        let mut sql = format!("SELECT * FROM {}", self.quoted_table());
        if let Some(identity) = identity {
            sql.push_str(&format!(" ORDER BY {}", self.ctx.quote(identity)));
        }
        Statement::raw(sql)
    }

    /// Selects the row identified by the key selection of `columns`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no column can identify the row.
    pub fn select_by_key(&self, columns: &[ColumnDescriptor]) -> Result<Statement> {
        let selection = select_key(columns);
        if selection.is_empty() {
            return Err(CoreError::configuration(
                "cannot select without a reference for WHERE",
            ));
        }
        self.select_where(&selection.columns, Combine::And)
    }

    /// `SELECT * FROM t` filtered by arbitrary descriptors.
    ///
    /// # Errors
    ///
    /// Propagates binding errors.
    pub fn select_where(&self, criteria: &[ColumnDescriptor], combine: Combine) -> Result<Statement> {
        let predicate = self.predicate().render(criteria, combine)?;
        Ok(Statement {
            sql: format!("SELECT * FROM {}{}", self.quoted_table(), predicate.sql),
            params: predicate.params,
        })
    }

    /// Rows whose identity lies in `min..=max`, ordered by identity.
    ///
    /// # Errors
    ///
    /// Propagates binding errors.
    pub fn select_identity_range(&self, identity: &str, min: i64, max: i64) -> Result<Statement> {
        let criteria: Vec<ColumnDescriptor> = vec![
            Criterion::new(identity, min)
                .with_operator(Operator::GreaterOrEqual)
                .with_param("min")
                .into(),
            Criterion::new(identity, max)
                .with_operator(Operator::LessOrEqual)
                .with_param("max")
                .into(),
        ];
        let mut statement = self.select_where(&criteria, Combine::And)?;
        statement
            .sql
            .push_str(&format!(" ORDER BY {}", self.ctx.quote(identity)));
        Ok(statement)
    }

    /// The two criteria of a date range on `column`: `>= start` and `< end`.
    ///
    /// When `utc` is set the bounds, given in local time, are converted to
    /// UTC to match dates stamped by the engine.
    #[must_use]
    pub fn date_range_criteria(
        column: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        utc: bool,
    ) -> Vec<Criterion> {
        let (start, end) = if utc {
            (to_utc(start), to_utc(end))
        } else {
            (start, end)
        };
        vec![
            Criterion::new(column, start)
                .with_operator(Operator::GreaterOrEqual)
                .with_param("start")
                .with_type(ColumnType::Date),
            Criterion::new(column, end)
                .with_operator(Operator::Less)
                .with_param("end")
                .with_type(ColumnType::Date),
        ]
    }

    /// `SELECT T.* FROM t AS T WHERE T.field IN (?, ...)`.
    #[must_use]
    pub fn ids_in_list(&self, field: &str, ids: &[i64]) -> Statement {
        let placeholders = vec!["?"; ids.len()].join(", ");
        Statement {
            sql: format!(
                "SELECT T.* FROM {} AS T WHERE T.{} IN ({placeholders})",
                self.quoted_table(),
                self.ctx.quote(field)
            ),
            params: ids
                .iter()
                .enumerate()
                .map(|(i, id)| id_param(format!("id_{i}"), *id))
                .collect(),
        }
    }

    /// Join against the staging table filled by [`Self::staging_inserts`].
    #[must_use]
    pub fn ids_join_staging(&self, field: &str) -> Statement {
        Statement::raw(format!(
            "SELECT T.* FROM {} AS T INNER JOIN {STAGING_TABLE} U ON T.{} = U.ID",
            self.quoted_table(),
            self.ctx.quote(field)
        ))
    }

    /// Creates the staging table when it does not exist. The table is
    /// temporary, so each connection sees only its own ids.
    #[must_use]
    pub fn staging_create() -> Statement {
        Statement::raw(format!("CREATE TEMPORARY TABLE IF NOT EXISTS {STAGING_TABLE} (ID BIGINT)"))
    }

    /// Empties the staging table.
    #[must_use]
    pub fn staging_clear(dialect: Dialect) -> Statement {
        match dialect {
            Dialect::MySql => Statement::raw(format!("TRUNCATE TABLE {STAGING_TABLE}")),
            Dialect::Sqlite | Dialect::Generic => Statement::raw(format!("DELETE FROM {STAGING_TABLE}")),
        }
    }

    /// Multi-row inserts into the staging table, `chunk` ids per statement.
    #[must_use]
    pub fn staging_inserts(ids: &[i64], chunk: usize) -> Vec<Statement> {
        ids.chunks(chunk.max(1))
            .map(|part| Statement {
                sql: format!(
                    "INSERT INTO {STAGING_TABLE} (ID) VALUES {}",
                    vec!["(?)"; part.len()].join(", ")
                ),
                params: part
                    .iter()
                    .enumerate()
                    .map(|(i, id)| id_param(format!("ID_{i}"), *id))
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::pedido;
    use super::*;
    use crate::dialect::SqlContext;

    fn builder(dialect: Dialect) -> StatementBuilder {
        StatementBuilder::new(SqlContext::new(dialect), "Pedido")
    }

    #[test]
    fn test_select_all_orders_by_identity() {
        assert_eq!(builder(Dialect::Sqlite).select_all(None).sql, r#"SELECT * FROM "Pedido""#);
        assert_eq!(
            builder(Dialect::Sqlite).select_all(Some("Id")).sql,
            r#"SELECT * FROM "Pedido" ORDER BY "Id""#
        );
    }

    #[test]
    fn test_select_by_identity_then_key() {
        let by_id = builder(Dialect::MySql).select_by_key(&pedido(12)).unwrap();
        assert_eq!(by_id.sql, "SELECT * FROM `Pedido` WHERE `Id` = ?");
        assert_eq!(by_id.dump(), "Id=12|");

        let by_key = builder(Dialect::MySql).select_by_key(&pedido(0)).unwrap();
        assert_eq!(by_key.sql, "SELECT * FROM `Pedido` WHERE `Loja` = ? AND `Numero` = ?");
    }

    #[test]
    fn test_date_range() {
        let start = NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let end = NaiveDateTime::parse_from_str("2024-02-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let criteria: Vec<ColumnDescriptor> = StatementBuilder::date_range_criteria("Inclusao", start, end, false)
            .into_iter()
            .map(Into::into)
            .collect();
        let statement = builder(Dialect::Sqlite).select_where(&criteria, Combine::And).unwrap();
        assert_eq!(
            statement.sql,
            r#"SELECT * FROM "Pedido" WHERE "Inclusao" >= ? AND "Inclusao" < ?"#
        );
        assert_eq!(statement.params[0].value, SqlValue::DateTime(start));
        assert_eq!(statement.params[1].name, "end");
    }

    #[test]
    fn test_identity_range() {
        let statement = builder(Dialect::MySql).select_identity_range("Id", 5, 9).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT * FROM `Pedido` WHERE `Id` >= ? AND `Id` <= ? ORDER BY `Id`"
        );
        assert_eq!(statement.dump(), "min=5|max=9|");
    }

    #[test]
    fn test_ids_in_list() {
        let statement = builder(Dialect::MySql).ids_in_list("Id", &[1, 2, 3]);
        assert_eq!(
            statement.sql,
            "SELECT T.* FROM `Pedido` AS T WHERE T.`Id` IN (?, ?, ?)"
        );
        assert_eq!(statement.params.len(), 3);
    }

    #[test]
    fn test_staging_statements() {
        assert_eq!(
            StatementBuilder::staging_create().sql,
            "CREATE TEMPORARY TABLE IF NOT EXISTS Temp_In_Use (ID BIGINT)"
        );
        assert_eq!(StatementBuilder::staging_clear(Dialect::MySql).sql, "TRUNCATE TABLE Temp_In_Use");
        assert_eq!(StatementBuilder::staging_clear(Dialect::Sqlite).sql, "DELETE FROM Temp_In_Use");

        let ids: Vec<i64> = (1..=250).collect();
        let inserts = StatementBuilder::staging_inserts(&ids, 100);
        assert_eq!(inserts.len(), 3);
        assert_eq!(inserts[2].params.len(), 50);
        assert!(inserts[0].sql.starts_with("INSERT INTO Temp_In_Use (ID) VALUES (?), (?)"));

        assert_eq!(
            builder(Dialect::Sqlite).ids_join_staging("Id").sql,
            r#"SELECT T.* FROM "Pedido" AS T INNER JOIN Temp_In_Use U ON T."Id" = U.ID"#
        );
    }
}
