//! Reads the live schema from the database catalog.

use multisql_core::{Record, SqlContext, SqlValue};
use multisql_orm::Session;
use serde::Serialize;

use crate::dialect::DdlDialect;
use crate::error::Result;

/// An index as found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveIndex {
    /// Index name.
    pub name: String,
    /// Columns in index order.
    pub columns: Vec<String>,
    /// Unique index.
    pub unique: bool,
}

/// Catalog strings come back as text on SQLite and, depending on the
/// server, as binary on MySQL.
fn text(value: Option<&SqlValue>) -> Option<String> {
    match value? {
        SqlValue::Null => None,
        SqlValue::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        other => Some(other.to_plain_text()),
    }
}

fn column_at(record: &Record, index: usize) -> Option<&SqlValue> {
    record.iter().nth(index).map(|(_, value)| value)
}

/// Column names of `table`, empty when the table does not exist.
///
/// # Errors
///
/// Returns an error when the catalog query fails.
pub async fn live_columns<S: Session>(
    session: &mut S,
    ddl: &dyn DdlDialect,
    ctx: &SqlContext,
    table: &str,
) -> Result<Vec<String>> {
    let statement = ddl.columns_query(ctx, table)?;
    let rows = session.fetch_all(&statement).await?;
    Ok(rows.iter().filter_map(|r| text(column_at(r, 0))).collect())
}

/// Whether `table` exists.
///
/// # Errors
///
/// Returns an error when the catalog query fails.
pub async fn table_exists<S: Session>(
    session: &mut S,
    ddl: &dyn DdlDialect,
    ctx: &SqlContext,
    table: &str,
) -> Result<bool> {
    Ok(!live_columns(session, ddl, ctx, table).await?.is_empty())
}

/// Indexes of `table` with their ordered columns.
///
/// # Errors
///
/// Returns an error when the catalog query fails.
pub async fn live_indexes<S: Session>(
    session: &mut S,
    ddl: &dyn DdlDialect,
    ctx: &SqlContext,
    table: &str,
) -> Result<Vec<LiveIndex>> {
    let statement = ddl.indexes_query(ctx, table)?;
    let rows = session.fetch_all(&statement).await?;
    Ok(group_indexes(&rows))
}

/// Folds `index_name, is_unique, column_name` rows into indexes, keeping
/// the catalog order.
#[must_use]
pub fn group_indexes(rows: &[Record]) -> Vec<LiveIndex> {
    let mut indexes: Vec<LiveIndex> = Vec::new();
    for row in rows {
        let Some(name) = text(row.get("index_name")) else {
            continue;
        };
        let unique = row
            .get("is_unique")
            .and_then(SqlValue::as_i64)
            .is_some_and(|n| n != 0);
        let column = text(row.get("column_name"));

        match indexes.iter_mut().find(|i| i.name == name) {
            Some(index) => index.columns.extend(column),
            None => indexes.push(LiveIndex {
                name,
                columns: column.into_iter().collect(),
                unique,
            }),
        }
    }
    indexes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: &str, unique: i64, column: &str) -> Record {
        let mut record = Record::new();
        record.push("index_name", SqlValue::Text(index.to_string()));
        record.push("is_unique", SqlValue::Int(unique));
        record.push("column_name", SqlValue::Blob(column.as_bytes().to_vec()));
        record
    }

    #[test]
    fn test_group_indexes() {
        let rows = vec![
            row("IX_Cliente_Nome", 0, "Nome"),
            row("IX_Cliente_Nome", 0, "Uf"),
            row("sqlite_autoindex_Cliente_1", 1, "Codigo"),
        ];
        let indexes = group_indexes(&rows);
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].columns, vec!["Nome", "Uf"]);
        assert!(!indexes[0].unique);
        assert!(indexes[1].unique);
        assert_eq!(indexes[1].columns, vec!["Codigo"]);
    }
}
