//! SQLite DDL.
//!
//! Identities use the rowid alias (`INTEGER PRIMARY KEY`), GUIDs are
//! stored as 16 byte blobs and text compares without case.

use multisql_core::{ColumnDescriptor, ColumnType, Dialect, IndexDescriptor, SqlContext, Statement};

use super::{catalog_query, date_type, default_clause, parenthesized, DdlDialect};
use crate::error::Result;

/// SQLite DDL generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDdl;

impl DdlDialect for SqliteDdl {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn column_type(&self, column: &ColumnDescriptor, allow_current_timestamp: bool) -> String {
        match column.column_type {
            ColumnType::Bool => {
                let mut sql = String::from("INTEGER");
                if !column.nullable {
                    match &column.default {
                        Some(value) => sql.push_str(&format!(" DEFAULT {value}")),
                        None => sql.push_str(" DEFAULT (0)"),
                    }
                }
                sql
            }
            ColumnType::Date => date_type(column, allow_current_timestamp, false),
            ColumnType::Double => format!(
                "REAL{}{}",
                column.size.as_deref().map_or_else(|| String::from("(18, 10)"), parenthesized),
                default_clause(column)
            ),
            ColumnType::Money => format!("REAL (18,4){}", default_clause(column)),
            ColumnType::Enum => format!(
                "INTEGER DEFAULT {}",
                column.default.as_deref().unwrap_or("0")
            ),
            ColumnType::Guid => match &column.default {
                Some(value) => format!("BLOB DEFAULT X'{value}'"),
                None => String::from("BLOB"),
            },
            ColumnType::Time => format!("DATETIME{}", default_clause(column)),
            ColumnType::Int => format!("INTEGER{}", default_clause(column)),
            ColumnType::Blob => String::from("BLOB"),
            ColumnType::String => String::from("TEXT COLLATE NOCASE"),
        }
    }

    fn key_constraint(&self, ctx: &SqlContext, _table: &str, keys: &[&str], _has_auto: bool) -> String {
        let quoted: Vec<String> = keys.iter().map(|k| ctx.quote(k)).collect();
        format!(", UNIQUE ({})", quoted.join(", "))
    }

    fn create_index(&self, ctx: &SqlContext, table: &str, index: &IndexDescriptor) -> String {
        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX IF NOT EXISTS ");
        sql.push_str(&ctx.quote(&index.name));
        sql.push_str(" ON ");
        sql.push_str(&ctx.quote(table));
        sql.push_str(" (");

        let quoted: Vec<String> = index.columns.iter().map(|c| ctx.quote(c)).collect();
        sql.push_str(&quoted.join(", "));
        sql.push(')');

        if let Some(filter) = &index.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        sql.push(';');
        sql
    }

    fn drop_index(&self, ctx: &SqlContext, _table: &str, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {};", ctx.quote(name))
    }

    fn columns_query(&self, ctx: &SqlContext, table: &str) -> Result<Statement> {
        catalog_query(ctx, "SELECT name FROM pragma_table_info(?)", "table", table)
    }

    fn indexes_query(&self, ctx: &SqlContext, table: &str) -> Result<Statement> {
        catalog_query(
            ctx,
            "SELECT il.name AS index_name, il.\"unique\" AS is_unique, ii.name AS column_name \
             FROM pragma_index_list(?) AS il, pragma_index_info(il.name) AS ii \
             ORDER BY il.name, ii.seqno",
            "table",
            table,
        )
    }
}

#[cfg(test)]
mod tests {
    use multisql_core::ColumnFlags;

    use super::super::test_support::{column, flagged};
    use super::*;

    fn ctx() -> SqlContext {
        SqlContext::new(Dialect::Sqlite)
    }

    #[test]
    fn test_type_map() {
        let ddl = SqliteDdl;
        assert_eq!(ddl.column_type(&column("A", ColumnType::Bool, false), false), "INTEGER DEFAULT (0)");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Bool, true), false), "INTEGER");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Double, true), false), "REAL(18, 10)");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Money, true), false), "REAL (18,4)");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Enum, true), false), "INTEGER DEFAULT 0");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Guid, true), false), "BLOB");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Time, true), false), "DATETIME");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Int, false), false), "INTEGER");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Blob, true), false), "BLOB");
        assert_eq!(
            ddl.column_type(&column("A", ColumnType::String, true), false),
            "TEXT COLLATE NOCASE"
        );

        let mut sized = column("A", ColumnType::Double, true);
        sized.size = Some(String::from("12, 2"));
        sized.default = Some(String::from("0"));
        assert_eq!(ddl.column_type(&sized, false), "REAL(12, 2) DEFAULT 0");

        let mut guid = column("A", ColumnType::Guid, true);
        guid.default = Some(String::from("00"));
        assert_eq!(ddl.column_type(&guid, false), "BLOB DEFAULT X'00'");
    }

    #[test]
    fn test_date_defaults_need_server_timestamps() {
        let ddl = SqliteDdl;
        let created = flagged(
            "Inclusao",
            ColumnType::Date,
            ColumnFlags {
                auto_insert_date: true,
                ..ColumnFlags::NONE
            },
        );
        assert_eq!(ddl.column_type(&created, false), "DATETIME");
        assert_eq!(ddl.column_type(&created, true), "DATETIME DEFAULT CURRENT_TIMESTAMP");
    }

    #[test]
    fn test_create_table() {
        let ddl = SqliteDdl;
        let id = flagged(
            "Id",
            ColumnType::Int,
            ColumnFlags {
                auto_increment: true,
                ..ColumnFlags::NONE
            },
        );
        let codigo = flagged(
            "Codigo",
            ColumnType::String,
            ColumnFlags {
                key: true,
                ..ColumnFlags::NONE
            },
        );
        let nome = column("Nome", ColumnType::String, true);
        let rascunho = flagged(
            "Rascunho",
            ColumnType::String,
            ColumnFlags {
                ignored: true,
                ..ColumnFlags::NONE
            },
        );

        assert_eq!(
            ddl.create_table(&ctx(), "Cliente", &[id, codigo, nome, rascunho]),
            "CREATE TABLE \"Cliente\" (\"Id\" INTEGER PRIMARY KEY, \
             \"Codigo\" TEXT COLLATE NOCASE NOT NULL, \
             \"Nome\" TEXT COLLATE NOCASE NULL, UNIQUE (\"Codigo\"));"
        );
    }

    #[test]
    fn test_add_column() {
        let mut obs = column("Obs", ColumnType::String, true);
        obs.default = Some(String::from("''"));
        assert_eq!(
            SqliteDdl.add_column(&ctx(), "Cliente", &obs),
            "ALTER TABLE \"Cliente\" ADD COLUMN \"Obs\" TEXT COLLATE NOCASE;"
        );
    }

    #[test]
    fn test_indexes() {
        let index = IndexDescriptor::new("IX_Cliente_Nome", ["Nome", "Uf"])
            .unique()
            .filter("Nome IS NOT NULL");
        assert_eq!(
            SqliteDdl.create_index(&ctx(), "Cliente", &index),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"IX_Cliente_Nome\" ON \"Cliente\" (\"Nome\", \"Uf\") \
             WHERE Nome IS NOT NULL;"
        );
        assert_eq!(
            SqliteDdl.drop_index(&ctx(), "Cliente", "IX_Cliente_Nome"),
            "DROP INDEX IF EXISTS \"IX_Cliente_Nome\";"
        );
    }

    #[test]
    fn test_catalog_queries_bind_the_table() {
        let statement = SqliteDdl.columns_query(&ctx(), "Cliente").unwrap();
        assert_eq!(statement.sql, "SELECT name FROM pragma_table_info(?)");
        assert_eq!(statement.dump(), "table=Cliente|");
    }
}
