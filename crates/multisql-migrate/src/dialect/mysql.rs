//! MySQL DDL.

use multisql_core::{ColumnDescriptor, ColumnType, Dialect, IndexDescriptor, SqlContext, Statement};
use tracing::warn;

use super::{catalog_query, date_type, default_clause, parenthesized, DdlDialect};
use crate::error::Result;

/// MySQL DDL generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDdl;

impl MySqlDdl {
    fn trigger(
        ctx: &SqlContext,
        table: &str,
        columns: &[&ColumnDescriptor],
        event: &str,
        suffix: &str,
    ) -> String {
        let assignments: String = columns
            .iter()
            .map(|c| format!("SET NEW.{} = NOW();", ctx.quote(&c.name)))
            .collect();
        let name = format!("{table}_{suffix}_Before{}", capitalized(event));
        format!(
            "CREATE TRIGGER {} BEFORE {} ON {} FOR EACH ROW BEGIN {assignments} END",
            ctx.quote(&name),
            event.to_ascii_uppercase(),
            ctx.quote(table)
        )
    }
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
    })
}

impl DdlDialect for MySqlDdl {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn column_type(&self, column: &ColumnDescriptor, allow_current_timestamp: bool) -> String {
        match column.column_type {
            ColumnType::Bool => {
                let mut sql = String::from("tinyint(1)");
                if !column.nullable {
                    sql.push_str(&format!(" DEFAULT {}", column.default.as_deref().unwrap_or("0")));
                }
                sql
            }
            ColumnType::Date => date_type(column, allow_current_timestamp, true),
            ColumnType::Double => format!(
                "DECIMAL{}{}",
                column.size.as_deref().map_or_else(|| String::from("(18, 10)"), parenthesized),
                default_clause(column)
            ),
            ColumnType::Money => format!("DECIMAL(18, 4){}", default_clause(column)),
            ColumnType::Enum => format!(
                "TINYINT DEFAULT {}",
                column.default.as_deref().unwrap_or("0")
            ),
            ColumnType::Guid => format!("VARCHAR(36){}", default_clause(column)),
            ColumnType::Time => format!("TIME(0){}", default_clause(column)),
            ColumnType::Int => {
                let mut sql = String::from("BIGINT");
                if column.flags.auto_increment {
                    sql.push_str(" PRIMARY KEY AUTO_INCREMENT");
                }
                sql.push_str(&default_clause(column));
                sql
            }
            ColumnType::Blob => String::from("MEDIUMBLOB"),
            ColumnType::String => match column.size.as_deref().map(str::trim) {
                None | Some("") => String::from("VARCHAR(255)"),
                Some(size) if size.to_ascii_uppercase().contains("MAX") => String::from("LONGTEXT"),
                Some(size) => format!("VARCHAR{}", parenthesized(size)),
            },
        }
    }

    fn key_constraint(&self, ctx: &SqlContext, table: &str, keys: &[&str], has_auto: bool) -> String {
        let quoted: Vec<String> = keys.iter().map(|k| ctx.quote(k)).collect();
        let kind = if has_auto {
            format!("UNIQUE KEY {}", ctx.quote(&format!("UK_{table}")))
        } else {
            format!("PRIMARY KEY {}", ctx.quote(&format!("PK_{table}")))
        };
        format!(", {kind} ({})", quoted.join(", "))
    }

    fn create_index(&self, ctx: &SqlContext, table: &str, index: &IndexDescriptor) -> String {
        if index.filter.is_some() {
            warn!(index = %index.name, "mysql has no partial indexes, filter ignored");
        }
        let quoted: Vec<String> = index.columns.iter().map(|c| ctx.quote(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({});",
            if index.unique { "UNIQUE " } else { "" },
            ctx.quote(&index.name),
            ctx.quote(table),
            quoted.join(", ")
        )
    }

    fn drop_index(&self, ctx: &SqlContext, table: &str, name: &str) -> String {
        format!("DROP INDEX {} ON {};", ctx.quote(name), ctx.quote(table))
    }

    fn columns_query(&self, ctx: &SqlContext, table: &str) -> Result<Statement> {
        catalog_query(
            ctx,
            "SELECT COLUMN_NAME AS name FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
            "table",
            table,
        )
    }

    fn indexes_query(&self, ctx: &SqlContext, table: &str) -> Result<Statement> {
        catalog_query(
            ctx,
            "SELECT INDEX_NAME AS index_name, CASE WHEN NON_UNIQUE = 0 THEN 1 ELSE 0 END AS is_unique, \
             COLUMN_NAME AS column_name FROM INFORMATION_SCHEMA.STATISTICS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY INDEX_NAME, SEQ_IN_INDEX",
            "table",
            table,
        )
    }

    fn date_triggers(
        &self,
        ctx: &SqlContext,
        table: &str,
        columns: &[ColumnDescriptor],
        suffix: &str,
    ) -> Vec<String> {
        let persisted = || columns.iter().filter(|c| !c.flags.ignored);
        let on_insert: Vec<&ColumnDescriptor> = persisted().filter(|c| c.flags.auto_insert_date).collect();
        let on_update: Vec<&ColumnDescriptor> = persisted().filter(|c| c.flags.auto_update_date).collect();

        let mut triggers = Vec::new();
        if !on_insert.is_empty() {
            triggers.push(Self::trigger(ctx, table, &on_insert, "insert", suffix));
        }
        if !on_update.is_empty() {
            triggers.push(Self::trigger(ctx, table, &on_update, "update", suffix));
        }
        triggers
    }
}

#[cfg(test)]
mod tests {
    use multisql_core::ColumnFlags;

    use super::super::test_support::{column, flagged};
    use super::*;

    fn ctx() -> SqlContext {
        SqlContext::new(Dialect::MySql)
    }

    #[test]
    fn test_type_map() {
        let ddl = MySqlDdl;
        assert_eq!(ddl.column_type(&column("A", ColumnType::Bool, false), false), "tinyint(1) DEFAULT 0");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Double, true), false), "DECIMAL(18, 10)");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Money, true), false), "DECIMAL(18, 4)");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Enum, true), false), "TINYINT DEFAULT 0");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Guid, true), false), "VARCHAR(36)");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Time, true), false), "TIME(0)");
        assert_eq!(ddl.column_type(&column("A", ColumnType::Blob, true), false), "MEDIUMBLOB");
        assert_eq!(ddl.column_type(&column("A", ColumnType::String, true), false), "VARCHAR(255)");

        let mut text = column("A", ColumnType::String, true);
        text.size = Some(String::from("max"));
        assert_eq!(ddl.column_type(&text, false), "LONGTEXT");
        text.size = Some(String::from("60"));
        assert_eq!(ddl.column_type(&text, false), "VARCHAR(60)");
    }

    #[test]
    fn test_auto_dates_with_server_timestamps() {
        let updated = flagged(
            "Alteracao",
            ColumnType::Date,
            ColumnFlags {
                auto_update_date: true,
                ..ColumnFlags::NONE
            },
        );
        assert_eq!(
            MySqlDdl.column_type(&updated, true),
            "DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP(0)"
        );
        assert_eq!(MySqlDdl.column_type(&updated, false), "DATETIME");
    }

    #[test]
    fn test_create_table_key_constraints() {
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

        assert_eq!(
            MySqlDdl.create_table(&ctx(), "Cliente", &[id, codigo.clone()]),
            "CREATE TABLE `Cliente` (`Id` BIGINT PRIMARY KEY AUTO_INCREMENT NOT NULL, \
             `Codigo` VARCHAR(255) NOT NULL, UNIQUE KEY `UK_Cliente` (`Codigo`));"
        );
        assert_eq!(
            MySqlDdl.create_table(&ctx(), "Cliente", &[codigo]),
            "CREATE TABLE `Cliente` (`Codigo` VARCHAR(255) NOT NULL, PRIMARY KEY `PK_Cliente` (`Codigo`));"
        );
    }

    #[test]
    fn test_date_triggers() {
        let created = flagged(
            "Inclusao",
            ColumnType::Date,
            ColumnFlags {
                auto_insert_date: true,
                ..ColumnFlags::NONE
            },
        );
        let updated = flagged(
            "Alteracao",
            ColumnType::Date,
            ColumnFlags {
                auto_update_date: true,
                ..ColumnFlags::NONE
            },
        );
        let triggers = MySqlDdl.date_triggers(&ctx(), "Cliente", &[created, updated], "202601011200");
        assert_eq!(
            triggers,
            vec![
                "CREATE TRIGGER `Cliente_202601011200_BeforeInsert` BEFORE INSERT ON `Cliente` \
                 FOR EACH ROW BEGIN SET NEW.`Inclusao` = NOW(); END",
                "CREATE TRIGGER `Cliente_202601011200_BeforeUpdate` BEFORE UPDATE ON `Cliente` \
                 FOR EACH ROW BEGIN SET NEW.`Alteracao` = NOW(); END",
            ]
        );
        assert!(MySqlDdl
            .date_triggers(&ctx(), "Cliente", &[column("Nome", ColumnType::String, true)], "x")
            .is_empty());
    }

    #[test]
    fn test_indexes() {
        let index = IndexDescriptor::new("IX_Cliente_Nome", ["Nome"]);
        assert_eq!(
            MySqlDdl.create_index(&ctx(), "Cliente", &index),
            "CREATE INDEX `IX_Cliente_Nome` ON `Cliente` (`Nome`);"
        );
        assert_eq!(
            MySqlDdl.drop_index(&ctx(), "Cliente", "IX_Cliente_Nome"),
            "DROP INDEX `IX_Cliente_Nome` ON `Cliente`;"
        );
    }
}
