//! DDL generation per backend.
//!
//! Each dialect maps the semantic column types onto its own column
//! definitions and knows where its catalog keeps table, column and index
//! metadata.

mod mysql;
mod sqlite;

pub use mysql::MySqlDdl;
pub use sqlite::SqliteDdl;

use multisql_core::{
    ColumnDescriptor, ColumnType, Criterion, Dialect, IndexDescriptor, ParameterBinder,
    SqlContext, Statement,
};

use crate::error::{MigrateError, Result};

/// Backend specific DDL.
pub trait DdlDialect: Send + Sync {
    /// Backend handled by this dialect.
    fn dialect(&self) -> Dialect;

    /// Column type with its default clause, e.g. `INTEGER DEFAULT (0)`.
    fn column_type(&self, column: &ColumnDescriptor, allow_current_timestamp: bool) -> String;

    /// Key constraint appended to `CREATE TABLE`, starting with `, `.
    fn key_constraint(&self, ctx: &SqlContext, table: &str, keys: &[&str], has_auto: bool) -> String;

    /// `CREATE INDEX` statement.
    fn create_index(&self, ctx: &SqlContext, table: &str, index: &IndexDescriptor) -> String;

    /// `DROP INDEX` statement.
    fn drop_index(&self, ctx: &SqlContext, table: &str, name: &str) -> String;

    /// Query returning one row per column of `table`, column name first.
    fn columns_query(&self, ctx: &SqlContext, table: &str) -> Result<Statement>;

    /// Query returning `index_name, is_unique, column_name` rows ordered by
    /// index and column position.
    fn indexes_query(&self, ctx: &SqlContext, table: &str) -> Result<Statement>;

    /// Triggers stamping auto dates when the server cannot default them.
    fn date_triggers(
        &self,
        _ctx: &SqlContext,
        _table: &str,
        _columns: &[ColumnDescriptor],
        _suffix: &str,
    ) -> Vec<String> {
        Vec::new()
    }

    /// `NOT NULL`, `NULL` or, for a SQLite identity, `PRIMARY KEY`.
    fn column_suffix(&self, column: &ColumnDescriptor) -> &'static str {
        if column.flags.key || column.flags.auto_increment || !column.nullable {
            if column.flags.auto_increment && self.dialect() == Dialect::Sqlite {
                "PRIMARY KEY"
            } else {
                "NOT NULL"
            }
        } else {
            "NULL"
        }
    }

    /// Full column definition used by `CREATE TABLE`.
    fn column_definition(&self, ctx: &SqlContext, column: &ColumnDescriptor) -> String {
        format!(
            "{} {} {}",
            ctx.quote(&column.name),
            self.column_type(column, ctx.allow_current_timestamp),
            self.column_suffix(column)
        )
    }

    /// `CREATE TABLE` for the persisted columns, with the key constraint
    /// derived from key flagged columns.
    fn create_table(&self, ctx: &SqlContext, table: &str, columns: &[ColumnDescriptor]) -> String {
        let persisted: Vec<&ColumnDescriptor> = columns.iter().filter(|c| !c.flags.ignored).collect();
        let definitions: Vec<String> = persisted
            .iter()
            .map(|c| self.column_definition(ctx, c))
            .collect();
        let keys: Vec<&str> = persisted
            .iter()
            .filter(|c| c.flags.key)
            .map(|c| c.name.as_str())
            .collect();
        let has_auto = persisted.iter().any(|c| c.flags.auto_increment);

        let constraint = if keys.is_empty() {
            String::new()
        } else {
            self.key_constraint(ctx, table, &keys, has_auto)
        };
        format!(
            "CREATE TABLE {} ({}{constraint});",
            ctx.quote(table),
            definitions.join(", ")
        )
    }

    /// `ALTER TABLE ... ADD COLUMN` with the bare column type. Server
    /// defaults for dates are never requested here.
    fn add_column(&self, ctx: &SqlContext, table: &str, column: &ColumnDescriptor) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            ctx.quote(table),
            ctx.quote(&column.name),
            self.column_type(column, false)
        )
    }

    /// `DROP TABLE`.
    fn drop_table(&self, ctx: &SqlContext, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {};", ctx.quote(table))
    }
}

/// DDL generator for a backend.
///
/// # Errors
///
/// Returns a configuration error for [`Dialect::Generic`].
pub fn for_dialect(dialect: Dialect) -> Result<Box<dyn DdlDialect>> {
    match dialect {
        Dialect::MySql => Ok(Box::new(MySqlDdl)),
        Dialect::Sqlite => Ok(Box::new(SqliteDdl)),
        Dialect::Generic => Err(MigrateError::Configuration(String::from(
            "schema reconciliation needs the mysql or sqlite dialect",
        ))),
    }
}

/// Wraps a declared size in parentheses: `100` becomes `(100)`.
pub(crate) fn parenthesized(size: &str) -> String {
    let size = size.trim();
    if size.starts_with('(') {
        size.to_string()
    } else {
        format!("({size})")
    }
}

/// ` DEFAULT <value>` for a declared default, empty otherwise.
pub(crate) fn default_clause(column: &ColumnDescriptor) -> String {
    column
        .default
        .as_deref()
        .map(|value| format!(" DEFAULT {value}"))
        .unwrap_or_default()
}

/// `DATETIME` with server defaults when the server manages timestamps.
pub(crate) fn date_type(column: &ColumnDescriptor, allow_current_timestamp: bool, on_update: bool) -> String {
    let mut sql = String::from("DATETIME");
    if allow_current_timestamp {
        if !column.nullable || column.flags.auto_insert_date {
            sql.push_str(" DEFAULT CURRENT_TIMESTAMP");
        }
        if on_update && column.flags.auto_update_date {
            sql.push_str(" ON UPDATE CURRENT_TIMESTAMP(0)");
        }
    }
    sql
}

/// Binds a single text parameter for a catalog query.
pub(crate) fn catalog_query(ctx: &SqlContext, sql: &str, column: &str, value: &str) -> Result<Statement> {
    let criterion = Criterion::new(column, value).into_descriptor();
    Ok(Statement {
        sql: sql.to_string(),
        params: vec![ParameterBinder::new(ctx).bind(&criterion)?],
    })
}

/// Whether the declared model supplies a value for rows that already exist
/// when the column is added: nullable, an explicit default, or a type whose
/// DDL always carries one.
#[must_use]
pub fn has_default(column: &ColumnDescriptor) -> bool {
    column.nullable
        || column.default.is_some()
        || matches!(column.column_type, ColumnType::Bool | ColumnType::Enum)
}

#[cfg(test)]
pub(crate) mod test_support {
    use multisql_core::{ColumnDescriptor, ColumnFlags, ColumnType, SqlValue};

    pub fn column(name: &str, column_type: ColumnType, nullable: bool) -> ColumnDescriptor {
        let mut column = ColumnDescriptor::adhoc(name, column_type, SqlValue::Null);
        column.nullable = nullable;
        column
    }

    pub fn flagged(name: &str, column_type: ColumnType, flags: ColumnFlags) -> ColumnDescriptor {
        let mut column = column(name, column_type, false);
        column.flags = flags;
        column
    }
}
