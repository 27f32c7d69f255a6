//! INSERT statements.

use super::{Statement, StatementBuilder};
use crate::error::{CoreError, Result};
use crate::schema::ColumnDescriptor;

impl StatementBuilder {
    /// Columns written by an INSERT: editable, not update-only, and not a
    /// backend generated identity. GUID autoincrement columns are kept since
    /// the engine generates their value.
    pub(crate) fn insert_columns<'c>(&self, columns: &'c [ColumnDescriptor]) -> Vec<&'c ColumnDescriptor> {
        columns
            .iter()
            .filter(|c| self.is_editable(c) && !c.flags.only_update && !c.is_identity())
            .collect()
    }

    /// `INSERT INTO t (cols) VALUES (?, ...)`.
    ///
    /// With `return_identity` and an identity column, the dialect's
    /// identity query is appended.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no column is insertable, or a
    /// binding error.
    pub fn insert(&self, columns: &[ColumnDescriptor], return_identity: bool) -> Result<Statement> {
        let targets = self.insert_columns(columns);
        if targets.is_empty() {
            return Err(CoreError::configuration(format!(
                "no insertable column for table '{}'",
                self.table
            )));
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted_table(),
            self.quoted_list(targets.iter().copied()),
            vec!["?"; targets.len()].join(", ")
        );
        if return_identity && columns.iter().any(|c| c.is_identity() && !c.flags.ignored) {
            sql.push_str(self.ctx.dialect.last_insert_id_query());
        }

        Ok(Statement {
            sql,
            params: self.binder().bind_all(targets)?,
        })
    }

    /// Single INSERT with one VALUES group per row. Parameter names are
    /// suffixed with the row index.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty row list or rows without
    /// insertable columns, or a binding error.
    pub fn insert_many(&self, rows: &[Vec<ColumnDescriptor>]) -> Result<Statement> {
        let Some(first) = rows.first() else {
            return Err(CoreError::configuration("no rows to insert"));
        };
        let header = self.insert_columns(first);
        if header.is_empty() {
            return Err(CoreError::configuration(format!(
                "no insertable column for table '{}'",
                self.table
            )));
        }

        let group = format!("({})", vec!["?"; header.len()].join(", "));
        let binder = self.binder();
        let mut params = Vec::with_capacity(rows.len() * header.len());
        for (index, row) in rows.iter().enumerate() {
            for column in self.insert_columns(row) {
                params.push(binder.bind_named(column, format!("{}_{index}", column.param_name()))?);
            }
        }

        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.quoted_table(),
                self.quoted_list(header.iter().copied()),
                vec![group; rows.len()].join(", ")
            ),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::pedido;
    use super::*;
    use crate::dialect::{Dialect, SqlContext};

    #[test]
    fn test_insert_skips_identity_ignored_and_update_only() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::Sqlite), "Pedido");
        let statement = builder.insert(&pedido(0), false).unwrap();
        assert_eq!(
            statement.sql,
            r#"INSERT INTO "Pedido" ("Loja", "Numero", "Total", "Criador", "Inclusao", "Alteracao", "Origem") VALUES (?, ?, ?, ?, ?, ?, ?)"#
        );
        assert_eq!(statement.params.len(), 7);
    }

    #[test]
    fn test_insert_identity_query_per_dialect() {
        let sqlite = StatementBuilder::new(SqlContext::new(Dialect::Sqlite), "Pedido");
        assert!(sqlite
            .insert(&pedido(0), true)
            .unwrap()
            .sql
            .ends_with(";SELECT last_insert_rowid();"));

        let mysql = StatementBuilder::new(SqlContext::new(Dialect::MySql), "Pedido");
        assert!(mysql
            .insert(&pedido(0), true)
            .unwrap()
            .sql
            .ends_with("; SELECT LAST_INSERT_ID();"));
    }

    #[test]
    fn test_server_managed_dates_are_not_inserted() {
        let ctx = SqlContext::new(Dialect::MySql).with_current_timestamp(true);
        let statement = StatementBuilder::new(ctx, "Pedido").insert(&pedido(0), false).unwrap();
        assert!(!statement.sql.contains("Inclusao"));
        assert!(!statement.sql.contains("Alteracao"));
    }

    #[test]
    fn test_insert_many_suffixes_params() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::MySql), "Pedido");
        let statement = builder.insert_many(&[pedido(0), pedido(0)]).unwrap();
        assert!(statement.sql.ends_with("VALUES (?, ?, ?, ?, ?, ?, ?), (?, ?, ?, ?, ?, ?, ?)"));
        assert_eq!(statement.params[0].name, "Loja_0");
        assert_eq!(statement.params[7].name, "Loja_1");
        assert!(builder.insert_many(&[]).is_err());
    }
}
