//! Single statement insert-or-update.

use super::{Statement, StatementBuilder};
use crate::dialect::Dialect;
use crate::error::{CoreError, Result};
use crate::schema::ColumnDescriptor;

impl StatementBuilder {
    fn conflict_columns<'c>(&self, columns: &'c [ColumnDescriptor]) -> Vec<&'c ColumnDescriptor> {
        let keys: Vec<_> = columns
            .iter()
            .filter(|c| c.flags.key && !c.flags.ignored)
            .collect();
        if keys.is_empty() {
            columns
                .iter()
                .filter(|c| c.flags.auto_increment && !c.flags.ignored)
                .collect()
        } else {
            keys
        }
    }

    fn upsert_targets<'c>(&self, columns: &'c [ColumnDescriptor]) -> Vec<&'c ColumnDescriptor> {
        columns
            .iter()
            .filter(|c| {
                if c.is_identity() {
                    !c.flags.ignored && c.has_generated_value()
                } else {
                    self.is_editable(c) && !c.flags.only_update
                }
            })
            .collect()
    }

    /// Dialect conflict clause appended to an INSERT, or an empty string
    /// when the dialect has none.
    #[must_use]
    pub fn upsert_clause(&self, columns: &[ColumnDescriptor]) -> String {
        let conflict = self.conflict_columns(columns);
        let updates: Vec<_> = self
            .upsert_targets(columns)
            .into_iter()
            .filter(|c| !conflict.iter().any(|k| std::ptr::eq(*k, *c)))
            .filter(|c| {
                let flags = c.flags;
                !flags.auto_increment
                    && !flags.only_insert
                    && !(flags.auto_insert_date && !flags.auto_update_date)
            })
            .filter(|c| self.ctx.dialect != Dialect::MySql || !c.flags.auto_update_date)
            .collect();

        match self.ctx.dialect {
            Dialect::Sqlite => {
                if conflict.is_empty() {
                    return String::new();
                }
                let target = self.quoted_list(conflict.iter().copied());
                if updates.is_empty() {
                    return format!(" ON CONFLICT ({target}) DO NOTHING");
                }
                let set = updates
                    .iter()
                    .map(|c| {
                        let name = self.ctx.quote(&c.name);
                        format!("{name} = excluded.{name}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" ON CONFLICT ({target}) DO UPDATE SET {set}")
            }
            Dialect::MySql => {
                let set = if updates.is_empty() {
                    conflict
                        .first()
                        .map(|c| {
                            let name = self.ctx.quote(&c.name);
                            format!("{name} = {name}")
                        })
                        .unwrap_or_default()
                } else {
                    updates
                        .iter()
                        .map(|c| {
                            let name = self.ctx.quote(&c.name);
                            format!("{name} = VALUES({name})")
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                if set.is_empty() {
                    String::new()
                } else {
                    format!(" ON DUPLICATE KEY UPDATE {set}")
                }
            }
            Dialect::Generic => String::new(),
        }
    }

    /// INSERT followed by the dialect's conflict clause. A positive identity
    /// value is written too, so the row can be matched by it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the dialect has no upsert syntax or
    /// the entity declares nothing to conflict on.
    pub fn upsert(&self, columns: &[ColumnDescriptor]) -> Result<Statement> {
        let clause = self.upsert_clause(columns);
        if clause.is_empty() {
            return Err(CoreError::configuration(format!(
                "upsert is not available for table '{}' on {}",
                self.table, self.ctx.dialect
            )));
        }
        let targets = self.upsert_targets(columns);
        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({}){clause}",
                self.quoted_table(),
                self.quoted_list(targets.iter().copied()),
                vec!["?"; targets.len()].join(", ")
            ),
            params: self.binder().bind_all(targets)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::pedido;
    use super::*;
    use crate::dialect::SqlContext;

    #[test]
    fn test_sqlite_on_conflict() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::Sqlite), "Pedido");
        assert_eq!(
            builder.upsert_clause(&pedido(0)),
            r#" ON CONFLICT ("Loja", "Numero") DO UPDATE SET "Total" = excluded."Total", "Alteracao" = excluded."Alteracao", "Origem" = excluded."Origem""#
        );
    }

    #[test]
    fn test_mysql_on_duplicate_key() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::MySql), "Pedido");
        assert_eq!(
            builder.upsert_clause(&pedido(0)),
            " ON DUPLICATE KEY UPDATE `Total` = VALUES(`Total`), `Origem` = VALUES(`Origem`)"
        );
    }

    #[test]
    fn test_generic_has_no_upsert() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::Generic), "Pedido");
        assert_eq!(builder.upsert_clause(&pedido(0)), "");
        assert!(builder.upsert(&pedido(0)).is_err());
    }

    #[test]
    fn test_upsert_writes_positive_identity() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::Sqlite), "Pedido");
        let statement = builder.upsert(&pedido(4)).unwrap();
        assert!(statement
            .sql
            .starts_with(r#"INSERT INTO "Pedido" ("Id", "Loja", "Numero""#));
        assert_eq!(statement.params[0].name, "Id");
    }
}
