//! UPDATE statements.

use super::{Statement, StatementBuilder};
use crate::error::{CoreError, Result};
use crate::key::{select_key, KeyStrategy};
use crate::predicate::Combine;
use crate::schema::{ColumnDescriptor, Operator};

impl StatementBuilder {
    /// Whether a column belongs to an UPDATE's SET list. Key columns are
    /// handled by the caller.
    fn is_updatable(&self, column: &ColumnDescriptor) -> bool {
        let flags = column.flags;
        self.is_editable(column)
            && !flags.auto_increment
            && !flags.only_insert
            && !(flags.auto_insert_date && !flags.auto_update_date)
    }

    fn render_update(
        &self,
        set: &[&ColumnDescriptor],
        predicate: Statement,
    ) -> Result<Statement> {
        if set.is_empty() {
            return Err(CoreError::configuration(format!(
                "no updatable column for table '{}'",
                self.table
            )));
        }
        let assignments = set
            .iter()
            .map(|c| format!("{} = ?", self.ctx.quote(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut params = self.binder().bind_all(set.iter().copied())?;
        params.extend(predicate.params);
        Ok(Statement {
            sql: format!(
                "UPDATE {} SET {assignments}{}",
                self.quoted_table(),
                predicate.sql
            ),
            params,
        })
    }

    /// UPDATE identified by the declared key (or a generated identity value
    /// when present). Key columns are not rewritten.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when neither a key nor an identity
    /// value identifies the row.
    pub fn update_by_key(&self, columns: &[ColumnDescriptor]) -> Result<Statement> {
        let selection = select_key(columns);
        if selection.strategy == KeyStrategy::AllColumns || selection.is_empty() {
            return Err(CoreError::configuration(
                "cannot update without WHERE reference columns",
            ));
        }
        let set: Vec<_> = columns
            .iter()
            .filter(|c| self.is_updatable(c) && !c.flags.key)
            .collect();
        let predicate = self.predicate().render(&selection.columns, Combine::And)?;
        self.render_update(&set, predicate)
    }

    /// UPDATE identified by the identity value. Key columns may change.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when there is no identity column or its
    /// value is not positive.
    pub fn update_by_identity(&self, columns: &[ColumnDescriptor]) -> Result<Statement> {
        let identity = columns
            .iter()
            .find(|c| c.is_identity() && !c.flags.ignored)
            .ok_or_else(|| CoreError::configuration("cannot update by identity without an identity column"))?;
        if !identity.has_generated_value() {
            return Err(CoreError::configuration(format!(
                "cannot update by identity: '{}' has no value",
                identity.name
            )));
        }
        let mut identity = identity.clone();
        identity.operator = Operator::Equal;

        let set: Vec<_> = columns.iter().filter(|c| self.is_updatable(c)).collect();
        let predicate = self
            .predicate()
            .render(std::slice::from_ref(&identity), Combine::And)?;
        self.render_update(&set, predicate)
    }

    /// Picks the UPDATE variant: by identity when the identity holds a
    /// value, otherwise by key.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the row cannot be identified.
    pub fn update(&self, columns: &[ColumnDescriptor]) -> Result<Statement> {
        let has_identity_value = columns
            .iter()
            .any(|c| c.is_identity() && !c.flags.ignored && c.has_generated_value());
        if has_identity_value {
            self.update_by_identity(columns)
        } else if columns.iter().any(|c| c.flags.key && !c.flags.ignored) {
            self.update_by_key(columns)
        } else {
            Err(CoreError::configuration(
                "cannot update without WHERE reference columns",
            ))
        }
    }

    /// `UPDATE t SET ... WHERE ...` with arbitrary SET and WHERE columns.
    /// SET parameters precede WHERE parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty SET or WHERE list.
    pub fn update_where(
        &self,
        set: &[ColumnDescriptor],
        criteria: &[ColumnDescriptor],
        combine: Combine,
    ) -> Result<Statement> {
        if criteria.is_empty() {
            return Err(CoreError::configuration(
                "cannot update without WHERE reference columns",
            ));
        }
        let set: Vec<_> = set.iter().collect();
        let predicate = self.predicate().render(criteria, combine)?;
        self.render_update(&set, predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::pedido;
    use super::*;
    use crate::dialect::{Dialect, SqlContext};
    use crate::predicate::Criterion;

    fn builder(ctx: SqlContext) -> StatementBuilder {
        StatementBuilder::new(ctx, "Pedido")
    }

    #[test]
    fn test_update_by_key() {
        let statement = builder(SqlContext::new(Dialect::Sqlite)).update(&pedido(0)).unwrap();
        assert_eq!(
            statement.sql,
            r#"UPDATE "Pedido" SET "Total" = ?, "Revisor" = ?, "Alteracao" = ?, "Origem" = ? WHERE "Loja" = ? AND "Numero" = ?"#
        );
        let names: Vec<_> = statement.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Total", "Revisor", "Alteracao", "Origem", "Loja", "Numero"]);
    }

    #[test]
    fn test_update_by_identity_rewrites_keys() {
        let statement = builder(SqlContext::new(Dialect::MySql)).update(&pedido(8)).unwrap();
        assert_eq!(
            statement.sql,
            "UPDATE `Pedido` SET `Loja` = ?, `Numero` = ?, `Total` = ?, `Revisor` = ?, `Alteracao` = ?, `Origem` = ? WHERE `Id` = ?"
        );
        assert_eq!(statement.params.last().map(|p| p.name.as_str()), Some("Id"));
    }

    #[test]
    fn test_server_managed_update_date_is_skipped() {
        let ctx = SqlContext::new(Dialect::MySql).with_current_timestamp(true);
        let statement = builder(ctx).update(&pedido(8)).unwrap();
        assert!(!statement.sql.contains("Alteracao"));
    }

    #[test]
    fn test_update_without_reference_fails() {
        let mut columns = pedido(0);
        for column in &mut columns {
            column.flags.key = false;
        }
        let builder = builder(SqlContext::new(Dialect::Sqlite));
        assert!(builder.update(&columns).is_err());
        assert!(builder.update_by_key(&columns).is_err());
        assert!(builder.update_by_identity(&columns).is_err());
    }

    #[test]
    fn test_update_where_orders_params() {
        let total = ColumnDescriptor::from(Criterion::new("Total", 1.5_f64));
        let criteria: Vec<ColumnDescriptor> = vec![Criterion::new("Loja", 3_i64).into()];
        let statement = builder(SqlContext::new(Dialect::MySql))
            .update_where(&[total], &criteria, Combine::And)
            .unwrap();
        assert_eq!(statement.sql, "UPDATE `Pedido` SET `Total` = ? WHERE `Loja` = ?");
        assert_eq!(statement.dump(), "Total=1.5|Loja=3|");
    }
}
