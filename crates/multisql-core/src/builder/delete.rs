//! DELETE statements.
//!
//! A DELETE always carries a WHERE clause; an empty reference is an error
//! rather than a full table delete.

use super::{Statement, StatementBuilder};
use crate::error::{CoreError, Result};
use crate::key::select_key;
use crate::predicate::Combine;
use crate::schema::ColumnDescriptor;

impl StatementBuilder {
    /// Deletes the row identified by the key selection of `columns`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the selection is empty.
    pub fn delete_by_key(&self, columns: &[ColumnDescriptor]) -> Result<Statement> {
        let selection = select_key(columns);
        self.delete_where(&selection.columns, Combine::And)
    }

    /// Deletes rows matching the criteria.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when there is no criterion.
    pub fn delete_where(&self, criteria: &[ColumnDescriptor], combine: Combine) -> Result<Statement> {
        if criteria.is_empty() {
            return Err(CoreError::configuration(
                "cannot delete without a reference for WHERE",
            ));
        }
        let predicate = self.predicate().render(criteria, combine)?;
        Ok(Statement {
            sql: format!("DELETE FROM {}{}", self.quoted_table(), predicate.sql),
            params: predicate.params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::pedido;
    use super::*;
    use crate::dialect::{Dialect, SqlContext};
    use crate::value::SqlValue;

    #[test]
    fn test_delete_by_identity() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::Sqlite), "Pedido");
        let statement = builder.delete_by_key(&pedido(3)).unwrap();
        assert_eq!(statement.sql, r#"DELETE FROM "Pedido" WHERE "Id" = ?"#);
        assert_eq!(statement.params[0].value, SqlValue::Int(3));
    }

    #[test]
    fn test_delete_by_key_columns() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::MySql), "Pedido");
        let statement = builder.delete_by_key(&pedido(0)).unwrap();
        assert_eq!(statement.sql, "DELETE FROM `Pedido` WHERE `Loja` = ? AND `Numero` = ?");
    }

    #[test]
    fn test_delete_without_reference_fails() {
        let builder = StatementBuilder::new(SqlContext::new(Dialect::MySql), "Pedido");
        let err = builder.delete_by_key(&[]).unwrap_err();
        assert_eq!(
            err,
            CoreError::Configuration(String::from("cannot delete without a reference for WHERE"))
        );
    }

    #[test]
    fn test_delete_injection_stays_parameterized() {
        let malicious = "1; DROP TABLE Pedido; --";
        let criteria: Vec<ColumnDescriptor> = vec![crate::predicate::Criterion::new("Numero", malicious).into()];
        let builder = StatementBuilder::new(SqlContext::new(Dialect::Sqlite), "Pedido");
        let statement = builder.delete_where(&criteria, Combine::And).unwrap();
        assert_eq!(statement.sql, r#"DELETE FROM "Pedido" WHERE "Numero" = ?"#);
        assert!(matches!(&statement.params[0].value, SqlValue::Text(s) if s == malicious));
    }
}
