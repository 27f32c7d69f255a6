//! WHERE clause rendering.

use crate::binder::{BoundParam, ParameterBinder, Statement};
use crate::dialect::SqlContext;
use crate::error::Result;
use crate::schema::{ColumnDescriptor, ColumnType, Operator};
use crate::value::{SqlValue, ToSqlValue};

/// How predicate items are joined. Only flat, single level combination is
/// supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combine {
    /// `a AND b`
    #[default]
    And,
    /// `a OR b`
    Or,
}

impl Combine {
    const fn separator(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// A free standing predicate item for ad hoc WHERE clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    /// Column name.
    pub column: String,
    /// Compared value, NULL renders `IS NULL`.
    pub value: SqlValue,
    /// Comparison.
    pub operator: Operator,
    /// Explicit parameter name.
    pub param: Option<String>,
    /// Semantic type, inferred from the value when not given.
    pub column_type: ColumnType,
    /// Table alias qualifying the column.
    pub table: Option<String>,
}

impl Criterion {
    /// Equality criterion.
    pub fn new(column: impl Into<String>, value: impl ToSqlValue) -> Self {
        let value = value.to_sql_value();
        Self {
            column: column.into(),
            column_type: ColumnType::of_value(&value),
            value,
            operator: Operator::Equal,
            param: None,
            table: None,
        }
    }

    /// Sets the comparison.
    #[must_use]
    pub const fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Sets the parameter name.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.param = Some(name.into());
        self
    }

    /// Sets the semantic type.
    #[must_use]
    pub const fn with_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = column_type;
        self
    }

    /// Qualifies the column with a table alias.
    #[must_use]
    pub fn on_table(mut self, alias: impl Into<String>) -> Self {
        self.table = Some(alias.into());
        self
    }

    /// Converts into a descriptor.
    #[must_use]
    pub fn into_descriptor(self) -> ColumnDescriptor {
        let mut descriptor = ColumnDescriptor::adhoc(self.column, self.column_type, self.value);
        descriptor.operator = self.operator;
        descriptor.param = self.param;
        descriptor.table = self.table;
        descriptor
    }
}

impl From<Criterion> for ColumnDescriptor {
    fn from(criterion: Criterion) -> Self {
        criterion.into_descriptor()
    }
}

/// Renders flat predicates over descriptors.
#[derive(Debug, Clone, Copy)]
pub struct WhereBuilder<'a> {
    ctx: &'a SqlContext,
}

impl<'a> WhereBuilder<'a> {
    /// Creates a builder for the context.
    #[must_use]
    pub const fn new(ctx: &'a SqlContext) -> Self {
        Self { ctx }
    }

    /// Renders ` WHERE ...` for the columns, or an empty fragment when there
    /// is none.
    ///
    /// # Errors
    ///
    /// Propagates binding errors.
    pub fn render(&self, columns: &[ColumnDescriptor], combine: Combine) -> Result<Statement> {
        if columns.is_empty() {
            return Ok(Statement::default());
        }
        let (items, params) = self.items(columns)?;
        Ok(Statement {
            sql: format!(" WHERE {}", items.join(combine.separator())),
            params,
        })
    }

    /// Renders the bare condition list without the `WHERE` keyword.
    ///
    /// # Errors
    ///
    /// Propagates binding errors.
    pub fn render_condition(&self, columns: &[ColumnDescriptor], combine: Combine) -> Result<Statement> {
        let (items, params) = self.items(columns)?;
        Ok(Statement {
            sql: items.join(combine.separator()),
            params,
        })
    }

    fn items(&self, columns: &[ColumnDescriptor]) -> Result<(Vec<String>, Vec<BoundParam>)> {
        let binder = ParameterBinder::new(self.ctx);
        let mut items = Vec::with_capacity(columns.len());
        let mut params = Vec::new();

        for column in columns {
            let target = self.column_ref(column);
            if column.value.is_null() {
                items.push(format!("{target} IS NULL"));
                continue;
            }
            if column.operator.is_text_match() {
                items.push(format!(
                    "{target} LIKE ?{}",
                    self.ctx.dialect.like_collation()
                ));
            } else {
                items.push(format!("{target} {} ?", column.operator.as_sql()));
            }
            params.push(binder.bind(column)?);
        }

        Ok((items, params))
    }

    fn column_ref(&self, column: &ColumnDescriptor) -> String {
        let name = self.ctx.quote(&column.name);
        match &column.table {
            Some(alias) => format!("{alias}.{name}"),
            None => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    fn render(dialect: Dialect, criteria: Vec<Criterion>, combine: Combine) -> Statement {
        let ctx = SqlContext::new(dialect);
        let columns: Vec<ColumnDescriptor> = criteria.into_iter().map(Into::into).collect();
        WhereBuilder::new(&ctx).render(&columns, combine).unwrap()
    }

    #[test]
    fn test_empty_predicate() {
        let statement = render(Dialect::Sqlite, Vec::new(), Combine::And);
        assert_eq!(statement.sql, "");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_null_renders_is_null_without_param() {
        let statement = render(
            Dialect::Sqlite,
            vec![
                Criterion::new("Nome", SqlValue::Null),
                Criterion::new("Id", 3_i64),
            ],
            Combine::And,
        );
        assert_eq!(statement.sql, r#" WHERE "Nome" IS NULL AND "Id" = ?"#);
        assert_eq!(statement.params.len(), 1);
        assert_eq!(statement.params[0].name, "Id");
    }

    #[test]
    fn test_like_with_collation_on_sqlite() {
        let statement = render(
            Dialect::Sqlite,
            vec![Criterion::new("Nome", "abc").with_operator(Operator::Contains)],
            Combine::And,
        );
        assert_eq!(statement.sql, r#" WHERE "Nome" LIKE ? COLLATE NOCASE"#);
        assert_eq!(statement.params[0].value, SqlValue::Text(String::from("%abc%")));
    }

    #[test]
    fn test_like_on_mysql_and_or_combination() {
        let statement = render(
            Dialect::MySql,
            vec![
                Criterion::new("Nome", "ab").with_operator(Operator::StartsWith),
                Criterion::new("Email", "ab").with_operator(Operator::EndsWith),
            ],
            Combine::Or,
        );
        assert_eq!(statement.sql, " WHERE `Nome` LIKE ? OR `Email` LIKE ?");
        assert_eq!(statement.params[0].value, SqlValue::Text(String::from("ab%")));
        assert_eq!(statement.params[1].value, SqlValue::Text(String::from("%ab")));
    }

    #[test]
    fn test_range_operators_and_alias() {
        let statement = render(
            Dialect::MySql,
            vec![
                Criterion::new("Valor", 10_i64)
                    .with_operator(Operator::GreaterOrEqual)
                    .with_param("minimo"),
                Criterion::new("Valor", 20_i64)
                    .with_operator(Operator::Less)
                    .with_param("maximo")
                    .on_table("T"),
            ],
            Combine::And,
        );
        assert_eq!(statement.sql, " WHERE `Valor` >= ? AND T.`Valor` < ?");
        assert_eq!(statement.dump(), "minimo=10|maximo=20|");
    }
}
