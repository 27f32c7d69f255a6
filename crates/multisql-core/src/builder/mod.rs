//! Statement builder.
//!
//! Renders dialect-correct, parameterized SELECT/INSERT/UPDATE/UPSERT/DELETE
//! statements from column descriptors. Every statement uses positional `?`
//! placeholders; [`Statement::params`] lists the bound values in order.
//!
//! # Example
//!
//! ```rust
//! use multisql_core::builder::StatementBuilder;
//! use multisql_core::dialect::{Dialect, SqlContext};
//!
//! let builder = StatementBuilder::new(SqlContext::new(Dialect::MySql), "Cliente");
//! let statement = builder.select_all(Some("Id"));
//!
//! assert_eq!(statement.sql, "SELECT * FROM `Cliente` ORDER BY `Id`");
//! ```

mod delete;
mod insert;
mod select;
mod update;
mod upsert;

pub use select::{IN_LIST_LIMIT, STAGING_TABLE};

pub use crate::binder::Statement;

use crate::binder::ParameterBinder;
use crate::dialect::SqlContext;
use crate::entity::Entity;
use crate::predicate::WhereBuilder;
use crate::schema::ColumnDescriptor;

/// Builds statements for one table.
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    ctx: SqlContext,
    table: String,
}

impl StatementBuilder {
    /// Creates a builder for `table`.
    pub fn new(ctx: SqlContext, table: impl Into<String>) -> Self {
        Self {
            ctx,
            table: table.into(),
        }
    }

    /// Creates a builder for an entity's table.
    #[must_use]
    pub fn for_entity<E: Entity>(ctx: SqlContext) -> Self {
        Self::new(ctx, E::TABLE)
    }

    /// Rendering context.
    #[must_use]
    pub const fn context(&self) -> &SqlContext {
        &self.ctx
    }

    /// Unquoted table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted_table(&self) -> String {
        self.ctx.quote(&self.table)
    }

    const fn binder(&self) -> ParameterBinder<'_> {
        ParameterBinder::new(&self.ctx)
    }

    const fn predicate(&self) -> WhereBuilder<'_> {
        WhereBuilder::new(&self.ctx)
    }

    /// A column the caller may write: persisted, and not an auto date the
    /// server fills itself.
    fn is_editable(&self, column: &ColumnDescriptor) -> bool {
        !column.flags.ignored
            && !(self.ctx.allow_current_timestamp && column.flags.is_auto_date())
    }

    fn quoted_list<'c, I>(&self, columns: I) -> String
    where
        I: IntoIterator<Item = &'c ColumnDescriptor>,
    {
        columns
            .into_iter()
            .map(|c| self.ctx.quote(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::NaiveDate;

    use crate::schema::{ColumnDescriptor, ColumnFlags, ColumnRole, ColumnType};
    use crate::value::SqlValue;

    pub fn column(name: &str, column_type: ColumnType, value: SqlValue, flags: ColumnFlags) -> ColumnDescriptor {
        let mut d = ColumnDescriptor::adhoc(name, column_type, value);
        d.flags = flags;
        d.nullable = false;
        d
    }

    /// `Pedido`: identity, two-column key, insert-only/update-only columns,
    /// audit dates and an ignored field.
    pub fn pedido(identity: i64) -> Vec<ColumnDescriptor> {
        let when = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .map_or(SqlValue::Null, SqlValue::DateTime);
        let mut origin = column("Origem", ColumnType::String, SqlValue::Text("h".into()), ColumnFlags::NONE);
        origin.role = ColumnRole::Origin;
        vec![
            column(
                "Id",
                ColumnType::Int,
                SqlValue::Int(identity),
                ColumnFlags {
                    auto_increment: true,
                    ..ColumnFlags::NONE
                },
            ),
            column(
                "Loja",
                ColumnType::Int,
                SqlValue::Int(1),
                ColumnFlags {
                    key: true,
                    ..ColumnFlags::NONE
                },
            ),
            column(
                "Numero",
                ColumnType::Int,
                SqlValue::Int(77),
                ColumnFlags {
                    key: true,
                    ..ColumnFlags::NONE
                },
            ),
            column("Total", ColumnType::Money, SqlValue::Float(9.5), ColumnFlags::NONE),
            column(
                "Criador",
                ColumnType::String,
                SqlValue::Text("ana".into()),
                ColumnFlags {
                    only_insert: true,
                    ..ColumnFlags::NONE
                },
            ),
            column(
                "Revisor",
                ColumnType::String,
                SqlValue::Text("bia".into()),
                ColumnFlags {
                    only_update: true,
                    ..ColumnFlags::NONE
                },
            ),
            column(
                "Inclusao",
                ColumnType::Date,
                when.clone(),
                ColumnFlags {
                    auto_insert_date: true,
                    ..ColumnFlags::NONE
                },
            ),
            column(
                "Alteracao",
                ColumnType::Date,
                when,
                ColumnFlags {
                    auto_update_date: true,
                    ..ColumnFlags::NONE
                },
            ),
            origin,
            column(
                "Itens",
                ColumnType::String,
                SqlValue::Null,
                ColumnFlags {
                    ignored: true,
                    ..ColumnFlags::NONE
                },
            ),
        ]
    }
}
