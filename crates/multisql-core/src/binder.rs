//! Parameter binding.
//!
//! Turns a [`ColumnDescriptor`] into the value actually sent to the backend:
//! semantic type to parameter type, LIKE wildcards, date clamping and the
//! dialect's GUID representation.

use std::fmt::Write as _;

use uuid::Uuid;

use crate::dialect::SqlContext;
use crate::error::{CoreError, Result};
use crate::schema::{ColumnDescriptor, ColumnType};
use crate::value::{SqlValue, MIN_DATE};

/// Backend parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Boolean.
    Boolean,
    /// Date and time.
    DateTime,
    /// Decimal or floating point.
    Decimal,
    /// Integer.
    Integer,
    /// Native GUID.
    Guid,
    /// Binary.
    Binary,
    /// Time of day.
    Time,
    /// Text, the default.
    String,
}

impl ParamType {
    /// Parameter type for a column in the given context.
    #[must_use]
    pub const fn for_column(column_type: ColumnType, ctx: &SqlContext) -> Self {
        match column_type {
            ColumnType::Bool => Self::Boolean,
            ColumnType::Date => Self::DateTime,
            ColumnType::Double | ColumnType::Money => Self::Decimal,
            ColumnType::Int | ColumnType::Enum => Self::Integer,
            ColumnType::Guid if ctx.dialect.stores_guid_as_blob() => Self::Binary,
            ColumnType::Guid => Self::Guid,
            ColumnType::Time => Self::Time,
            ColumnType::Blob => Self::Binary,
            ColumnType::String => Self::String,
        }
    }
}

/// A parameter ready to be bound positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Diagnostic name.
    pub name: String,
    /// Parameter type.
    pub kind: ParamType,
    /// Final value.
    pub value: SqlValue,
}

/// A rendered statement with its positional parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<BoundParam>,
}

impl Statement {
    /// Statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Parameter dump used in error reports: `name=value|` per parameter.
    #[must_use]
    pub fn dump(&self) -> String {
        dump_params(&self.params)
    }
}

/// Formats parameters as `name=value|`, NULL for null values.
#[must_use]
pub fn dump_params(params: &[BoundParam]) -> String {
    params.iter().fold(String::new(), |mut out, p| {
        let _ = write!(out, "{}={}|", p.name, p.value);
        out
    })
}

/// Binds descriptors for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct ParameterBinder<'a> {
    ctx: &'a SqlContext,
}

impl<'a> ParameterBinder<'a> {
    /// Creates a binder for the context.
    #[must_use]
    pub const fn new(ctx: &'a SqlContext) -> Self {
        Self { ctx }
    }

    /// Binds a descriptor's current value under its own parameter name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] for a binary GUID that is not
    /// 16 bytes long.
    pub fn bind(&self, column: &ColumnDescriptor) -> Result<BoundParam> {
        self.bind_named(column, column.param_name().to_string())
    }

    /// Binds a descriptor under an explicit parameter name.
    ///
    /// # Errors
    ///
    /// See [`ParameterBinder::bind`].
    pub fn bind_named(&self, column: &ColumnDescriptor, name: String) -> Result<BoundParam> {
        let value = self.convert(column)?;
        Ok(BoundParam {
            name,
            kind: ParamType::for_column(column.column_type, self.ctx),
            value,
        })
    }

    fn convert(&self, column: &ColumnDescriptor) -> Result<SqlValue> {
        let value = column.value.clone();
        if column.operator.is_text_match() && !value.is_null() {
            return Ok(SqlValue::Text(column.operator.pattern(&value.to_plain_text())));
        }

        match column.column_type {
            ColumnType::Date => Ok(match value {
                SqlValue::DateTime(dt) if dt < MIN_DATE => SqlValue::DateTime(MIN_DATE),
                other => other,
            }),
            ColumnType::String if value.is_null() && !column.nullable => {
                Ok(SqlValue::Text(String::new()))
            }
            ColumnType::Guid => self.convert_guid(&column.name, value),
            _ => Ok(value),
        }
    }

    fn convert_guid(&self, column: &str, value: SqlValue) -> Result<SqlValue> {
        let invalid = |len: usize| CoreError::InvalidFormat {
            column: column.to_string(),
            detail: format!("binary GUID must be 16 bytes, found {len}"),
        };

        if self.ctx.dialect.stores_guid_as_blob() {
            return match value {
                SqlValue::Guid(g) => Ok(SqlValue::Blob(g.as_bytes().to_vec())),
                SqlValue::Text(s) => Ok(Uuid::parse_str(s.trim())
                    .map_or(SqlValue::Text(s), |g| SqlValue::Blob(g.as_bytes().to_vec()))),
                SqlValue::Blob(b) if b.len() == 16 => Ok(SqlValue::Blob(b)),
                SqlValue::Blob(b) => Err(invalid(b.len())),
                other => Ok(other),
            };
        }

        match value {
            SqlValue::Text(s) => Ok(Uuid::parse_str(s.trim()).map_or(SqlValue::Text(s), SqlValue::Guid)),
            SqlValue::Blob(b) => Uuid::from_slice(&b)
                .map(SqlValue::Guid)
                .map_err(|_| invalid(b.len())),
            other => Ok(other),
        }
    }

    /// Binds every descriptor in order.
    ///
    /// # Errors
    ///
    /// See [`ParameterBinder::bind`].
    pub fn bind_all<'c, I>(&self, columns: I) -> Result<Vec<BoundParam>>
    where
        I: IntoIterator<Item = &'c ColumnDescriptor>,
    {
        columns.into_iter().map(|c| self.bind(c)).collect()
    }
}

/// Assigns a new v4 GUID to every GUID autoincrement column whose value is
/// missing, unparseable or nil. Returns whether anything was generated.
pub fn generate_guids(columns: &mut [ColumnDescriptor]) -> bool {
    let mut generated = false;
    for column in columns
        .iter_mut()
        .filter(|c| c.flags.auto_increment && c.column_type == ColumnType::Guid)
    {
        if !column.has_generated_value() {
            column.value = SqlValue::Guid(Uuid::new_v4());
            generated = true;
        }
    }
    generated
}
