//! Column and index descriptors.
//!
//! [`ColumnDef`] is the static, per-type metadata emitted by
//! `#[derive(Entity)]`. [`ColumnDescriptor`] is the per-call working copy
//! that also carries the current value, the comparison operator and the
//! parameter name used when rendering SQL.

use serde::{Deserialize, Serialize};

use crate::value::SqlValue;

/// Semantic column type, independent of any backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Boolean flag.
    Bool,
    /// 64-bit integer.
    Int,
    /// Floating point number.
    Double,
    /// Fixed precision amount.
    Money,
    /// Integer-backed enumeration.
    Enum,
    /// 128-bit GUID.
    Guid,
    /// Date and time.
    Date,
    /// Time of day.
    Time,
    /// Text.
    String,
    /// Binary data.
    Blob,
}

impl ColumnType {
    /// Best guess of the column type for an ad hoc value.
    #[must_use]
    pub const fn of_value(value: &SqlValue) -> Self {
        match value {
            SqlValue::Bool(_) => Self::Bool,
            SqlValue::Int(_) => Self::Int,
            SqlValue::Float(_) => Self::Double,
            SqlValue::Blob(_) => Self::Blob,
            SqlValue::DateTime(_) => Self::Date,
            SqlValue::Time(_) => Self::Time,
            SqlValue::Guid(_) => Self::Guid,
            SqlValue::Null | SqlValue::Text(_) => Self::String,
        }
    }
}

/// Structural shape of the Rust field, used to derive nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldShape {
    /// A plain value type (`i64`, `bool`, `NaiveDateTime`, ...).
    Plain,
    /// `Option<T>`.
    Optional,
    /// Strings, byte vectors and other sequences.
    Sequence,
    /// A `#[derive(SqlEnum)]` type.
    Enumeration,
    /// A composite or collection type that is never persisted.
    Reference,
}

/// Audit role of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnRole {
    /// Ordinary data.
    #[default]
    Data,
    /// User that inserted the row.
    InsertUser,
    /// User that last updated the row.
    UpdateUser,
    /// Host or application the write came from.
    Origin,
}

/// Behavioural flags of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ColumnFlags {
    /// Part of the declared primary key.
    pub key: bool,
    /// Generated by the backend (integer) or by the engine (GUID).
    pub auto_increment: bool,
    /// Not persisted.
    pub ignored: bool,
    /// Written on insert, never updated.
    pub only_insert: bool,
    /// Written on update, never inserted.
    pub only_update: bool,
    /// Stamped with the insertion time.
    pub auto_insert_date: bool,
    /// Stamped with the last update time.
    pub auto_update_date: bool,
    /// Description column matched by free text search.
    pub search: bool,
}

impl ColumnFlags {
    /// No flag set.
    pub const NONE: Self = Self {
        key: false,
        auto_increment: false,
        ignored: false,
        only_insert: false,
        only_update: false,
        auto_insert_date: false,
        auto_update_date: false,
        search: false,
    };

    /// Whether the column carries an automatic date.
    #[must_use]
    pub const fn is_auto_date(&self) -> bool {
        self.auto_insert_date || self.auto_update_date
    }
}

/// Comparison used when the column appears in a WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Operator {
    /// `=`
    #[default]
    Equal,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `LIKE 'v%'`
    StartsWith,
    /// `LIKE '%v%'`
    Contains,
    /// `LIKE '%v'`
    EndsWith,
}

impl Operator {
    /// SQL comparison token.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::StartsWith | Self::Contains | Self::EndsWith => "LIKE",
        }
    }

    /// Whether the operator renders a LIKE comparison.
    #[must_use]
    pub const fn is_text_match(self) -> bool {
        matches!(self, Self::StartsWith | Self::Contains | Self::EndsWith)
    }

    /// Applies the LIKE wildcards for text-match operators.
    #[must_use]
    pub fn pattern(self, text: &str) -> String {
        match self {
            Self::StartsWith => format!("{text}%"),
            Self::Contains => format!("%{text}%"),
            Self::EndsWith => format!("%{text}"),
            _ => text.to_string(),
        }
    }
}

/// Static column metadata generated by `#[derive(Entity)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Rust field name.
    pub field: &'static str,
    /// Mapped column name.
    pub name: &'static str,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Field shape.
    pub shape: FieldShape,
    /// Flags.
    pub flags: ColumnFlags,
    /// Audit role.
    pub role: ColumnRole,
    /// Declared size or precision, e.g. `"100"`, `"MAX"`, `"(12, 2)"`.
    pub size: Option<&'static str>,
    /// Default value used in DDL.
    pub default: Option<&'static str>,
}

impl ColumnDef {
    /// Nullability derived from the field shape and flags.
    #[must_use]
    pub const fn nullable(&self) -> bool {
        let flags = self.flags;
        match self.shape {
            FieldShape::Reference => flags.ignored,
            FieldShape::Optional => true,
            FieldShape::Sequence => !flags.key && !flags.ignored,
            FieldShape::Enumeration => !flags.key,
            FieldShape::Plain => false,
        }
    }

    /// An integer autoincrement column, i.e. a backend generated identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.flags.auto_increment && self.column_type != ColumnType::Guid
    }
}

/// Per-call column descriptor with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Rust field name, empty for ad hoc criteria.
    pub field: String,
    /// Mapped column name.
    pub name: String,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Flags.
    pub flags: ColumnFlags,
    /// Audit role.
    pub role: ColumnRole,
    /// Declared size or precision.
    pub size: Option<String>,
    /// Default value used in DDL.
    pub default: Option<String>,
    /// Current value.
    pub value: SqlValue,
    /// Comparison operator used in WHERE clauses.
    pub operator: Operator,
    /// Explicit parameter name, defaults to the column name.
    pub param: Option<String>,
    /// Table alias qualifying the column in WHERE clauses.
    pub table: Option<String>,
}

impl ColumnDescriptor {
    /// Builds a descriptor from static metadata and a value.
    #[must_use]
    pub fn from_def(def: &ColumnDef, value: SqlValue) -> Self {
        Self {
            field: def.field.to_string(),
            name: def.name.to_string(),
            column_type: def.column_type,
            nullable: def.nullable(),
            flags: def.flags,
            role: def.role,
            size: def.size.map(str::to_string),
            default: def.default.map(str::to_string),
            value,
            operator: Operator::Equal,
            param: None,
            table: None,
        }
    }

    /// Ad hoc descriptor for a column that is not part of an entity.
    #[must_use]
    pub fn adhoc(name: impl Into<String>, column_type: ColumnType, value: SqlValue) -> Self {
        Self {
            field: String::new(),
            name: name.into(),
            column_type,
            nullable: true,
            flags: ColumnFlags::NONE,
            role: ColumnRole::Data,
            size: None,
            default: None,
            value,
            operator: Operator::Equal,
            param: None,
            table: None,
        }
    }

    /// Name of the bound parameter.
    #[must_use]
    pub fn param_name(&self) -> &str {
        self.param.as_deref().unwrap_or(&self.name)
    }

    /// An integer autoincrement column.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.flags.auto_increment && self.column_type != ColumnType::Guid
    }

    /// Whether the column holds a usable generated value: a positive
    /// integer or a non-nil GUID.
    #[must_use]
    pub fn has_generated_value(&self) -> bool {
        match &self.value {
            SqlValue::Guid(g) => !g.is_nil(),
            SqlValue::Text(s) if self.column_type == ColumnType::Guid => {
                uuid::Uuid::parse_str(s).is_ok_and(|g| !g.is_nil())
            }
            SqlValue::Blob(b) if self.column_type == ColumnType::Guid => {
                b.len() == 16 && b.iter().any(|byte| *byte != 0)
            }
            other => other.as_i64().is_some_and(|n| n > 0),
        }
    }
}

/// Declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name, `IX_<table>_<suffix>` by convention.
    pub name: String,
    /// Ordered column names.
    pub columns: Vec<String>,
    /// Unique index.
    pub unique: bool,
    /// Partial index predicate.
    pub filter: Option<String>,
}

impl IndexDescriptor {
    /// Creates a non-unique index.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            filter: None,
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets a partial index predicate.
    #[must_use]
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }

    /// Naming prefix of indexes managed for `table`.
    #[must_use]
    pub fn convention_prefix(table: &str) -> String {
        format!("IX_{table}_")
    }

    /// Whether the name follows the managed naming convention for `table`.
    #[must_use]
    pub fn is_managed_name(name: &str, table: &str) -> bool {
        let prefix = Self::convention_prefix(table);
        name.len() >= prefix.len()
            && name
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(&prefix))
    }

    /// Compares column lists, ignoring case.
    #[must_use]
    pub fn same_columns(&self, other: &[String]) -> bool {
        self.columns.len() == other.len()
            && self
                .columns
                .iter()
                .zip(other)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}
