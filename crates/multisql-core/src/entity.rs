//! Entity trait and the schema introspector.
//!
//! Types implement [`Entity`] through `#[derive(Entity)]`, which emits a
//! static [`ColumnDef`] table in declaration order. [`introspect`] turns that
//! table plus the current field values into [`ColumnDescriptor`]s.

use tracing::warn;

use crate::error::{CoreError, Result};
use crate::record::Record;
use crate::schema::{ColumnDef, ColumnDescriptor, ColumnRole, ColumnType, IndexDescriptor};
use crate::value::SqlValue;

/// Capability markers computed from the descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// A backend generated integer identity exists.
    pub has_identity: bool,
    /// Audit dates, users or origin are declared.
    pub has_audit_columns: bool,
    /// The type declares its own indexes.
    pub declares_indexes: bool,
}

impl Capabilities {
    /// Computes the capabilities of a column table.
    #[must_use]
    pub fn of(columns: &[ColumnDef], declares_indexes: bool) -> Self {
        let persisted = || columns.iter().filter(|c| !c.flags.ignored);
        Self {
            has_identity: persisted().any(ColumnDef::is_identity),
            has_audit_columns: persisted()
                .any(|c| c.flags.is_auto_date() || c.role != ColumnRole::Data),
            declares_indexes,
        }
    }
}

/// A record type persisted to one table.
pub trait Entity: Default {
    /// Table name.
    const TABLE: &'static str;

    /// Whether the type owns the `IX_<table>_*` indexes of its table even
    /// when it declares none, so that stale ones get dropped.
    const MANAGES_INDEXES: bool = false;

    /// Column table in declaration order, ignored fields included.
    fn columns() -> &'static [ColumnDef];

    /// Current values, one per entry of [`Entity::columns`]. Ignored fields
    /// yield [`SqlValue::Null`].
    fn values(&self) -> Vec<SqlValue>;

    /// Assigns a database value to the field mapped to `column`.
    ///
    /// Returns `Ok(false)` when no persisted field maps to the column.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conversion`] when the value does not fit the
    /// field type.
    fn assign(&mut self, column: &str, value: SqlValue) -> Result<bool>;

    /// Declared indexes.
    fn indexes() -> Vec<IndexDescriptor> {
        Vec::new()
    }

    /// Capability markers.
    fn capabilities() -> Capabilities {
        Capabilities::of(Self::columns(), Self::MANAGES_INDEXES || !Self::indexes().is_empty())
    }

    /// The integer identity column, if any.
    fn identity_column() -> Option<&'static ColumnDef> {
        Self::columns()
            .iter()
            .find(|c| c.is_identity() && !c.flags.ignored)
    }

    /// The description column used by free text search, if any.
    fn search_column() -> Option<&'static ColumnDef> {
        Self::columns()
            .iter()
            .find(|c| c.flags.search && !c.flags.ignored)
    }
}

/// Integer backed enumeration, implemented by `#[derive(SqlEnum)]`.
pub trait SqlEnum: Sized {
    /// Stored integer.
    fn discriminant(&self) -> i64;

    /// Variant for a stored integer.
    fn from_discriminant(value: i64) -> Option<Self>;
}

/// Descriptors of an instance, carrying its current field values.
pub fn introspect<E: Entity>(entity: &E) -> Vec<ColumnDescriptor> {
    build(E::TABLE, E::columns(), Some(entity.values()))
}

/// Descriptors of a type, with NULL values.
#[must_use]
pub fn describe<E: Entity>() -> Vec<ColumnDescriptor> {
    build(E::TABLE, E::columns(), None)
}

fn build(table: &str, defs: &[ColumnDef], values: Option<Vec<SqlValue>>) -> Vec<ColumnDescriptor> {
    let mut values = values.map(Vec::into_iter);
    let mut descriptors: Vec<ColumnDescriptor> = Vec::with_capacity(defs.len());

    for def in defs {
        let value = match values.as_mut() {
            Some(iter) => iter.next(),
            None => Some(SqlValue::Null),
        };
        match validate(def, value, &descriptors) {
            Ok(value) => descriptors.push(ColumnDescriptor::from_def(def, value)),
            Err(reason) => {
                warn!(table, field = def.field, %reason, "column excluded from descriptors");
            }
        }
    }

    descriptors
}

fn validate(
    def: &ColumnDef,
    value: Option<SqlValue>,
    accepted: &[ColumnDescriptor],
) -> std::result::Result<SqlValue, String> {
    if def.name.trim().is_empty() {
        return Err(String::from("empty column name"));
    }
    if def.flags.auto_increment && !matches!(def.column_type, ColumnType::Int | ColumnType::Guid) {
        return Err(format!(
            "autoincrement requires an integer or guid column, found {:?}",
            def.column_type
        ));
    }
    if accepted
        .iter()
        .any(|d| d.name.eq_ignore_ascii_case(def.name))
    {
        return Err(format!("duplicate column name '{}'", def.name));
    }
    value.ok_or_else(|| String::from("no value supplied"))
}

const fn is_generated(def: &ColumnDef) -> bool {
    def.flags.auto_increment
        || def.flags.auto_insert_date
        || def.flags.auto_update_date
        || !matches!(def.role, ColumnRole::Data)
}

fn assign_from<'a, E, I>(entity: &mut E, values: I) -> Vec<CoreError>
where
    E: Entity,
    I: IntoIterator<Item = (&'a ColumnDef, &'a SqlValue)>,
{
    values
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .filter_map(|(def, value)| entity.assign(def.name, value.clone()).err())
        .collect()
}

/// Builds a fresh instance from a result row.
///
/// NULL values leave the field at its default. Conversion failures are
/// returned alongside the instance so the remaining fields still load.
#[must_use]
pub fn rehydrate<E: Entity>(record: &Record) -> (E, Vec<CoreError>) {
    let mut entity = E::default();
    let pairs = E::columns()
        .iter()
        .filter(|def| !def.flags.ignored)
        .filter_map(|def| record.get(def.name).map(|value| (def, value)));
    let errors = assign_from(&mut entity, pairs);
    (entity, errors)
}

/// Copies backend or engine assigned fields (identity, audit dates, audit
/// users, origin) from a re-selected row into the caller's instance.
///
/// Every other field of `target` is left untouched.
pub fn merge_generated<E: Entity>(target: &mut E, record: &Record) -> Vec<CoreError> {
    let pairs = E::columns()
        .iter()
        .filter(|def| !def.flags.ignored && is_generated(def))
        .filter_map(|def| record.get(def.name).map(|value| (def, value)));
    assign_from(target, pairs)
}

/// Writes values stamped on descriptors (generated GUIDs, audit fields)
/// back into the instance they were introspected from.
pub fn write_back<E: Entity>(target: &mut E, descriptors: &[ColumnDescriptor]) -> Vec<CoreError> {
    let pairs = E::columns()
        .iter()
        .filter(|def| !def.flags.ignored && is_generated(def))
        .filter_map(|def| {
            descriptors
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(def.name))
                .map(|d| (def, &d.value))
        });
    assign_from(target, pairs)
}
