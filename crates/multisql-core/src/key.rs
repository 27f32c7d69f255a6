//! Row identification.

use crate::schema::{ColumnDescriptor, Operator};

/// How a [`KeySelection`] was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// An autoincrement column holding a generated value.
    Identity,
    /// The declared primary key columns.
    PrimaryKey,
    /// Every persisted column.
    AllColumns,
}

/// Columns chosen to identify a row.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySelection {
    /// Strategy that produced the selection.
    pub strategy: KeyStrategy,
    /// Selected columns, in declaration order.
    pub columns: Vec<ColumnDescriptor>,
}

impl KeySelection {
    /// Whether nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Selects the identifying columns by precedence: the first autoincrement
/// column with a generated value, else every key column, else every
/// persisted column.
#[must_use]
pub fn select_key(descriptors: &[ColumnDescriptor]) -> KeySelection {
    if let Some(identity) = descriptors
        .iter()
        .find(|d| d.flags.auto_increment && !d.flags.ignored && d.has_generated_value())
    {
        let mut column = identity.clone();
        column.operator = Operator::Equal;
        return KeySelection {
            strategy: KeyStrategy::Identity,
            columns: vec![column],
        };
    }

    let keys: Vec<_> = descriptors
        .iter()
        .filter(|d| d.flags.key && !d.flags.ignored)
        .cloned()
        .collect();
    if !keys.is_empty() {
        return KeySelection {
            strategy: KeyStrategy::PrimaryKey,
            columns: keys,
        };
    }

    KeySelection {
        strategy: KeyStrategy::AllColumns,
        columns: descriptors
            .iter()
            .filter(|d| !d.flags.ignored)
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnFlags, ColumnType};
    use crate::value::SqlValue;

    fn column(name: &str, value: i64, flags: ColumnFlags) -> ColumnDescriptor {
        let mut d = ColumnDescriptor::adhoc(name, ColumnType::Int, SqlValue::Int(value));
        d.flags = flags;
        d
    }

    fn sample(identity: i64) -> Vec<ColumnDescriptor> {
        vec![
            column(
                "Id",
                identity,
                ColumnFlags {
                    key: true,
                    auto_increment: true,
                    ..ColumnFlags::NONE
                },
            ),
            column(
                "Codigo",
                10,
                ColumnFlags {
                    key: true,
                    ..ColumnFlags::NONE
                },
            ),
            column("Qtd", 1, ColumnFlags::NONE),
            column(
                "Cache",
                0,
                ColumnFlags {
                    ignored: true,
                    ..ColumnFlags::NONE
                },
            ),
        ]
    }

    fn names(selection: &KeySelection) -> Vec<&str> {
        selection.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_positive_identity_wins() {
        let selection = select_key(&sample(5));
        assert_eq!(selection.strategy, KeyStrategy::Identity);
        assert_eq!(names(&selection), vec!["Id"]);
    }

    #[test]
    fn test_key_columns_without_identity_value() {
        let selection = select_key(&sample(0));
        assert_eq!(selection.strategy, KeyStrategy::PrimaryKey);
        assert_eq!(names(&selection), vec!["Id", "Codigo"]);
    }

    #[test]
    fn test_all_persisted_columns_as_fallback() {
        let columns = vec![
            column("A", 1, ColumnFlags::NONE),
            column(
                "B",
                2,
                ColumnFlags {
                    ignored: true,
                    ..ColumnFlags::NONE
                },
            ),
            column("C", 3, ColumnFlags::NONE),
        ];
        let selection = select_key(&columns);
        assert_eq!(selection.strategy, KeyStrategy::AllColumns);
        assert_eq!(names(&selection), vec!["A", "C"]);
    }
}
