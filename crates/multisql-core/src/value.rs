//! SQL values and conversions between field types and bound parameters.
//!
//! Values are always sent as parameters. [`SqlValue::to_sql_inline`] exists
//! only for DDL defaults and diagnostics.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

/// Earliest date persisted for DATE columns.
///
/// Values before it (typically an uninitialized minimum) are replaced by it
/// before binding.
pub const MIN_DATE: NaiveDateTime = match NaiveDate::from_ymd_opt(1900, 1, 1) {
    Some(date) => date.and_time(NaiveTime::MIN),
    None => NaiveDateTime::MIN,
};

/// A SQL value that can be used as a parameter or read back from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// Date and time without zone (stored as UTC when stamped by the engine).
    DateTime(NaiveDateTime),
    /// Time of day.
    Time(NaiveTime),
    /// GUID value in its native form.
    Guid(Uuid),
}

impl SqlValue {
    /// Returns `true` for [`SqlValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer content when the value is numeric.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as plain text, without SQL quoting.
    ///
    /// Used for LIKE patterns and parameter dumps.
    #[must_use]
    pub fn to_plain_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Returns the SQL representation for inline use (escaped).
    ///
    /// **Warning**: Prefer using parameterized queries instead.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Bool(b) => String::from(if *b { "1" } else { "0" }),
            Self::Int(n) => format!("{n}"),
            Self::Float(f) => format!("{f}"),
            Self::Text(s) => {
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Self::Blob(b) => format!("X'{}'", hex(b)),
            Self::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
            Self::Guid(g) => format!("'{}'", g.hyphenated()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(b) => write!(f, "X'{}'", hex(b)),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Self::Guid(g) => write!(f, "{}", g.hyphenated()),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

macro_rules! int_to_sql {
    ($($ty:ty),*) => {
        $(
            impl ToSqlValue for $ty {
                fn to_sql_value(self) -> SqlValue {
                    SqlValue::Int(i64::from(self))
                }
            }
        )*
    };
}

int_to_sql!(i8, i16, i32, i64, u8, u16, u32);

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for f32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(f64::from(self))
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl ToSqlValue for &[u8] {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self.to_vec())
    }
}

impl ToSqlValue for NaiveDateTime {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::DateTime(self)
    }
}

impl ToSqlValue for NaiveTime {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Time(self)
    }
}

impl ToSqlValue for Uuid {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Guid(self)
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

/// Trait for field types that can be read back from a [`SqlValue`].
///
/// Conversions are lenient in the way drivers report values: SQLite hands
/// dates back as text and booleans as integers, MySQL reports DECIMAL as
/// text. NULL only converts into `Option`.
pub trait FromSqlValue: Sized {
    /// Converts a database value into the field type.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch when the value cannot represent
    /// `Self`.
    fn from_sql_value(value: SqlValue) -> Result<Self, String>;
}

fn mismatch(expected: &str, value: &SqlValue) -> String {
    format!("expected {expected}, found {value:?}")
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        Ok(value)
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        match &value {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(n) => Ok(*n != 0),
            SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Ok(true),
                "0" | "false" => Ok(false),
                _ => Err(mismatch("bool", &value)),
            },
            _ => Err(mismatch("bool", &value)),
        }
    }
}

macro_rules! int_from_sql {
    ($($ty:ty),*) => {
        $(
            impl FromSqlValue for $ty {
                fn from_sql_value(value: SqlValue) -> Result<Self, String> {
                    let wide = value
                        .as_i64()
                        .ok_or_else(|| mismatch(stringify!($ty), &value))?;
                    <$ty>::try_from(wide).map_err(|e| format!("{wide} out of range: {e}"))
                }
            }
        )*
    };
}

int_from_sql!(i8, i16, i32, i64, u8, u16, u32);

impl FromSqlValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        match &value {
            SqlValue::Float(f) => Ok(*f),
            SqlValue::Int(n) => Ok(*n as Self),
            SqlValue::Text(s) => s.trim().parse().map_err(|_| mismatch("f64", &value)),
            _ => Err(mismatch("f64", &value)),
        }
    }
}

impl FromSqlValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        f64::from_sql_value(value).map(|f| f as Self)
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Null => Err(String::from("expected text, found NULL")),
            SqlValue::Blob(bytes) => Self::from_utf8(bytes).map_err(|e| e.to_string()),
            other => Ok(other.to_plain_text()),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Blob(bytes) => Ok(bytes),
            SqlValue::Text(s) => Ok(s.into_bytes()),
            SqlValue::Guid(g) => Ok(g.as_bytes().to_vec()),
            other => Err(mismatch("blob", &other)),
        }
    }
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

impl FromSqlValue for NaiveDateTime {
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        match &value {
            SqlValue::DateTime(dt) => Ok(*dt),
            SqlValue::Text(s) => parse_date_time(s).ok_or_else(|| mismatch("date", &value)),
            SqlValue::Int(secs) => chrono::DateTime::from_timestamp(*secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| mismatch("date", &value)),
            _ => Err(mismatch("date", &value)),
        }
    }
}

impl FromSqlValue for NaiveTime {
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        match &value {
            SqlValue::Time(t) => Ok(*t),
            SqlValue::DateTime(dt) => Ok(dt.time()),
            SqlValue::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .ok()
                .or_else(|| parse_date_time(s).map(|dt| dt.time()))
                .ok_or_else(|| mismatch("time", &value)),
            _ => Err(mismatch("time", &value)),
        }
    }
}

impl FromSqlValue for Uuid {
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        match &value {
            SqlValue::Guid(g) => Ok(*g),
            SqlValue::Blob(bytes) => {
                Self::from_slice(bytes).map_err(|e| format!("invalid guid bytes: {e}"))
            }
            SqlValue::Text(s) => Self::parse_str(s.trim()).map_err(|e| e.to_string()),
            _ => Err(mismatch("guid", &value)),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}
