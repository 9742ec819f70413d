//! Column metadata and declared column types.
//!
//! Insert descriptors returned by a connection carry one [`Column`] per
//! target column. The declared [`ColumnType`] is used to shape-check rows
//! client-side before a batch is sent.

use std::fmt;

use crate::error::TypeError;
use crate::value::Value;

/// Declared type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Boolean.
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// Variable-length string.
    String,
    /// Timestamp.
    DateTime,
    /// Nullable wrapper around another type.
    Nullable(Box<ColumnType>),
}

impl ColumnType {
    /// Parse a type name such as `UInt32`, `DateTime64(3)` or `Nullable(String)`.
    pub fn parse(name: &str) -> Result<Self, TypeError> {
        Self::from_type_name(name).ok_or_else(|| TypeError::UnknownColumnType(name.to_string()))
    }

    /// Parse a type name, returning `None` when it is not recognized.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        let name = name.trim();

        if let Some(inner) = strip_wrapper(name, "Nullable") {
            return Self::from_type_name(inner).map(|t| Self::Nullable(Box::new(t)));
        }
        // DateTime('UTC'), DateTime64(3), DateTime64(6, 'UTC')
        if name.starts_with("DateTime") {
            return Some(Self::DateTime);
        }
        if name.starts_with("FixedString") || name.starts_with("LowCardinality(String") {
            return Some(Self::String);
        }

        match name {
            "Bool" | "Boolean" => Some(Self::Bool),
            "Int8" => Some(Self::Int8),
            "Int16" => Some(Self::Int16),
            "Int32" => Some(Self::Int32),
            "Int64" => Some(Self::Int64),
            "UInt8" => Some(Self::UInt8),
            "UInt16" => Some(Self::UInt16),
            "UInt32" => Some(Self::UInt32),
            "UInt64" => Some(Self::UInt64),
            "Float32" => Some(Self::Float32),
            "Float64" => Some(Self::Float64),
            "String" => Some(Self::String),
            _ => None,
        }
    }

    /// Check whether a value can be stored in a column of this type.
    ///
    /// Integers must fit the declared width; NULL is only accepted by
    /// [`ColumnType::Nullable`].
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Nullable(_), Value::Null) => true,
            (Self::Nullable(inner), v) => inner.accepts(v),
            (_, Value::Null) => false,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Int8, v) => signed_fits(v, i8::MIN.into(), i8::MAX.into()),
            (Self::Int16, v) => signed_fits(v, i16::MIN.into(), i16::MAX.into()),
            (Self::Int32, v) => signed_fits(v, i32::MIN.into(), i32::MAX.into()),
            (Self::Int64, v) => signed_fits(v, i64::MIN, i64::MAX),
            (Self::UInt8, v) => unsigned_fits(v, u8::MAX.into()),
            (Self::UInt16, v) => unsigned_fits(v, u16::MAX.into()),
            (Self::UInt32, v) => unsigned_fits(v, u32::MAX.into()),
            (Self::UInt64, v) => unsigned_fits(v, u64::MAX),
            (Self::Float32 | Self::Float64, Value::Float(_) | Value::Int(_) | Value::UInt(_)) => true,
            (Self::String, Value::String(_) | Value::Bytes(_)) => true,
            (Self::DateTime, Value::DateTime(_)) => true,
            _ => false,
        }
    }

    /// Check if the type is nullable.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }
}

fn strip_wrapper<'a>(name: &'a str, wrapper: &str) -> Option<&'a str> {
    name.strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn signed_fits(value: &Value, min: i64, max: i64) -> bool {
    match value {
        Value::Int(v) => (min..=max).contains(v),
        Value::UInt(v) => i64::try_from(*v).is_ok_and(|v| v <= max),
        _ => false,
    }
}

fn unsigned_fits(value: &Value, max: u64) -> bool {
    match value {
        Value::UInt(v) => *v <= max,
        Value::Int(v) => u64::try_from(*v).is_ok_and(|v| v <= max),
        _ => false,
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nullable(inner) => return write!(f, "Nullable({inner})"),
            Self::Bool => "Bool",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::UInt8 => "UInt8",
            Self::UInt16 => "UInt16",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::String => "String",
            Self::DateTime => "DateTime",
        };
        f.write_str(name)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub column_type: ColumnType,
}

impl Column {
    /// Create column metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_and_wrapped() {
        assert_eq!(ColumnType::parse("UInt32").unwrap(), ColumnType::UInt32);
        assert_eq!(ColumnType::parse(" DateTime64(3) ").unwrap(), ColumnType::DateTime);
        assert_eq!(
            ColumnType::parse("Nullable(String)").unwrap(),
            ColumnType::Nullable(Box::new(ColumnType::String))
        );
        assert!(ColumnType::parse("Map(String, UInt8)").is_err());
    }

    #[test]
    fn test_accepts_width() {
        assert!(ColumnType::UInt8.accepts(&Value::UInt(255)));
        assert!(!ColumnType::UInt8.accepts(&Value::UInt(256)));
        assert!(ColumnType::UInt32.accepts(&Value::Int(3)));
        assert!(!ColumnType::UInt32.accepts(&Value::Int(-3)));
        assert!(ColumnType::Int8.accepts(&Value::Int(-128)));
        assert!(!ColumnType::Int64.accepts(&Value::UInt(u64::MAX)));
    }

    #[test]
    fn test_accepts_null() {
        assert!(!ColumnType::String.accepts(&Value::Null));
        let nullable = ColumnType::Nullable(Box::new(ColumnType::String));
        assert!(nullable.accepts(&Value::Null));
        assert!(nullable.accepts(&Value::String("a".into())));
        assert!(!nullable.accepts(&Value::UInt(1)));
    }

    #[test]
    fn test_display_round_trip() {
        for name in ["UInt32", "String", "DateTime", "Nullable(Int64)"] {
            assert_eq!(ColumnType::parse(name).unwrap().to_string(), name);
        }
    }
}
