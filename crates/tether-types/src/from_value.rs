//! Conversion from [`Value`] into Rust types.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::TypeError;
use crate::value::Value;

/// Trait for types that can be decoded from a column [`Value`].
pub trait FromValue: Sized {
    /// Convert from a value, failing on NULL.
    fn from_value(value: &Value) -> Result<Self, TypeError>;

    /// Convert from a value, mapping NULL to `None`.
    fn from_value_nullable(value: &Value) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_value(value).map(Some)
        }
    }
}

fn mismatch(expected: &'static str, value: &Value) -> TypeError {
    if value.is_null() {
        return TypeError::UnexpectedNull;
    }
    TypeError::TypeMismatch {
        expected,
        actual: value.type_name().to_string(),
    }
}

macro_rules! impl_from_value_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, TypeError> {
                    let out_of_range = |v: String| TypeError::OutOfRange {
                        target: stringify!($ty),
                        value: v,
                    };
                    match value {
                        Value::Int(v) => <$ty>::try_from(*v).map_err(|_| out_of_range(v.to_string())),
                        Value::UInt(v) => <$ty>::try_from(*v).map_err(|_| out_of_range(v.to_string())),
                        Value::Bool(v) => Ok(<$ty>::from(*v)),
                        other => Err(mismatch(stringify!($ty), other)),
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::UInt(v) => Ok(*v as f64),
            other => Err(mismatch("f64", other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            Value::UInt(v) => Ok(*v != 0),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::String(v) => Ok(v.clone()),
            Value::Bytes(v) => String::from_utf8(v.to_vec()).map_err(|_| TypeError::TypeMismatch {
                expected: "String",
                actual: "non-UTF-8 bytes".to_string(),
            }),
            // Numbers and timestamps render as text, settings are read this way.
            Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Bool(_) | Value::DateTime(_) => {
                Ok(value.to_string())
            }
            Value::Null => Err(TypeError::UnexpectedNull),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Bytes(v) => Ok(v.clone()),
            Value::String(v) => Ok(Bytes::copy_from_slice(v.as_bytes())),
            other => Err(mismatch("Bytes", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        Bytes::from_value(value).map(|b| b.to_vec())
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::DateTime(v) => Ok(*v),
            other => Err(mismatch("DateTime", other)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, TypeError> {
        T::from_value_nullable(value)
    }
}
