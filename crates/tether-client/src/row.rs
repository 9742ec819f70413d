//! Row representation for query results.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tether_types::{Column, FromValue, ToValue, TypeError, Value};

use crate::error::{Error, Result};

/// A row from a query result.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row from columns and values.
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Get a value by column index.
    pub fn get<T: FromValue>(&self, index: usize) -> std::result::Result<T, TypeError> {
        self.values
            .get(index)
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "valid column index",
                actual: format!("index {index} out of bounds"),
            })
            .and_then(T::from_value)
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> std::result::Result<T, TypeError> {
        let index = self
            .position(name)
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "valid column name",
                actual: format!("column '{name}' not found"),
            })?;

        self.get(index)
    }

    /// Try to get a value by column index, returning None if NULL or not found.
    pub fn try_get<T: FromValue>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|v| T::from_value_nullable(v).ok().flatten())
    }

    /// Try to get a value by column name, returning None if NULL or not found.
    pub fn try_get_by_name<T: FromValue>(&self, name: &str) -> Option<T> {
        self.try_get(self.position(name)?)
    }

    /// Get the raw value by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get the number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Iterate over (column, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Value)> {
        self.columns.iter().zip(self.values.iter())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn expect_width(&self, width: usize) -> Result<()> {
        if self.values.len() != width {
            return Err(Error::ColumnMismatch {
                expected: width,
                actual: self.values.len(),
            });
        }
        Ok(())
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Decode a whole row into a Rust value.
///
/// Scalars read a single-column row; tuples read one column per element.
/// The row width must match exactly.
pub trait FromRow: Sized {
    /// Decode the row.
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

macro_rules! impl_from_row_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: &Row) -> Result<Self> {
                    row.expect_width(1)?;
                    Ok(row.get(0)?)
                }
            }
        )*
    };
}

impl_from_row_scalar!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    Bytes,
    Vec<u8>,
    DateTime<Utc>,
    Value,
);

impl<T: FromValue> FromRow for Option<T> {
    fn from_row(row: &Row) -> Result<Self> {
        row.expect_width(1)?;
        let value = row.get_raw(0).unwrap_or(&Value::Null);
        Ok(T::from_value_nullable(value)?)
    }
}

macro_rules! impl_from_row_tuple {
    ($width:expr; $($name:ident: $idx:tt),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: &Row) -> Result<Self> {
                row.expect_width($width)?;
                Ok(($(row.get::<$name>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1; A: 0);
impl_from_row_tuple!(2; A: 0, B: 1);
impl_from_row_tuple!(3; A: 0, B: 1, C: 2);
impl_from_row_tuple!(4; A: 0, B: 1, C: 2, D: 3);
impl_from_row_tuple!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_from_row_tuple!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// Encode a Rust value as one row for a batch insert.
pub trait ToRow {
    /// Produce the row values in column order.
    fn to_row(&self) -> Vec<Value>;
}

impl ToRow for Vec<Value> {
    fn to_row(&self) -> Vec<Value> {
        self.clone()
    }
}

impl ToRow for [Value] {
    fn to_row(&self) -> Vec<Value> {
        self.to_vec()
    }
}

impl<const N: usize> ToRow for [Value; N] {
    fn to_row(&self) -> Vec<Value> {
        self.to_vec()
    }
}

impl<R: ToRow + ?Sized> ToRow for &R {
    fn to_row(&self) -> Vec<Value> {
        (**self).to_row()
    }
}

macro_rules! impl_to_row_tuple {
    ($($name:ident: $idx:tt),+) => {
        impl<$($name: ToValue),+> ToRow for ($($name,)+) {
            fn to_row(&self) -> Vec<Value> {
                vec![$(self.$idx.to_value()),+]
            }
        }
    };
}

impl_to_row_tuple!(A: 0);
impl_to_row_tuple!(A: 0, B: 1);
impl_to_row_tuple!(A: 0, B: 1, C: 2);
impl_to_row_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_to_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_to_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_to_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_to_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
