//! # tether-types
//!
//! Value model shared by the tether pool, client and test server.
//!
//! Statements and result rows cross the physical-connection boundary as
//! [`Value`]s. Applications convert to and from Rust types through the
//! [`ToValue`] and [`FromValue`] traits, and insert descriptors carry a
//! [`ColumnType`] per column so that rows can be shape-checked before they
//! are sent.
//!
//! ## Example
//!
//! ```
//! use tether_types::{ColumnType, FromValue, ToValue, Value};
//!
//! let value = 42u32.to_value();
//! assert_eq!(value, Value::UInt(42));
//! assert!(ColumnType::UInt32.accepts(&value));
//! assert_eq!(u8::from_value(&value).unwrap(), 42);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod column;
pub mod error;
pub mod from_value;
pub mod to_value;
pub mod value;

pub use column::{Column, ColumnType};
pub use error::TypeError;
pub use from_value::FromValue;
pub use to_value::ToValue;
pub use value::Value;
