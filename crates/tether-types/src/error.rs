//! Type conversion errors.

use thiserror::Error;

/// Errors that can occur while converting between Rust types and [`Value`](crate::Value)s.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TypeError {
    /// The value has a different type than the one requested.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type.
        expected: &'static str,
        /// Actual type or description of the value.
        actual: String,
    },

    /// The value does not fit into the requested integer width.
    #[error("value {value} out of range for {target}")]
    OutOfRange {
        /// Target Rust type.
        target: &'static str,
        /// The offending value, rendered as text.
        value: String,
    },

    /// NULL was found where a non-nullable type was requested.
    #[error("unexpected NULL value")]
    UnexpectedNull,

    /// A column type name could not be parsed.
    #[error("unknown column type: {0}")]
    UnknownColumnType(String),
}
