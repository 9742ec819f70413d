//! Client error types.

use std::time::Duration;

use tether_pool::PoolError;
use tether_types::TypeError;
use thiserror::Error;

use crate::connection::ConnectionError;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The session was closed before the operation was issued.
    #[error("session is closed")]
    SessionClosed,

    /// No connection became available within the acquisition timeout.
    #[error("connection pool exhausted after waiting {timeout:?}")]
    PoolExhausted {
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The client and its pool have been closed.
    #[error("client is closed")]
    PoolClosed,

    /// The physical connection reported a failure.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A result cursor on this session has not been closed yet.
    #[error("a result cursor is still open on this session")]
    CursorStillOpen,

    /// Another operation is in flight on this session.
    #[error("another operation is in progress on this session")]
    SessionBusy,

    /// The number of values does not match the number of columns.
    #[error("column count mismatch: expected {expected}, got {actual}")]
    ColumnMismatch {
        /// Number of columns.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// A value does not fit the type of its column.
    #[error("column '{column}' expects {expected}, got {actual}")]
    ColumnType {
        /// Column name.
        column: String,
        /// Declared column type.
        expected: String,
        /// Kind of the supplied value.
        actual: String,
    },

    /// The batch has already been sent.
    #[error("batch has already been sent")]
    BatchAlreadySent,

    /// The query returned no rows.
    #[error("query returned no rows")]
    NoRows,

    /// The statement could not be interpreted.
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// Value conversion failed.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Pool error not covered by a more specific variant.
    #[error("pool error: {0}")]
    Pool(PoolError),
}

impl Error {
    /// Check if this error leaves the session unusable.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::SessionClosed => true,
            Self::Connection(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Check if this error is a caller mistake rather than a runtime failure.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::CursorStillOpen
                | Self::SessionBusy
                | Self::ColumnMismatch { .. }
                | Self::ColumnType { .. }
                | Self::BatchAlreadySent
                | Self::InvalidStatement(_)
        )
    }

    /// Check if retrying with a fresh session may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } | Self::SessionClosed => true,
            Self::Connection(e) => e.is_fatal(),
            Self::Pool(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::PoolClosed => Self::PoolClosed,
            PoolError::Exhausted { timeout, .. } => Self::PoolExhausted { timeout },
            PoolError::ConnectTimeout { timeout } => {
                Self::Connection(ConnectionError::Timeout { after: timeout })
            }
            PoolError::Configuration(msg) => Self::Config(msg),
            PoolError::Connect(source) => match source.downcast::<ConnectionError>() {
                Ok(e) => Self::Connection(*e),
                Err(other) => Self::Pool(PoolError::Connect(other)),
            },
            other => Self::Pool(other),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
