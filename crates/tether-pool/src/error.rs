//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while acquiring a lease.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// No lease became available within the acquisition timeout.
    #[error("connection pool exhausted: no connection available within {timeout:?} (max_open {max_open})")]
    Exhausted {
        /// How long the caller waited.
        timeout: Duration,
        /// Configured maximum number of open connections.
        max_open: u32,
    },

    /// Dialing a new connection did not finish in time.
    #[error("timed out after {timeout:?} establishing a new connection")]
    ConnectTimeout {
        /// The dial timeout.
        timeout: Duration,
    },

    /// Establishing a new connection failed.
    #[error("failed to establish connection: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if retrying the acquisition later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Exhausted { .. } | Self::ConnectTimeout { .. } | Self::Connect(_)
        )
    }
}
