//! Physical connection boundary.
//!
//! The client never speaks a wire protocol itself. A [`Connector`] dials
//! addresses and hands back [`Connection`]s, each one a single network link
//! that executes statements one at a time and streams result rows.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tether_types::{Column, Value};
use thiserror::Error;

use crate::config::Config;
use crate::statement::InsertStatement;

/// Errors reported by a physical connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Transport I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected the statement.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// The connection was closed by the peer.
    #[error("connection closed")]
    Closed,

    /// The peer sent something the client did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation did not complete in time.
    #[error("operation timed out after {after:?}")]
    Timeout {
        /// The deadline that elapsed.
        after: Duration,
    },

    /// No server address is configured.
    #[error("no server addresses configured")]
    NoAddresses,
}

impl ConnectionError {
    /// Check if the connection must be discarded after this error.
    ///
    /// Server-reported statement errors leave the link usable; everything
    /// else leaves it in an unknown protocol state.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Server { .. })
    }

    /// Create a server error.
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }
}

/// One network-level link to the server.
///
/// Operations are strictly sequential: after [`query`](Self::query) the
/// caller must read rows with [`next_row`](Self::next_row) until it returns
/// `None` before issuing anything else.
#[async_trait]
pub trait Connection: Send + fmt::Debug {
    /// Execute a statement that returns no rows.
    async fn exec(&mut self, sql: &str) -> Result<(), ConnectionError>;

    /// Start a query and return its column descriptors.
    async fn query(&mut self, sql: &str) -> Result<Vec<Column>, ConnectionError>;

    /// Read the next row of the current result, `None` at the end.
    async fn next_row(&mut self) -> Result<Option<Vec<Value>>, ConnectionError>;

    /// Liveness probe; must not touch session state.
    async fn ping(&mut self) -> Result<(), ConnectionError>;

    /// Resolve the target columns of an insert.
    async fn describe_insert(
        &mut self,
        statement: &InsertStatement,
    ) -> Result<Vec<Column>, ConnectionError>;

    /// Transmit buffered rows as one bulk insert, returning rows written.
    async fn send_batch(
        &mut self,
        statement: &InsertStatement,
        rows: Vec<Vec<Value>>,
    ) -> Result<u64, ConnectionError>;

    /// Whether the transport has failed.
    fn is_broken(&self) -> bool;

    /// Whether [`reset`](Self::reset) can clear session state.
    fn supports_reset(&self) -> bool {
        false
    }

    /// Clear role, settings and temporary objects left by the last holder.
    async fn reset(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// Dials physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `addr` and authenticate with `config`.
    async fn connect(
        &self,
        addr: &str,
        config: &Config,
    ) -> Result<Box<dyn Connection>, ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!ConnectionError::server(62, "syntax error").is_fatal());
        assert!(ConnectionError::Closed.is_fatal());
        assert!(ConnectionError::Protocol("unexpected packet".into()).is_fatal());
        assert!(
            ConnectionError::Timeout {
                after: Duration::from_secs(1)
            }
            .is_fatal()
        );
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(ConnectionError::from(io).is_fatal());
    }
}
