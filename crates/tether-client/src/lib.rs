//! # tether-client
//!
//! Async database client with connection-pinned sessions.
//!
//! A [`Client`] owns a bounded pool of physical connections. Stateless work
//! goes through the pooled calls ([`Client::exec`], [`Client::query`] and
//! friends), each of which may run on any connection. Work that depends on
//! connection state (roles, `SET` statements, temporary tables) goes through
//! a [`Session`], which pins one physical connection until it is closed.
//!
//! ## Features
//!
//! - **Pinned sessions**: every session operation hits the same connection
//! - **Bounded pool**: blocking checkout with a timeout, idle and lifetime limits
//! - **Dirty tracking**: connections touched by a session are reset before reuse
//! - **Batches**: client-side row buffering flushed as one bulk insert
//! - **Pluggable transport**: bring your own [`Connector`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_client::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_connection_string(
//!         "Host=127.0.0.1:9000;Database=default;User=default;Max Open Conns=5;",
//!     )?;
//!     let client = Client::open(config, connector).await?;
//!
//!     let session = client.acquire_session().await?;
//!     session.exec("SET ROLE analyst").await?;
//!     let role: String = session.query_row("SELECT currentRole()").scan().await?;
//!     println!("role: {role}");
//!     session.close()?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod batch;
pub mod client;
pub mod config;
pub mod connection;
pub mod dialer;
pub mod error;
pub mod instrumentation;
pub mod query;
pub mod row;
pub mod rows;
pub mod session;
pub mod state;
pub mod statement;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use batch::Batch;
pub use client::Client;
pub use config::{Config, OpenStrategy};
pub use connection::{Connection, ConnectionError, Connector};
pub use error::{Error, Result};
pub use instrumentation::SanitizationConfig;
pub use query::QueryRow;
pub use row::{FromRow, Row, ToRow};
pub use rows::Rows;
pub use session::Session;
pub use state::SessionState;
pub use statement::InsertStatement;
pub use tether_pool::{PoolMetrics, PoolStatus};
pub use tether_types::{Column, ColumnType, FromValue, ToValue, TypeError, Value};
