//! # tether-testing
//!
//! In-memory mock server for exercising the tether client without a real
//! database.
//!
//! [`MockServer`] keeps shared tables plus per-connection role, settings and
//! temporary tables, so tests can observe which physical connection a
//! statement ran on. Faults (refused addresses, dropped links, latency) are
//! injected through the server handle.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_client::{Client, Config};
//! use tether_testing::MockServer;
//!
//! let server = MockServer::new();
//! server.add_role("analyst");
//!
//! let client = Client::open(Config::new(), server.connector()).await?;
//! let session = client.acquire_session().await?;
//! session.exec("SET ROLE analyst").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod logging;
pub mod server;
mod sql;

pub use connection::{MockConnection, MockConnector};
pub use logging::init_tracing;
pub use server::{DEFAULT_ROLE, MockServer, ServerStats};
pub use sql::codes;
