//! Shared fixtures for the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::time::Duration;

use tether_client::{Client, Config, Error, Session};
use tether_testing::MockServer;

/// A server with the roles the scenarios switch between.
pub fn server() -> MockServer {
    tether_testing::init_tracing();
    let server = MockServer::new();
    server.add_role("analyst");
    server.add_role("admin");
    server
}

/// A small pool with a short acquire timeout.
pub fn config() -> Config {
    Config::new()
        .max_open_conns(2)
        .max_idle_conns(2)
        .dial_timeout(Duration::from_millis(200))
}

pub async fn client(server: &MockServer, config: Config) -> Client {
    Client::open(config, server.connector()).await.unwrap()
}

pub async fn current_role(session: &Session) -> String {
    session.query_row("SELECT currentRole()").scan().await.unwrap()
}

pub async fn setting(session: &Session, name: &str) -> String {
    session
        .query_row(&format!("SELECT getSetting('{name}')"))
        .scan()
        .await
        .unwrap()
}

/// Server error code carried by a client error, if any.
pub fn server_code(err: &Error) -> Option<i32> {
    match err {
        Error::Connection(tether_client::ConnectionError::Server { code, .. }) => Some(*code),
        _ => None,
    }
}
