//! Pool lifecycle hooks for physical connections.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tether_pool::{ConnectionLifecycle, HealthCheckResult};

use crate::config::{Config, OpenStrategy};
use crate::connection::{Connection, ConnectionError, Connector};
use crate::statement::set_statement;

/// Opens, probes and resets connections on behalf of the pool.
pub struct Dialer {
    connector: Arc<dyn Connector>,
    config: Config,
    next_address: AtomicUsize,
}

impl Dialer {
    /// Create a dialer for the configured addresses.
    pub fn new(connector: Arc<dyn Connector>, config: Config) -> Self {
        Self {
            connector,
            config,
            next_address: AtomicUsize::new(0),
        }
    }

    /// Index of the address the next dial starts with.
    fn start_index(&self) -> usize {
        match self.config.open_strategy {
            OpenStrategy::InOrder => 0,
            OpenStrategy::RoundRobin => {
                self.next_address.fetch_add(1, Ordering::Relaxed) % self.config.addresses.len()
            }
        }
    }

    async fn apply_settings(&self, conn: &mut dyn Connection) -> Result<(), ConnectionError> {
        for (name, value) in &self.config.settings {
            conn.exec(&set_statement(name, value)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionLifecycle for Dialer {
    type Connection = Box<dyn Connection>;
    type Error = ConnectionError;

    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let addresses = &self.config.addresses;
        if addresses.is_empty() {
            return Err(ConnectionError::NoAddresses);
        }

        let start = self.start_index();
        let mut last_error = None;

        for addr in addresses.iter().cycle().skip(start).take(addresses.len()) {
            tracing::debug!(address = %addr, "dialing");
            let mut conn = match self.connector.connect(addr, &self.config).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(address = %addr, error = %e, "dial failed");
                    last_error = Some(e);
                    continue;
                }
            };

            match self.apply_settings(conn.as_mut()).await {
                Ok(()) => {
                    tracing::debug!(address = %addr, "connection established");
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(address = %addr, error = %e, "applying settings failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ConnectionError::NoAddresses))
    }

    async fn health_check(&self, conn: &mut Box<dyn Connection>) -> HealthCheckResult {
        match conn.ping().await {
            Ok(()) => HealthCheckResult::Healthy,
            Err(e) => HealthCheckResult::Unhealthy(e.to_string()),
        }
    }

    fn has_broken(&self, conn: &Box<dyn Connection>) -> bool {
        conn.is_broken()
    }

    fn can_reset(&self, conn: &Box<dyn Connection>) -> bool {
        conn.supports_reset()
    }

    async fn reset(&self, conn: &mut Box<dyn Connection>) -> Result<(), ConnectionError> {
        conn.reset().await?;
        self.apply_settings(conn.as_mut()).await
    }
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("addresses", &self.config.addresses)
            .field("open_strategy", &self.config.open_strategy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use recording::Recorder;

    /// Minimal connection that records executed statements.
    mod recording {
        use std::sync::Arc;

        use async_trait::async_trait;
        use parking_lot::Mutex;
        use tether_types::{Column, Value};

        use crate::config::Config;
        use crate::connection::{Connection, ConnectionError, Connector};
        use crate::statement::InsertStatement;

        #[derive(Debug, Default, Clone)]
        pub struct Recorder {
            pub dials: Arc<Mutex<Vec<String>>>,
            pub statements: Arc<Mutex<Vec<String>>>,
            pub refuse: Vec<String>,
        }

        #[derive(Debug)]
        struct RecordingConnection {
            statements: Arc<Mutex<Vec<String>>>,
        }

        #[async_trait]
        impl Connection for RecordingConnection {
            async fn exec(&mut self, sql: &str) -> Result<(), ConnectionError> {
                self.statements.lock().push(sql.to_string());
                Ok(())
            }
            async fn query(&mut self, _sql: &str) -> Result<Vec<Column>, ConnectionError> {
                Ok(Vec::new())
            }
            async fn next_row(&mut self) -> Result<Option<Vec<Value>>, ConnectionError> {
                Ok(None)
            }
            async fn ping(&mut self) -> Result<(), ConnectionError> {
                Err(ConnectionError::Closed)
            }
            async fn describe_insert(
                &mut self,
                _statement: &InsertStatement,
            ) -> Result<Vec<Column>, ConnectionError> {
                Ok(Vec::new())
            }
            async fn send_batch(
                &mut self,
                _statement: &InsertStatement,
                rows: Vec<Vec<Value>>,
            ) -> Result<u64, ConnectionError> {
                Ok(rows.len() as u64)
            }
            fn is_broken(&self) -> bool {
                false
            }
            fn supports_reset(&self) -> bool {
                true
            }
            async fn reset(&mut self) -> Result<(), ConnectionError> {
                self.statements.lock().push("RESET".to_string());
                Ok(())
            }
        }

        #[async_trait]
        impl Connector for Recorder {
            async fn connect(
                &self,
                addr: &str,
                _config: &Config,
            ) -> Result<Box<dyn Connection>, ConnectionError> {
                self.dials.lock().push(addr.to_string());
                if self.refuse.iter().any(|r| r == addr) {
                    return Err(ConnectionError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "refused",
                    )));
                }
                Ok(Box::new(RecordingConnection {
                    statements: Arc::clone(&self.statements),
                }))
            }
        }
    }

    fn config(strategy: OpenStrategy) -> Config {
        Config::new()
            .addresses(["a:9000", "b:9000", "c:9000"])
            .open_strategy(strategy)
            .setting("max_execution_time", 60)
    }

    #[tokio::test]
    async fn test_in_order_falls_through() {
        let recorder = Recorder {
            refuse: vec!["a:9000".to_string()],
            ..Recorder::default()
        };
        let dialer = Dialer::new(Arc::new(recorder.clone()), config(OpenStrategy::InOrder));

        dialer.connect().await.unwrap();
        dialer.connect().await.unwrap();

        let dials = recorder.dials.lock().clone();
        assert_eq!(dials, ["a:9000", "b:9000", "a:9000", "b:9000"]);
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let recorder = Recorder::default();
        let dialer = Dialer::new(Arc::new(recorder.clone()), config(OpenStrategy::RoundRobin));

        for _ in 0..4 {
            dialer.connect().await.unwrap();
        }

        let dials = recorder.dials.lock().clone();
        assert_eq!(dials, ["a:9000", "b:9000", "c:9000", "a:9000"]);
    }

    #[tokio::test]
    async fn test_all_refused_surfaces_last_error() {
        let recorder = Recorder {
            refuse: vec!["a:9000".into(), "b:9000".into(), "c:9000".into()],
            ..Recorder::default()
        };
        let dialer = Dialer::new(Arc::new(recorder), config(OpenStrategy::InOrder));

        let err = dialer.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)));
    }

    #[tokio::test]
    async fn test_settings_applied_on_connect_and_reset() {
        let recorder = Recorder::default();
        let dialer = Dialer::new(Arc::new(recorder.clone()), config(OpenStrategy::InOrder));

        let mut conn = dialer.connect().await.unwrap();
        assert!(dialer.can_reset(&conn));
        dialer.reset(&mut conn).await.unwrap();

        let statements = recorder.statements.lock().clone();
        assert_eq!(
            statements,
            [
                "SET max_execution_time = 60",
                "RESET",
                "SET max_execution_time = 60"
            ]
        );
    }

    #[tokio::test]
    async fn test_health_check_maps_ping() {
        let dialer = Dialer::new(Arc::new(Recorder::default()), config(OpenStrategy::InOrder));
        let mut conn = dialer.connect().await.unwrap();
        assert!(!dialer.health_check(&mut conn).await.is_healthy());
        assert!(!dialer.has_broken(&conn));
    }
}
