//! Client facade.

use std::fmt;
use std::sync::Arc;

use tether_pool::{Pool, PoolMetrics, PoolStatus};
use tracing::Instrument;

use crate::batch::Batch;
use crate::config::Config;
use crate::connection::Connector;
use crate::dialer::Dialer;
use crate::error::Result;
use crate::instrumentation::span_names;
use crate::query::QueryRow;
use crate::rows::Rows;
use crate::session::Session;

/// Entry point for applications.
///
/// Offers stateless pooled operations, where each call may land on a
/// different physical connection, and [`acquire_session`](Self::acquire_session)
/// for work that depends on connection state. Cloning is cheap and shares
/// the pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    pool: Pool<Dialer>,
}

impl Client {
    /// Create a client over the given connector.
    ///
    /// Connections are dialed lazily on first use.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = Config::from_connection_string(
    ///     "Host=127.0.0.1:9000;Database=default;User=default;Max Open Conns=5;",
    /// )?;
    /// let client = Client::open(config, connector).await?;
    /// ```
    pub async fn open<C: Connector>(config: Config, connector: C) -> Result<Self> {
        config.validate()?;

        let dialer = Dialer::new(Arc::new(connector), config.clone());
        let pool = Pool::new(dialer, config.pool_config()).await?;

        tracing::info!(
            addresses = ?config.addresses,
            database = %config.database,
            "client opened"
        );

        Ok(Self {
            inner: Arc::new(ClientInner { config, pool }),
        })
    }

    /// Check out a connection and pin it in a new session.
    ///
    /// Waits up to the dial timeout when the pool is at `max_open_conns`,
    /// then fails with [`Error::PoolExhausted`](crate::Error::PoolExhausted).
    pub async fn acquire_session(&self) -> Result<Session> {
        self.checkout(false).await
    }

    async fn checkout(&self, ephemeral: bool) -> Result<Session> {
        let span = tracing::debug_span!(span_names::ACQUIRE, ephemeral);
        let lease = self.inner.pool.get().instrument(span).await?;
        let session = Session::new(lease, &self.inner.config);
        tracing::debug!(
            session_id = %session.id(),
            connection_id = session.connection_id(),
            ephemeral,
            "session acquired"
        );
        Ok(session)
    }

    /// Execute a statement on any pooled connection.
    pub async fn exec(&self, sql: &str) -> Result<()> {
        self.checkout(true).await?.exec(sql).await
    }

    /// Open a cursor on any pooled connection.
    ///
    /// The connection stays leased until the cursor finishes.
    pub async fn query(&self, sql: &str) -> Result<Rows> {
        let session = self.checkout(true).await?;
        session.query(sql).await
    }

    /// Prepare a single-row query on any pooled connection.
    pub fn query_row(&self, sql: &str) -> QueryRow<'_> {
        QueryRow::client(self, sql)
    }

    /// Ping any pooled connection.
    pub async fn ping(&self) -> Result<()> {
        self.checkout(true).await?.ping().await
    }

    /// Prepare a batch on a pooled connection.
    ///
    /// The connection stays leased until the batch is dropped.
    pub async fn prepare_batch(&self, sql: &str) -> Result<Batch> {
        let session = self.checkout(true).await?;
        let batch = session.prepare_batch(sql).await?;
        Ok(batch.owned_by(session))
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.pool.metrics()
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Close the client.
    ///
    /// New acquisitions fail with [`Error::PoolClosed`](crate::Error::PoolClosed);
    /// open sessions keep working and their connections are closed on release.
    pub fn close(&self) {
        self.inner.pool.close();
    }

    /// Check if the client is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("addresses", &self.inner.config.addresses)
            .field("database", &self.inner.config.database)
            .field("status", &self.status())
            .finish()
    }
}
