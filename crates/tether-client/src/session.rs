//! Connection-pinned sessions.
//!
//! A [`Session`] owns one pool lease for its whole lifetime. Every operation
//! goes to that same physical connection, so role changes, `SET` statements
//! and temporary tables stay visible to later operations on the session and
//! invisible to everyone else.
//!
//! A session is meant to be driven by one caller at a time. Operations take
//! `&self`, but the connection is only ever claimed with a non-blocking lock:
//! a second operation issued while one is in flight fails with
//! [`Error::SessionBusy`] (or [`Error::CursorStillOpen`] while a cursor holds
//! the connection) instead of being queued behind it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tether_pool::Lease;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;
use uuid::Uuid;

use crate::batch::Batch;
use crate::config::Config;
use crate::connection::{Connection, ConnectionError};
use crate::dialer::Dialer;
use crate::error::{Error, Result};
use crate::instrumentation::{SanitizationConfig, extract_operation, span_names};
use crate::query::QueryRow;
use crate::rows::Rows;
use crate::state::{SessionState, StateCell};
use crate::statement::InsertStatement;

/// A pooled physical connection.
pub(crate) type PooledConnection = Lease<Dialer>;

/// A logical handle bound to exactly one physical connection.
///
/// Created by [`Client::acquire_session`](crate::Client::acquire_session).
/// Closing the session, or dropping it, returns the connection to the pool;
/// a connection left in an unknown protocol state is discarded instead.
///
/// # Example
///
/// ```rust,ignore
/// let session = client.acquire_session().await?;
/// session.exec("SET ROLE analyst").await?;
/// let role: String = session.query_row("SELECT currentRole()").scan().await?;
/// assert_eq!(role, "analyst");
/// session.close()?;
/// ```
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    id: Uuid,
    connection_id: u64,
    state: StateCell,
    slot: Arc<Mutex<Option<PooledConnection>>>,
    cursor_open: AtomicBool,
    command_timeout: Option<Duration>,
    sanitization: SanitizationConfig,
}

impl Session {
    pub(crate) fn new(lease: PooledConnection, config: &Config) -> Self {
        let inner = SessionInner {
            id: Uuid::new_v4(),
            connection_id: lease.metadata().id,
            state: StateCell::new(),
            slot: Arc::new(Mutex::new(Some(lease))),
            cursor_open: AtomicBool::new(false),
            command_timeout: config.command_timeout,
            sanitization: config.sanitization.clone(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Get the pool ID of the pinned connection.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.inner.connection_id
    }

    /// Get the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Check if the session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    /// Execute a statement that returns no rows.
    pub async fn exec(&self, sql: &str) -> Result<()> {
        let mut guard = self.inner.begin(true)?;
        let span = tracing::debug_span!(
            span_names::EXEC,
            session_id = %self.inner.id,
            connection_id = self.inner.connection_id,
            db.operation = extract_operation(sql),
            db.statement = %self.inner.sanitization.sanitize(sql)
        );

        async {
            tracing::debug!("executing statement");
            let timeout = self.inner.command_timeout;
            let result = match guard.begin_io() {
                Ok(conn) => deadline(timeout, conn.exec(sql)).await,
                Err(e) => Err(e),
            };
            guard.settle(result)
        }
        .instrument(span)
        .await
    }

    /// Open a result cursor.
    ///
    /// The cursor holds the connection until it is exhausted or closed;
    /// until then every other operation on the session fails with
    /// [`Error::CursorStillOpen`].
    pub async fn query(&self, sql: &str) -> Result<Rows> {
        let mut guard = self.inner.begin(true)?;
        let span = tracing::debug_span!(
            span_names::QUERY,
            session_id = %self.inner.id,
            connection_id = self.inner.connection_id,
            db.operation = extract_operation(sql),
            db.statement = %self.inner.sanitization.sanitize(sql)
        );

        let columns = async {
            tracing::debug!("opening cursor");
            let timeout = self.inner.command_timeout;
            let result = match guard.begin_io() {
                Ok(conn) => deadline(timeout, conn.query(sql)).await,
                Err(e) => Err(e),
            };
            guard.settle(result)
        }
        .instrument(span.clone())
        .await?;

        Ok(Rows::new(guard, columns, span))
    }

    /// Prepare a single-row query.
    ///
    /// Nothing is sent until [`QueryRow::scan`] or [`QueryRow::row`] is
    /// awaited.
    pub fn query_row(&self, sql: &str) -> QueryRow<'_> {
        QueryRow::session(self, sql)
    }

    /// Check that the pinned connection is alive.
    ///
    /// Does not touch server-side session state. Fails fast with
    /// [`Error::CursorStillOpen`] while a cursor is open.
    pub async fn ping(&self) -> Result<()> {
        let mut guard = self.inner.begin(false)?;
        let span = tracing::debug_span!(
            span_names::PING,
            session_id = %self.inner.id,
            connection_id = self.inner.connection_id
        );

        async {
            let timeout = self.inner.command_timeout;
            let result = match guard.begin_io() {
                Ok(conn) => deadline(timeout, conn.ping()).await,
                Err(e) => Err(e),
            };
            guard.settle(result)
        }
        .instrument(span)
        .await
    }

    /// Prepare a batch insert bound to this session's connection.
    ///
    /// `sql` is an `INSERT INTO table (columns...)` prefix; the connection
    /// resolves the column types so [`Batch::append`] can validate rows.
    pub async fn prepare_batch(&self, sql: &str) -> Result<Batch> {
        let mut guard = self.inner.begin(true)?;
        let statement = InsertStatement::parse(sql)?;
        let span = tracing::debug_span!(
            span_names::BATCH_PREPARE,
            session_id = %self.inner.id,
            connection_id = self.inner.connection_id,
            table = %statement.table()
        );

        let columns = async {
            let timeout = self.inner.command_timeout;
            let result = match guard.begin_io() {
                Ok(conn) => deadline(timeout, conn.describe_insert(&statement)).await,
                Err(e) => Err(e),
            };
            guard.settle(result)
        }
        .instrument(span)
        .await?;
        drop(guard);

        tracing::debug!(
            session_id = %self.inner.id,
            table = %statement.table(),
            columns = columns.len(),
            "batch prepared"
        );
        Ok(Batch::new(Arc::clone(&self.inner), statement, columns))
    }

    /// Close the session and release its connection.
    ///
    /// Idempotent: later calls return `Ok(())`. Every operation issued after
    /// the first call fails with [`Error::SessionClosed`]. If a cursor still
    /// holds the connection, the release happens when the cursor finishes.
    pub fn close(&self) -> Result<()> {
        if !self.inner.state.close() {
            return Ok(());
        }
        tracing::debug!(session_id = %self.inner.id, "closing session");

        if !self.inner.try_release() {
            tracing::trace!(
                session_id = %self.inner.id,
                "connection in use, release deferred"
            );
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("connection_id", &self.inner.connection_id)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl SessionInner {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub(crate) fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Claim the connection for one operation.
    ///
    /// The closed check comes first so a closed session always reports
    /// [`Error::SessionClosed`].
    pub(crate) fn begin(self: &Arc<Self>, mutates: bool) -> Result<ConnGuard> {
        if self.state.is_closed() {
            return Err(Error::SessionClosed);
        }

        let mut slot = match Arc::clone(&self.slot).try_lock_owned() {
            Ok(slot) => slot,
            Err(_) if self.cursor_open.load(Ordering::SeqCst) => {
                return Err(Error::CursorStillOpen);
            }
            Err(_) => return Err(Error::SessionBusy),
        };

        let Some(lease) = slot.as_mut() else {
            return Err(Error::SessionClosed);
        };
        if mutates {
            lease.mark_dirty();
        }

        Ok(ConnGuard {
            slot: Some(slot),
            session: Arc::clone(self),
            in_flight: false,
        })
    }

    pub(crate) fn set_cursor_open(&self, open: bool) {
        self.cursor_open.store(open, Ordering::SeqCst);
    }

    /// Take the lease out of an unlocked slot and release it.
    ///
    /// Returns `false` if the slot is held by an operation or cursor, whose
    /// guard then releases the lease when it drops.
    fn try_release(&self) -> bool {
        let Ok(mut slot) = self.slot.try_lock() else {
            return false;
        };
        if let Some(lease) = slot.take() {
            self.release(lease);
        }
        true
    }

    fn release(&self, lease: PooledConnection) {
        tracing::debug!(
            session_id = %self.id,
            connection_id = self.connection_id,
            broken = lease.is_broken(),
            "releasing connection"
        );
        drop(lease);
    }
}

/// Exclusive claim on a session's connection for one operation or cursor.
///
/// Dropping the guard while an I/O call is in flight (the caller cancelled
/// the operation) closes the session and discards the connection.
pub(crate) struct ConnGuard {
    /// Only taken in `Drop`.
    slot: Option<OwnedMutexGuard<Option<PooledConnection>>>,
    session: Arc<SessionInner>,
    in_flight: bool,
}

impl ConnGuard {
    pub(crate) fn session(&self) -> &Arc<SessionInner> {
        &self.session
    }

    fn lease(&self) -> Option<&PooledConnection> {
        self.slot.as_ref().and_then(|slot| (**slot).as_ref())
    }

    fn lease_mut(&mut self) -> Option<&mut PooledConnection> {
        self.slot.as_mut().and_then(|slot| (**slot).as_mut())
    }

    /// Get the connection and mark an I/O call as started.
    pub(crate) fn begin_io(&mut self) -> std::result::Result<&mut PooledConnection, ConnectionError> {
        self.in_flight = true;
        self.lease_mut().ok_or(ConnectionError::Closed)
    }

    /// Finish an I/O call, closing the session if the connection broke.
    pub(crate) fn settle<T>(&mut self, result: std::result::Result<T, ConnectionError>) -> Result<T> {
        self.in_flight = false;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let transport_broken = self.lease().is_some_and(|lease| {
                    let conn: &dyn Connection = &***lease;
                    conn.is_broken()
                });
                if e.is_fatal() || transport_broken {
                    self.poison(&e.to_string());
                } else {
                    tracing::debug!(error = %e, "statement failed");
                }
                Err(Error::Connection(e))
            }
        }
    }

    /// Mark the connection broken and close the session.
    pub(crate) fn poison(&mut self, reason: &str) {
        if let Some(lease) = self.lease_mut() {
            lease.mark_broken();
        }
        if self.session.state.close() {
            tracing::warn!(
                session_id = %self.session.id,
                connection_id = self.session.connection_id,
                reason,
                "session closed as broken"
            );
        }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if self.in_flight {
            self.poison("operation cancelled");
        }
        let Some(mut slot) = self.slot.take() else {
            return;
        };
        if self.session.state.is_closed() {
            if let Some(lease) = slot.take() {
                self.session.release(lease);
            }
            return;
        }

        // A close() racing the unlock may have found the slot held and
        // deferred to us; check again once it is free.
        drop(slot);
        if self.session.state.is_closed() {
            self.session.try_release();
        }
    }
}

/// Run an I/O future under an optional deadline.
pub(crate) async fn deadline<T, F>(
    timeout: Option<Duration>,
    fut: F,
) -> std::result::Result<T, ConnectionError>
where
    F: Future<Output = std::result::Result<T, ConnectionError>>,
{
    match timeout {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .unwrap_or(Err(ConnectionError::Timeout { after })),
        None => fut.await,
    }
}
