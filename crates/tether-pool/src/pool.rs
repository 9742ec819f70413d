//! Connection pool implementation.
//!
//! The pool keeps idle connections in a table guarded by a mutex and limits
//! the number of open connections with a semaphore. Every [`Lease`] owns
//! one permit, so a caller that finds the pool at `max_open` waits until a
//! lease is returned or the acquisition timeout elapses.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionLifecycle, ConnectionMetadata, HealthCheckResult};

/// A connection pool.
///
/// Cloning is cheap and yields another handle to the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use tether_pool::{Pool, PoolConfig};
///
/// let pool = Pool::new(manager, PoolConfig::new().max_open(5)).await?;
/// let lease = pool.get().await?;
/// // Use connection...
/// ```
pub struct Pool<M: ConnectionLifecycle> {
    inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: ConnectionLifecycle> {
    /// Pool configuration.
    config: PoolConfig,

    /// Lifecycle hooks.
    manager: M,

    /// Idle connections, most recently used at the back.
    idle: Mutex<VecDeque<IdleConnection<M::Connection>>>,

    /// One permit per connection that may be leased.
    semaphore: Arc<Semaphore>,

    /// Open connections, idle and leased.
    open: AtomicU32,

    /// Leased connections.
    in_use: AtomicU32,

    /// Whether the pool is closed.
    closed: AtomicBool,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

/// Outcome of preparing an idle connection for checkout.
enum Checkout {
    Ready,
    /// Discard the candidate and try the next one.
    Rejected,
    /// The acquire deadline passed.
    TimedOut,
}

struct IdleConnection<C> {
    conn: C,
    metadata: ConnectionMetadata,
    dirty: bool,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total connections created.
    connections_created: u64,
    /// Total connections closed.
    connections_closed: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts (timeouts, errors).
    checkouts_failed: u64,
    /// Total health checks performed.
    health_checks_performed: u64,
    /// Total health check failures.
    health_checks_failed: u64,
    /// Total resets performed.
    resets_performed: u64,
    /// Total reset failures.
    resets_failed: u64,
}

impl<M: ConnectionLifecycle> Pool<M> {
    /// Create a new pool builder around the given lifecycle hooks.
    #[must_use]
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder::new(manager)
    }

    /// Create a new pool with the given configuration.
    ///
    /// Connections are opened lazily. When `reap_interval` is set a
    /// background task evicts expired idle connections; it stops once the
    /// pool is closed or dropped.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_open as usize)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_idle as usize)),
            config,
            manager,
            open: AtomicU32::new(0),
            in_use: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        if let Some(period) = inner.config.reap_interval {
            spawn_reaper(&inner, period);
        }

        tracing::info!(
            max_open = inner.config.max_open,
            max_idle = inner.config.max_idle,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection when one is available, otherwise dials a
    /// new one if the pool is below `max_open`. At capacity this waits for a
    /// lease to be returned, up to `connection_timeout`.
    pub async fn get(&self) -> Result<Lease<M>, PoolError> {
        self.get_timeout(self.inner.config.connection_timeout).await
    }

    /// Get a connection, waiting at most `timeout` for a free lease.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<Lease<M>, PoolError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!("acquiring connection from pool");
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let permit = match tokio::time::timeout_at(
                deadline,
                Arc::clone(&inner.semaphore).acquire_owned(),
            )
            .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    inner.metrics.lock().checkouts_failed += 1;
                    return Err(PoolError::PoolClosed);
                }
                Err(_) => {
                    inner.metrics.lock().checkouts_failed += 1;
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        max_open = inner.config.max_open,
                        "connection pool exhausted"
                    );
                    return Err(PoolError::Exhausted {
                        timeout,
                        max_open: inner.config.max_open,
                    });
                }
            };

            let Some(entry) = inner.pop_idle() else {
                return self.open_connection(permit, deadline, timeout).await;
            };

            let mut lease = Lease::new(entry.conn, entry.metadata, permit, Arc::clone(inner));
            lease.dirty = entry.dirty;
            match inner.prepare(&mut lease, deadline).await {
                Checkout::Ready => {
                    inner.metrics.lock().checkouts_successful += 1;
                    tracing::trace!(connection_id = lease.metadata.id, "reusing idle connection");
                    return Ok(lease);
                }
                // Dropping the failed candidate discards it and frees its permit.
                Checkout::Rejected => {}
                Checkout::TimedOut => {
                    inner.metrics.lock().checkouts_failed += 1;
                    tracing::warn!(
                        connection_id = lease.metadata.id,
                        timeout_ms = timeout.as_millis() as u64,
                        "preparing idle connection timed out"
                    );
                    return Err(PoolError::ConnectTimeout { timeout });
                }
            }
        }
    }

    /// Dial a new connection within what is left of the acquire deadline.
    async fn open_connection(
        &self,
        permit: OwnedSemaphorePermit,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> Result<Lease<M>, PoolError> {
        let inner = &self.inner;

        let conn = match tokio::time::timeout_at(deadline, inner.manager.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                inner.metrics.lock().checkouts_failed += 1;
                tracing::warn!(error = %e, "failed to open connection");
                return Err(PoolError::Connect(Box::new(e)));
            }
            Err(_) => {
                inner.metrics.lock().checkouts_failed += 1;
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "dial timed out");
                return Err(PoolError::ConnectTimeout { timeout });
            }
        };

        let id = inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        inner.open.fetch_add(1, Ordering::AcqRel);
        {
            let mut metrics = inner.metrics.lock();
            metrics.connections_created += 1;
            metrics.checkouts_successful += 1;
        }
        tracing::debug!(connection_id = id, "opened new connection");

        Ok(Lease::new(conn, ConnectionMetadata::new(id), permit, Arc::clone(inner)))
    }

    /// Evict idle connections past their idle timeout or lifetime.
    ///
    /// Returns the number of connections closed. The background reaper
    /// calls this periodically.
    pub fn reap(&self) -> usize {
        self.inner.reap()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.inner.idle.lock().len() as u32,
            in_use: self.inner.in_use.load(Ordering::Acquire),
            open: self.inner.open.load(Ordering::Acquire),
            max_open: self.inner.config.max_open,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            health_checks_performed: inner.health_checks_performed,
            health_checks_failed: inner.health_checks_failed,
            resets_performed: inner.resets_performed,
            resets_failed: inner.resets_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Close the pool.
    ///
    /// Blocked acquisitions fail with [`PoolError::PoolClosed`], idle
    /// connections are dropped and outstanding leases are closed when they
    /// are returned.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();

        let idle: Vec<_> = self.inner.idle.lock().drain(..).collect();
        for entry in idle {
            self.inner.discard(entry.conn, &entry.metadata, "pool closed");
        }
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the lifecycle hooks.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

impl<M: ConnectionLifecycle> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionLifecycle> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M: ConnectionLifecycle> PoolInner<M> {
    /// Pop the most recently used idle connection, dropping expired ones.
    fn pop_idle(&self) -> Option<IdleConnection<M::Connection>> {
        loop {
            let entry = self.idle.lock().pop_back()?;
            if let Some(reason) = self.staleness(&entry.metadata) {
                self.discard(entry.conn, &entry.metadata, reason);
                continue;
            }
            return Some(entry);
        }
    }

    fn staleness(&self, metadata: &ConnectionMetadata) -> Option<&'static str> {
        if metadata.is_expired(self.config.max_lifetime) {
            Some("max lifetime reached")
        } else if metadata.is_idle_expired(self.config.idle_timeout) {
            Some("idle timeout reached")
        } else {
            None
        }
    }

    /// Reset and health-check an idle connection before handing it out.
    ///
    /// Both steps share the acquire deadline. On any failure the lease is
    /// left marked broken.
    async fn prepare(&self, lease: &mut Lease<M>, deadline: tokio::time::Instant) -> Checkout {
        let id = lease.metadata.id;
        let Some(conn) = lease.conn.as_mut() else {
            return Checkout::Rejected;
        };

        if lease.dirty {
            // Stays set if the reset is interrupted.
            lease.broken = true;
            self.metrics.lock().resets_performed += 1;
            match tokio::time::timeout_at(deadline, self.manager.reset(conn)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.metrics.lock().resets_failed += 1;
                    tracing::warn!(connection_id = id, error = %e, "connection reset failed");
                    return Checkout::Rejected;
                }
                Err(_) => {
                    self.metrics.lock().resets_failed += 1;
                    return Checkout::TimedOut;
                }
            }
            tracing::trace!(connection_id = id, "connection state reset");
            lease.broken = false;
            lease.dirty = false;
        }

        if self.config.test_on_checkout {
            self.metrics.lock().health_checks_performed += 1;
            let verdict = tokio::time::timeout_at(deadline, self.manager.health_check(conn)).await;
            match verdict {
                Ok(HealthCheckResult::Healthy) => {}
                Ok(HealthCheckResult::Unhealthy(reason)) => {
                    self.metrics.lock().health_checks_failed += 1;
                    tracing::warn!(connection_id = id, reason = %reason, "health check failed");
                    lease.broken = true;
                    return Checkout::Rejected;
                }
                Err(_) => {
                    self.metrics.lock().health_checks_failed += 1;
                    lease.broken = true;
                    return Checkout::TimedOut;
                }
            }
        }

        Checkout::Ready
    }

    /// Take a connection back from a lease.
    fn check_in(
        &self,
        conn: M::Connection,
        mut metadata: ConnectionMetadata,
        broken: bool,
        dirty: bool,
    ) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);

        let reason = if self.closed.load(Ordering::Acquire) {
            Some("pool closed")
        } else if broken || self.manager.has_broken(&conn) {
            Some("connection broken")
        } else if metadata.is_expired(self.config.max_lifetime) {
            Some("max lifetime reached")
        } else if dirty && !(self.config.reset_on_reuse && self.manager.can_reset(&conn)) {
            Some("session state cannot be reset")
        } else {
            None
        };
        if let Some(reason) = reason {
            self.discard(conn, &metadata, reason);
            return;
        }

        metadata.touch();
        let mut idle = self.idle.lock();
        if idle.len() >= self.config.max_idle as usize {
            drop(idle);
            self.discard(conn, &metadata, "idle pool full");
            return;
        }
        tracing::trace!(connection_id = metadata.id, dirty, "returning connection to pool");
        idle.push_back(IdleConnection {
            conn,
            metadata,
            dirty,
        });
    }

    fn discard(&self, conn: M::Connection, metadata: &ConnectionMetadata, reason: &'static str) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        self.metrics.lock().connections_closed += 1;
        if reason == "connection broken" {
            tracing::warn!(connection_id = metadata.id, "discarding broken connection");
        } else {
            tracing::debug!(connection_id = metadata.id, reason, "closing connection");
        }
        drop(conn);
    }

    fn reap(&self) -> usize {
        let expired: Vec<_> = {
            let mut idle = self.idle.lock();
            let mut kept = VecDeque::with_capacity(idle.len());
            let mut expired = Vec::new();
            for entry in idle.drain(..) {
                match self.staleness(&entry.metadata) {
                    Some(reason) => expired.push((entry, reason)),
                    None => kept.push_back(entry),
                }
            }
            *idle = kept;
            expired
        };

        let count = expired.len();
        for (entry, reason) in expired {
            self.discard(entry.conn, &entry.metadata, reason);
        }
        count
    }
}

fn spawn_reaper<M: ConnectionLifecycle>(inner: &Arc<PoolInner<M>>, period: Duration) {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.closed.load(Ordering::Acquire) {
                break;
            }
            let evicted = inner.reap();
            if evicted > 0 {
                tracing::debug!(evicted, "reaper evicted idle connections");
            }
        }
    });
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(manager)
///     .max_open(5)
///     .build()
///     .await?;
/// ```
pub struct PoolBuilder<M: ConnectionLifecycle> {
    manager: M,
    pool_config: PoolConfig,
}

impl<M: ConnectionLifecycle> PoolBuilder<M> {
    /// Create a new pool builder with default settings.
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the maximum number of open connections.
    #[must_use]
    pub fn max_open(mut self, count: u32) -> Self {
        self.pool_config.max_open = count;
        self
    }

    /// Set the maximum number of idle connections.
    #[must_use]
    pub fn max_idle(mut self, count: u32) -> Self {
        self.pool_config.max_idle = count;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.pool_config.max_lifetime = Some(lifetime);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.idle_timeout = Some(timeout);
        self
    }

    /// Set the acquisition and dial timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.connection_timeout = timeout;
        self
    }

    /// Enable or disable the health check on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.pool_config.test_on_checkout = enabled;
        self
    }

    /// Enable or disable resetting dirty connections before reuse.
    #[must_use]
    pub fn reset_on_reuse(mut self, enabled: bool) -> Self {
        self.pool_config.reset_on_reuse = enabled;
        self
    }

    /// Build the pool.
    pub async fn build(self) -> Result<Pool<M>, PoolError> {
        Pool::new(self.manager, self.pool_config).await
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub idle: u32,
    /// Number of connections currently leased.
    pub in_use: u32,
    /// Total number of open connections.
    pub open: u32,
    /// Maximum allowed open connections.
    pub max_open: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_open == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max_open as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.in_use >= self.max_open
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, pool closed, etc.).
    pub checkouts_failed: u64,
    /// Health checks performed.
    pub health_checks_performed: u64,
    /// Health checks that failed.
    pub health_checks_failed: u64,
    /// Connection resets performed.
    pub resets_performed: u64,
    /// Connection resets that failed.
    pub resets_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate health check success rate (0.0 to 1.0).
    #[must_use]
    pub fn health_check_success_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            return 1.0;
        }
        let successful = self.health_checks_performed - self.health_checks_failed;
        successful as f64 / self.health_checks_performed as f64
    }
}

/// Exclusive lease on a pooled connection.
///
/// While the lease is alive no other caller can obtain the connection.
/// Dropping it checks the connection back in; a lease marked broken, or
/// marked dirty when the connection cannot be reset, closes the connection
/// instead.
pub struct Lease<M: ConnectionLifecycle> {
    /// Only taken in `Drop`.
    conn: Option<M::Connection>,
    metadata: ConnectionMetadata,
    pool: Arc<PoolInner<M>>,
    broken: bool,
    dirty: bool,
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionLifecycle> Lease<M> {
    fn new(
        conn: M::Connection,
        mut metadata: ConnectionMetadata,
        permit: OwnedSemaphorePermit,
        pool: Arc<PoolInner<M>>,
    ) -> Self {
        pool.in_use.fetch_add(1, Ordering::AcqRel);
        metadata.checkouts += 1;
        metadata.touch();
        Self {
            conn: Some(conn),
            metadata,
            pool,
            broken: false,
            dirty: false,
            _permit: permit,
        }
    }

    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Flag the connection as unusable; it is closed on release.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Check if the lease has been flagged broken.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Flag the connection as carrying state from this holder.
    ///
    /// A dirty connection is reset before its next checkout, or closed on
    /// release if it cannot be reset.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Check if the lease has been flagged dirty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Return the connection to the pool.
    ///
    /// Equivalent to dropping the lease, with an explicit health verdict.
    pub fn release(mut self, healthy: bool) {
        if !healthy {
            self.broken = true;
        }
    }
}

#[allow(clippy::expect_used)]
impl<M: ConnectionLifecycle> Deref for Lease<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("lease connection is only taken on drop")
    }
}

#[allow(clippy::expect_used)]
impl<M: ConnectionLifecycle> DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("lease connection is only taken on drop")
    }
}

impl<M: ConnectionLifecycle> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool
                .check_in(conn, self.metadata.clone(), self.broken, self.dirty);
        }
    }
}

impl<M: ConnectionLifecycle> fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("connection_id", &self.metadata.id)
            .field("broken", &self.broken)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::{assert_pending, assert_ready_ok};

    #[derive(Debug)]
    struct TestConn {
        id: usize,
        broken: bool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("test connection error")]
    struct TestError;

    #[derive(Default)]
    struct TestManager {
        dialed: AtomicUsize,
        resets: AtomicUsize,
        can_reset: bool,
        reset_delay: Option<Duration>,
        refuse: AtomicBool,
        unhealthy: AtomicBool,
    }

    #[async_trait]
    impl ConnectionLifecycle for TestManager {
        type Connection = TestConn;
        type Error = TestError;

        async fn connect(&self) -> Result<TestConn, TestError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TestError);
            }
            let id = self.dialed.fetch_add(1, Ordering::SeqCst);
            Ok(TestConn { id, broken: false })
        }

        async fn health_check(&self, _conn: &mut TestConn) -> HealthCheckResult {
            if self.unhealthy.swap(false, Ordering::SeqCst) {
                HealthCheckResult::Unhealthy("probe failed".into())
            } else {
                HealthCheckResult::Healthy
            }
        }

        fn has_broken(&self, conn: &TestConn) -> bool {
            conn.broken
        }

        fn can_reset(&self, _conn: &TestConn) -> bool {
            self.can_reset
        }

        async fn reset(&self, _conn: &mut TestConn) -> Result<(), TestError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.reset_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }
    }

    fn config(max_open: u32) -> PoolConfig {
        PoolConfig::new()
            .max_open(max_open)
            .max_idle(max_open)
            .connection_timeout(Duration::from_millis(50))
            .reap_interval(None)
    }

    async fn pool(manager: TestManager, config: PoolConfig) -> Pool<TestManager> {
        Pool::new(manager, config).await.unwrap()
    }

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            idle: 5,
            in_use: 5,
            open: 10,
            max_open: 20,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            idle: 0,
            in_use: 10,
            open: 10,
            max_open: 10,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            idle: 5,
            in_use: 5,
            open: 10,
            max_open: 20,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            health_checks_performed: 100,
            health_checks_failed: 5,
            resets_performed: 80,
            resets_failed: 2,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.health_check_success_rate() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_fluent() {
        let builder = Pool::builder(TestManager::default())
            .max_open(50)
            .max_idle(5)
            .reset_on_reuse(false);

        assert_eq!(builder.pool_config.max_open, 50);
        assert_eq!(builder.pool_config.max_idle, 5);
        assert!(!builder.pool_config.reset_on_reuse);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = Pool::new(TestManager::default(), config(0)).await;
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let pool = pool(TestManager::default(), config(2)).await;

        let first = pool.get().await.unwrap();
        let first_id = first.metadata().id;
        drop(first);

        let second = pool.get().await.unwrap();
        assert_eq!(second.metadata().id, first_id);
        assert_eq!(second.metadata().checkouts, 2);
        assert_eq!(pool.manager().dialed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_leases_are_exclusive() {
        let pool = pool(TestManager::default(), config(2)).await;

        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(pool.status().in_use, 2);
        assert_eq!(pool.status().open, 2);
    }

    #[tokio::test]
    async fn test_exhausted_after_timeout() {
        let pool = pool(TestManager::default(), config(1)).await;
        let _held = pool.get().await.unwrap();

        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { max_open: 1, .. }));
        assert!(err.is_transient());
        assert_eq!(pool.metrics().checkouts_failed, 1);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let pool = pool(TestManager::default(), config(1)).await;
        let held = pool.get().await.unwrap();
        let held_id = held.metadata().id;

        let mut waiter = tokio_test::task::spawn(pool.get_timeout(Duration::from_secs(5)));
        assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let lease = assert_ready_ok!(waiter.poll());
        assert_eq!(lease.metadata().id, held_id);
    }

    #[tokio::test]
    async fn test_broken_connection_discarded() {
        let pool = pool(TestManager::default(), config(2)).await;

        let mut lease = pool.get().await.unwrap();
        lease.mark_broken();
        drop(lease);
        assert_eq!(pool.status().open, 0);
        assert_eq!(pool.status().idle, 0);

        let mut lease = pool.get().await.unwrap();
        lease.broken = false;
        lease.deref_mut().broken = true;
        drop(lease);
        assert_eq!(pool.status().open, 0);
        assert_eq!(pool.metrics().connections_closed, 2);
    }

    #[tokio::test]
    async fn test_release_unhealthy() {
        let pool = pool(TestManager::default(), config(1)).await;
        pool.get().await.unwrap().release(false);
        assert_eq!(pool.status().open, 0);
        pool.get().await.unwrap().release(true);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_dirty_without_reset_support_is_closed() {
        let pool = pool(TestManager::default(), config(1)).await;

        let mut lease = pool.get().await.unwrap();
        lease.mark_dirty();
        drop(lease);

        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().open, 0);
    }

    #[tokio::test]
    async fn test_dirty_connection_reset_before_reuse() {
        let manager = TestManager {
            can_reset: true,
            ..TestManager::default()
        };
        let pool = pool(manager, config(1)).await;

        let mut lease = pool.get().await.unwrap();
        lease.mark_dirty();
        drop(lease);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.manager().resets.load(Ordering::SeqCst), 0);

        let lease = pool.get().await.unwrap();
        assert!(!lease.is_dirty());
        assert_eq!(pool.manager().resets.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().resets_performed, 1);
        assert_eq!(pool.manager().dialed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_reset_bounded_by_acquire_timeout() {
        let manager = TestManager {
            can_reset: true,
            reset_delay: Some(Duration::from_secs(5)),
            ..TestManager::default()
        };
        let pool = pool(manager, config(1)).await;

        let mut lease = pool.get().await.unwrap();
        lease.mark_dirty();
        drop(lease);

        let started = std::time::Instant::now();
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));

        let status = pool.status();
        assert_eq!(status.open, 0);
        assert_eq!(status.in_use, 0);
        let metrics = pool.metrics();
        assert_eq!(metrics.resets_failed, 1);
        assert_eq!(metrics.checkouts_failed, 1);
    }

    #[tokio::test]
    async fn test_max_idle_enforced() {
        let cfg = config(3).max_idle(1);
        let pool = pool(TestManager::default(), cfg).await;

        let leases = vec![
            pool.get().await.unwrap(),
            pool.get().await.unwrap(),
            pool.get().await.unwrap(),
        ];
        assert_eq!(pool.status().open, 3);
        drop(leases);

        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.open, 1);
        assert_eq!(status.in_use, 0);
    }

    #[tokio::test]
    async fn test_lifetime_expiry_on_check_in() {
        let cfg = config(1).max_lifetime(Some(Duration::ZERO));
        let pool = pool(TestManager::default(), cfg).await;

        drop(pool.get().await.unwrap());
        assert_eq!(pool.status().open, 0);

        drop(pool.get().await.unwrap());
        assert_eq!(pool.manager().dialed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reap_evicts_idle() {
        let cfg = config(2).idle_timeout(Some(Duration::from_millis(20)));
        let pool = pool(TestManager::default(), cfg).await;

        drop(pool.get().await.unwrap());
        assert_eq!(pool.status().idle, 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(pool.reap(), 1);
        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().open, 0);
    }

    #[tokio::test]
    async fn test_connect_error_frees_permit() {
        let pool = pool(TestManager::default(), config(1)).await;
        pool.manager().refuse.store(true, Ordering::SeqCst);

        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect(_)));

        pool.manager().refuse.store(false, Ordering::SeqCst);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_idle_replaced() {
        let cfg = config(1).test_on_checkout(true);
        let pool = pool(TestManager::default(), cfg).await;

        drop(pool.get().await.unwrap());
        pool.manager().unhealthy.store(true, Ordering::SeqCst);

        let lease = pool.get().await.unwrap();
        assert_eq!(lease.id, 1);
        let metrics = pool.metrics();
        assert_eq!(metrics.health_checks_performed, 1);
        assert_eq!(metrics.health_checks_failed, 1);
    }

    #[tokio::test]
    async fn test_close_rejects_and_wakes_waiters() {
        let pool = pool(TestManager::default(), config(1)).await;
        let held = pool.get().await.unwrap();

        let mut waiter = tokio_test::task::spawn(pool.get_timeout(Duration::from_secs(5)));
        assert_pending!(waiter.poll());

        pool.close();
        assert!(pool.is_closed());
        match waiter.poll() {
            std::task::Poll::Ready(Err(PoolError::PoolClosed)) => {}
            other => panic!("expected PoolClosed, got {other:?}"),
        }

        drop(held);
        assert_eq!(pool.status().open, 0);
        assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
    }
}
