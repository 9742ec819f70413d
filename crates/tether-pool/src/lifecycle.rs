//! Connection lifecycle hooks and per-connection metadata.

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Hooks the pool uses to create, check and recycle connections.
///
/// The pool never interprets the connection itself; everything it needs to
/// know goes through this trait.
#[async_trait]
pub trait ConnectionLifecycle: Send + Sync + 'static {
    /// The pooled connection type.
    type Connection: Send + 'static;

    /// Error produced when dialing or resetting.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new physical connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Probe an idle connection before it is handed out.
    async fn health_check(&self, conn: &mut Self::Connection) -> HealthCheckResult;

    /// Whether the connection reported a transport failure.
    ///
    /// Called on check-in, must not block.
    fn has_broken(&self, conn: &Self::Connection) -> bool;

    /// Whether [`reset`](Self::reset) is able to clear session state.
    fn can_reset(&self, _conn: &Self::Connection) -> bool {
        false
    }

    /// Clear session state left behind by the previous holder.
    async fn reset(&self, _conn: &mut Self::Connection) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Outcome of a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckResult {
    /// The connection answered.
    Healthy,
    /// The connection failed the probe.
    Unhealthy(String),
}

impl HealthCheckResult {
    /// Check if the result is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Metadata tracked for every pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique connection ID.
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last checked in or out.
    pub last_used_at: Instant,
    /// Number of times the connection was leased.
    pub checkouts: u64,
}

impl ConnectionMetadata {
    /// Create metadata for a freshly opened connection.
    #[must_use]
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkouts: 0,
        }
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last used.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Check the connection against a maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|max| self.age() >= max)
    }

    /// Check the connection against an idle timeout.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|max| self.idle_for() >= max)
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_metadata_not_expired() {
        let meta = ConnectionMetadata::new(1);
        assert_eq!(meta.checkouts, 0);
        assert!(!meta.is_expired(Some(Duration::from_secs(60))));
        assert!(!meta.is_expired(None));
        assert!(!meta.is_idle_expired(None));
    }

    #[test]
    fn test_zero_lifetime_expires_immediately() {
        let meta = ConnectionMetadata::new(1);
        assert!(meta.is_expired(Some(Duration::ZERO)));
        assert!(meta.is_idle_expired(Some(Duration::ZERO)));
    }

    #[test]
    fn test_health_check_result() {
        assert!(HealthCheckResult::Healthy.is_healthy());
        assert!(!HealthCheckResult::Unhealthy("timeout".into()).is_healthy());
    }
}
