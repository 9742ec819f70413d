//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration for a connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of open connections, idle and leased together.
    pub max_open: u32,

    /// Maximum number of idle connections retained for reuse.
    pub max_idle: u32,

    /// Maximum age of a connection before it is closed instead of reused.
    pub max_lifetime: Option<Duration>,

    /// Maximum time a connection may sit idle before it is evicted.
    pub idle_timeout: Option<Duration>,

    /// How long to wait for a free lease, and separately for a dial.
    pub connection_timeout: Duration,

    /// Run a health check before handing out an idle connection.
    pub test_on_checkout: bool,

    /// Reset connections flagged dirty before they are reused.
    ///
    /// When disabled, dirty connections are closed on release.
    pub reset_on_reuse: bool,

    /// Interval of the background reaper, `None` disables it.
    pub reap_interval: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 5,
            max_lifetime: Some(Duration::from_secs(3600)),
            idle_timeout: Some(Duration::from_secs(600)),
            connection_timeout: Duration::from_secs(30),
            test_on_checkout: false,
            reset_on_reuse: true,
            reap_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of open connections.
    #[must_use]
    pub fn max_open(mut self, count: u32) -> Self {
        self.max_open = count;
        self
    }

    /// Set the maximum number of idle connections.
    #[must_use]
    pub fn max_idle(mut self, count: u32) -> Self {
        self.max_idle = count;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the acquisition and dial timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Enable or disable the health check on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Enable or disable resetting dirty connections before reuse.
    #[must_use]
    pub fn reset_on_reuse(mut self, enabled: bool) -> Self {
        self.reset_on_reuse = enabled;
        self
    }

    /// Set the reaper interval.
    #[must_use]
    pub fn reap_interval(mut self, interval: Option<Duration>) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_open == 0 {
            return Err(PoolError::Configuration(
                "max_open must be greater than 0".into(),
            ));
        }
        if self.max_idle > self.max_open {
            return Err(PoolError::Configuration(format!(
                "max_idle ({}) cannot exceed max_open ({})",
                self.max_idle, self.max_open
            )));
        }
        if self.connection_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "connection_timeout must be greater than 0".into(),
            ));
        }
        if self.reap_interval.is_some_and(|d| d.is_zero()) {
            return Err(PoolError::Configuration(
                "reap_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
