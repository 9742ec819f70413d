//! Client configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tether_pool::PoolConfig;

use crate::error::Error;
use crate::instrumentation::SanitizationConfig;
use crate::statement::validate_identifier;

/// Order in which server addresses are tried when dialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenStrategy {
    /// Always start with the first address and fall through on failure.
    #[default]
    InOrder,
    /// Start each dial at the next address in rotation.
    RoundRobin,
}

impl OpenStrategy {
    fn parse(value: &str) -> Result<Self, Error> {
        match value.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "in_order" | "inorder" => Ok(Self::InOrder),
            "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            _ => Err(Error::Config(format!("invalid open strategy: {value}"))),
        }
    }
}

/// Configuration for connecting to a server cluster.
#[derive(Clone)]
pub struct Config {
    /// Server addresses as `host:port`.
    pub addresses: Vec<String>,

    /// Database name.
    pub database: String,

    /// User name.
    pub username: String,

    /// Password.
    pub password: String,

    /// Settings applied with `SET` on every new connection.
    pub settings: BTreeMap<String, String>,

    /// Timeout for acquiring a connection and for dialing one.
    pub dial_timeout: Duration,

    /// Maximum number of open connections.
    pub max_open_conns: u32,

    /// Maximum number of idle connections.
    pub max_idle_conns: u32,

    /// Maximum lifetime of a connection, `None` for unlimited.
    pub conn_max_lifetime: Option<Duration>,

    /// Maximum idle time of a connection, `None` for unlimited.
    pub conn_max_idle_time: Option<Duration>,

    /// Address selection when dialing.
    pub open_strategy: OpenStrategy,

    /// Per-operation deadline, `None` for no deadline.
    pub command_timeout: Option<Duration>,

    /// Ping idle connections before handing them out.
    pub test_on_checkout: bool,

    /// Statement sanitization for logs.
    pub sanitization: SanitizationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addresses: vec!["localhost:9000".to_string()],
            database: "default".to_string(),
            username: "default".to_string(),
            password: String::new(),
            settings: BTreeMap::new(),
            dial_timeout: Duration::from_secs(30),
            max_open_conns: 10,
            max_idle_conns: 5,
            conn_max_lifetime: Some(Duration::from_secs(3600)),
            conn_max_idle_time: Some(Duration::from_secs(600)),
            open_strategy: OpenStrategy::InOrder,
            command_timeout: None,
            test_on_checkout: false,
            sanitization: SanitizationConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Supports ADO.NET-style connection strings:
    /// ```text
    /// Host=ch1:9000,ch2:9000;Database=default;User=default;Password=;
    /// Dial Timeout=30;Max Open Conns=5;Setting.max_execution_time=60;
    /// ```
    ///
    /// Durations are in seconds; `0` disables lifetime and idle limits.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            if let Some(name) = key.strip_prefix("setting.") {
                validate_identifier(name)
                    .map_err(|_| Error::Config(format!("invalid setting name: {name}")))?;
                config.settings.insert(name.to_string(), value.to_string());
                continue;
            }

            match key.as_str() {
                "host" | "hosts" | "server" | "address" | "addr" => {
                    config.addresses = value
                        .split(',')
                        .map(str::trim)
                        .filter(|a| !a.is_empty())
                        .map(String::from)
                        .collect();
                }
                "database" | "db" => {
                    config.database = value.to_string();
                }
                "user" | "username" | "user id" | "uid" => {
                    config.username = value.to_string();
                }
                "password" | "pwd" => {
                    config.password = value.to_string();
                }
                "dial timeout" | "connect timeout" | "connection timeout" => {
                    config.dial_timeout = Duration::from_secs(parse_secs(value)?);
                }
                "max open conns" => {
                    config.max_open_conns = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid max open conns: {value}")))?;
                }
                "max idle conns" => {
                    config.max_idle_conns = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid max idle conns: {value}")))?;
                }
                "conn max lifetime" => {
                    config.conn_max_lifetime = optional_secs(parse_secs(value)?);
                }
                "conn max idle time" => {
                    config.conn_max_idle_time = optional_secs(parse_secs(value)?);
                }
                "open strategy" | "connection open strategy" => {
                    config.open_strategy = OpenStrategy::parse(value)?;
                }
                "command timeout" | "read timeout" => {
                    config.command_timeout = optional_secs(parse_secs(value)?);
                }
                "test on checkout" => {
                    config.test_on_checkout = parse_bool(value);
                }
                "sanitize statements" => {
                    config.sanitization = if parse_bool(value) {
                        SanitizationConfig::default()
                    } else {
                        SanitizationConfig::no_sanitization()
                    };
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(key = key, "ignoring unknown connection string option");
                }
            }
        }

        Ok(config)
    }

    /// Set the server addresses.
    #[must_use]
    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the user name and password.
    #[must_use]
    pub fn auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Add a setting applied to every new connection.
    #[must_use]
    pub fn setting(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.settings.insert(name.into(), value.to_string());
        self
    }

    /// Set the dial and acquisition timeout.
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the maximum number of open connections.
    #[must_use]
    pub fn max_open_conns(mut self, count: u32) -> Self {
        self.max_open_conns = count;
        self
    }

    /// Set the maximum number of idle connections.
    #[must_use]
    pub fn max_idle_conns(mut self, count: u32) -> Self {
        self.max_idle_conns = count;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn conn_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.conn_max_lifetime = lifetime;
        self
    }

    /// Set the maximum idle time.
    #[must_use]
    pub fn conn_max_idle_time(mut self, idle: Option<Duration>) -> Self {
        self.conn_max_idle_time = idle;
        self
    }

    /// Set the address selection strategy.
    #[must_use]
    pub fn open_strategy(mut self, strategy: OpenStrategy) -> Self {
        self.open_strategy = strategy;
        self
    }

    /// Set the per-operation deadline.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Enable or disable the ping on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Set the statement sanitization.
    #[must_use]
    pub fn sanitization(mut self, sanitization: SanitizationConfig) -> Self {
        self.sanitization = sanitization;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.addresses.is_empty() {
            return Err(Error::Config("at least one address is required".into()));
        }
        for name in self.settings.keys() {
            validate_identifier(name)
                .map_err(|_| Error::Config(format!("invalid setting name: {name}")))?;
        }
        self.pool_config().validate()?;
        Ok(())
    }

    /// Project the pool-related options onto a [`PoolConfig`].
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .max_open(self.max_open_conns)
            .max_idle(self.max_idle_conns)
            .max_lifetime(self.conn_max_lifetime)
            .idle_timeout(self.conn_max_idle_time)
            .connection_timeout(self.dial_timeout)
            .test_on_checkout(self.test_on_checkout)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("addresses", &self.addresses)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("settings", &self.settings)
            .field("dial_timeout", &self.dial_timeout)
            .field("max_open_conns", &self.max_open_conns)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("conn_max_lifetime", &self.conn_max_lifetime)
            .field("conn_max_idle_time", &self.conn_max_idle_time)
            .field("open_strategy", &self.open_strategy)
            .field("command_timeout", &self.command_timeout)
            .field("test_on_checkout", &self.test_on_checkout)
            .finish_non_exhaustive()
    }
}

fn parse_secs(value: &str) -> Result<u64, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration in seconds: {value}")))
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1"
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_parsing() {
        let config = Config::from_connection_string(
            "Host=ch1:9000, ch2:9000;Database=analytics;User=default;Password=secret;",
        )
        .unwrap();

        assert_eq!(config.addresses, ["ch1:9000", "ch2:9000"]);
        assert_eq!(config.database, "analytics");
        assert_eq!(config.username, "default");
        assert_eq!(config.password, "secret");
    }

    #[test]
    fn test_connection_string_pool_options() {
        let config = Config::from_connection_string(
            "Host=localhost:9000;Dial Timeout=30;Max Open Conns=5;Max Idle Conns=5;\
             Conn Max Lifetime=3600;Conn Max Idle Time=0;Open Strategy=round_robin;\
             Command Timeout=15;Test On Checkout=true",
        )
        .unwrap();

        assert_eq!(config.dial_timeout, Duration::from_secs(30));
        assert_eq!(config.max_open_conns, 5);
        assert_eq!(config.max_idle_conns, 5);
        assert_eq!(config.conn_max_lifetime, Some(Duration::from_secs(3600)));
        assert_eq!(config.conn_max_idle_time, None);
        assert_eq!(config.open_strategy, OpenStrategy::RoundRobin);
        assert_eq!(config.command_timeout, Some(Duration::from_secs(15)));
        assert!(config.test_on_checkout);
    }

    #[test]
    fn test_connection_string_settings() {
        let config =
            Config::from_connection_string("Setting.max_execution_time=60;Setting.Readonly=1")
                .unwrap();
        assert_eq!(
            config.settings.get("max_execution_time").map(String::as_str),
            Some("60")
        );
        assert_eq!(config.settings.get("readonly").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_connection_string_errors() {
        assert!(Config::from_connection_string("Host").is_err());
        assert!(Config::from_connection_string("Max Open Conns=many").is_err());
        assert!(Config::from_connection_string("Open Strategy=random").is_err());
        assert!(Config::from_connection_string("Setting.bad-name=1").is_err());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = Config::from_connection_string("Compression=lz4;Database=x").unwrap();
        assert_eq!(config.database, "x");
    }

    #[test]
    fn test_pool_config_projection() {
        let config = Config::new()
            .max_open_conns(5)
            .max_idle_conns(3)
            .conn_max_lifetime(Some(Duration::from_secs(3600)))
            .dial_timeout(Duration::from_secs(30))
            .test_on_checkout(true);
        let pool = config.pool_config();

        assert_eq!(pool.max_open, 5);
        assert_eq!(pool.max_idle, 3);
        assert_eq!(pool.max_lifetime, Some(Duration::from_secs(3600)));
        assert_eq!(pool.connection_timeout, Duration::from_secs(30));
        assert!(pool.test_on_checkout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let no_addr = Config::new().addresses(Vec::<String>::new());
        assert!(matches!(no_addr.validate(), Err(Error::Config(_))));

        let idle_above_open = Config::new().max_open_conns(2).max_idle_conns(4);
        assert!(matches!(idle_above_open.validate(), Err(Error::Config(_))));

        let bad_setting = Config::new().setting("x; DROP", 1);
        assert!(bad_setting.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Config::new().auth("default", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
