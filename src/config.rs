//! Session and pool configuration

use crate::errors::{PoolError, PoolResult};
use std::collections::HashMap;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Port used when [`SessionConfig::port`] is `0`.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Connection settings for new sessions, plus the pool ceiling.
///
/// A snapshot is immutable once handed to the pool. Replacing it with
/// [`SessionPool::set_config`](crate::SessionPool::set_config) only affects
/// sessions created afterwards.
///
/// # Examples
///
/// ```
/// use esox_sessionpool::SessionConfig;
///
/// let config = SessionConfig::new("ftp.example.com")
///     .with_credentials("anonymous", "guest@example.com")
///     .with_passive(true)
///     .with_max_connections(4);
///
/// assert_eq!(config.max_connections, 4);
/// assert_eq!(config.effective_port(), 21);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    /// Host name or address of the server
    pub server: String,

    /// Control port, `0` selects the protocol default
    #[cfg_attr(feature = "serde", serde(default))]
    pub port: u16,

    pub username: String,

    pub password: String,

    /// Passive transfer mode
    #[cfg_attr(feature = "serde", serde(default))]
    pub passive: bool,

    /// Ceiling on open sessions (idle + in use), must be at least 1
    #[cfg_attr(feature = "serde", serde(alias = "maxConnections"))]
    pub max_connections: usize,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("passive", &self.passive)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 0,
            username: "anonymous".to_string(),
            password: String::new(),
            passive: false,
            max_connections: 1,
        }
    }
}

impl SessionConfig {
    /// Create a configuration for `server` with default values
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    /// Set the ceiling on open sessions
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// The port to dial, substituting the protocol default for `0`
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 { DEFAULT_FTP_PORT } else { self.port }
    }

    /// Check the configuration before it is used to create sessions.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_connections < 1 {
            return Err(PoolError::ConfigInvalid(format!(
                "maxConnections {} must be larger than zero",
                self.max_connections
            )));
        }
        Ok(())
    }

    /// Build a configuration from flat string properties.
    ///
    /// Recognised keys are `server`, `port`, `username`, `password`,
    /// `passive` and `maxConnections`. `port` defaults to `0` and `passive`
    /// to `false`; the others are required.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_sessionpool::SessionConfig;
    /// use std::collections::HashMap;
    ///
    /// let props: HashMap<String, String> = [
    ///     ("server", "ftp.example.com"),
    ///     ("username", "deploy"),
    ///     ("password", "secret"),
    ///     ("passive", "true"),
    ///     ("maxConnections", "3"),
    /// ]
    /// .into_iter()
    /// .map(|(k, v)| (k.to_string(), v.to_string()))
    /// .collect();
    ///
    /// let config = SessionConfig::from_properties(&props).unwrap();
    /// assert!(config.passive);
    /// assert_eq!(config.port, 0);
    /// assert_eq!(config.max_connections, 3);
    /// ```
    pub fn from_properties(props: &HashMap<String, String>) -> PoolResult<Self> {
        let required = |key: &str| {
            props
                .get(key)
                .map(|v| v.trim().to_string())
                .ok_or_else(|| PoolError::ConfigInvalid(format!("missing property '{key}'")))
        };

        let port = match props.get("port") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| PoolError::ConfigInvalid(format!("port '{raw}': {e}")))?,
            None => 0,
        };

        let passive = match props.get("passive") {
            Some(raw) => raw.trim().eq_ignore_ascii_case("true"),
            None => false,
        };

        let raw_max = required("maxConnections")?;
        let max_connections = raw_max
            .parse::<usize>()
            .map_err(|e| PoolError::ConfigInvalid(format!("maxConnections '{raw_max}': {e}")))?;

        Ok(Self {
            server: required("server")?,
            port,
            username: required("username")?,
            password: props.get("password").cloned().unwrap_or_default(),
            passive,
            max_connections,
        })
    }
}

/// What `acquire` does while a drain is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DrainPolicy {
    /// Wait until the drain finishes, then continue normally
    #[default]
    Block,

    /// Fail immediately with [`PoolError::Draining`]
    Reject,
}

/// Tuning for the pool's waiting behavior
///
/// # Examples
///
/// ```
/// use esox_sessionpool::{DrainPolicy, PoolOptions};
/// use std::time::Duration;
///
/// let options = PoolOptions::new()
///     .with_drain_policy(DrainPolicy::Reject)
///     .with_backoff(Duration::from_millis(50), Duration::from_millis(50), Duration::from_secs(1));
///
/// assert_eq!(options.backoff_ceiling, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolOptions {
    pub drain_policy: DrainPolicy,

    /// First wait bound when the pool is at capacity
    pub backoff_initial: Duration,

    /// Added to the wait bound after every unsuccessful retry
    pub backoff_step: Duration,

    /// Upper limit for the wait bound
    pub backoff_ceiling: Duration,

    /// How often a drain re-checks for outstanding sessions
    pub drain_poll_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            drain_policy: DrainPolicy::Block,
            backoff_initial: Duration::from_millis(500),
            backoff_step: Duration::from_millis(500),
            backoff_ceiling: Duration::from_millis(30_000),
            drain_poll_interval: Duration::from_millis(100),
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    /// Set the capped linear backoff used between acquire retries
    pub fn with_backoff(mut self, initial: Duration, step: Duration, ceiling: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_step = step;
        self.backoff_ceiling = ceiling;
        self
    }

    pub fn with_drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = interval;
        self
    }

    /// Wait bound for the retry after one that waited `current`
    pub(crate) fn next_backoff(&self, current: Duration) -> Duration {
        (current + self.backoff_step).min(self.backoff_ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_zero_max_connections_is_invalid() {
        let config = SessionConfig::new("localhost").with_max_connections(0);
        assert!(matches!(config.validate(), Err(PoolError::ConfigInvalid(_))));
    }

    #[test]
    fn test_effective_port() {
        assert_eq!(SessionConfig::new("h").effective_port(), DEFAULT_FTP_PORT);
        assert_eq!(SessionConfig::new("h").with_port(2121).effective_port(), 2121);
    }

    #[test]
    fn test_from_properties_defaults() {
        let config = SessionConfig::from_properties(&props(&[
            ("server", "ftp.local"),
            ("username", "u"),
            ("maxConnections", "2"),
        ]))
        .unwrap();

        assert_eq!(config.server, "ftp.local");
        assert_eq!(config.port, 0);
        assert!(!config.passive);
        assert_eq!(config.password, "");
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn test_from_properties_rejects_bad_values() {
        let missing = SessionConfig::from_properties(&props(&[("server", "h"), ("username", "u")]));
        assert!(matches!(missing, Err(PoolError::ConfigInvalid(_))));

        let bad_port = SessionConfig::from_properties(&props(&[
            ("server", "h"),
            ("username", "u"),
            ("port", "ftp"),
            ("maxConnections", "1"),
        ]));
        assert!(matches!(bad_port, Err(PoolError::ConfigInvalid(_))));
    }

    #[test]
    fn test_from_properties_keeps_zero_ceiling() {
        // Parsing does not clamp; validation is what rejects it.
        let config = SessionConfig::from_properties(&props(&[
            ("server", "h"),
            ("username", "u"),
            ("maxConnections", "0"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = SessionConfig::new("h").with_credentials("u", "hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_backoff_is_capped() {
        let options = PoolOptions::default();
        let mut wait = options.backoff_initial;
        for _ in 0..100 {
            wait = options.next_backoff(wait);
        }
        assert_eq!(wait, Duration::from_millis(30_000));
        assert_eq!(
            options.next_backoff(Duration::from_millis(500)),
            Duration::from_millis(1000)
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_with_camel_case_ceiling() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"server":"h","username":"u","password":"p","maxConnections":5}"#,
        )
        .unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.port, 0);
    }
}
