//! Configuration types for the manager client

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{hosts, ports, reconnect, timeouts};

/// Bounded exponential backoff between connection attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Total connection attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
}

impl ReconnectPolicy {
    /// Policy that tries once and never waits
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Attempts to make, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: reconnect::MAX_ATTEMPTS,
            initial_delay_ms: reconnect::INITIAL_DELAY_MS,
            max_delay_ms: reconnect::MAX_DELAY_MS,
        }
    }
}

/// Connection settings for the manager interface
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Switch host name or address
    pub host: String,
    /// Manager interface port
    pub port: u16,
    /// Manager user
    pub username: String,
    /// Manager secret
    pub secret: String,
    /// Event mask sent with Login (`off`, `on`, or a class list)
    pub events: String,
    /// Budget for connect + banner + login
    pub connect_timeout_ms: u64,
    /// Budget for each action round-trip
    pub action_timeout_ms: u64,
    /// Retry policy used by `ensure_connected`
    pub reconnect: ReconnectPolicy,
}

impl ManagerConfig {
    /// Config for a host/port with credentials and default timeouts
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// `host:port` for logging and connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: hosts::LOCAL.to_string(),
            port: ports::MANAGER,
            username: String::new(),
            secret: String::new(),
            events: "off".to_string(),
            connect_timeout_ms: timeouts::CONNECT_MS,
            action_timeout_ms: timeouts::ACTION_MS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// Keep the secret out of logs.
impl std::fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("events", &self.events)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("action_timeout_ms", &self.action_timeout_ms)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 6,
            initial_delay_ms: 500,
            max_delay_ms: 3_000,
        };
        let delays: Vec<u64> = (0..5).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 3_000, 3_000]);
        assert_eq!(policy.delay_for(200), Duration::from_millis(3_000));
    }

    #[test]
    fn test_attempts_never_zero() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ManagerConfig::new("pbx", 5038, "admin", "hunter2");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ManagerConfig = serde_json::from_str(r#"{"username": "ivr"}"#).unwrap();
        assert_eq!(config.port, 5038);
        assert_eq!(config.events, "off");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }
}
