//! Configuration management for queue clients.
//!
//! Loads configuration from `TURNOS_*` environment variables with sensible defaults.

use crate::activity;
use crate::queue;
use crate::types::TicketKind;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Per-session behaviour
    pub session: SessionConfig,
    /// In-process hub settings
    pub hub: HubConfig,
    /// Expected service time per ticket kind
    pub service_times: ServiceTimes,
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_filter: String,
}

/// Session controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Fixed session id; generated when absent
    pub session_id: Option<String>,
    /// File persisting a generated session id across runs
    pub session_file: Option<String>,
    /// Notification auto-dismiss delay in milliseconds (default: 5000)
    pub notification_timeout_ms: u64,
    /// Activity log entries kept (default: 20)
    pub activity_log_capacity: usize,
    /// Served or cancelled ticket ids remembered (default: 1024)
    pub retired_capacity: usize,
}

impl SessionConfig {
    /// Notification auto-dismiss delay
    #[must_use]
    pub const fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            session_file: None,
            notification_timeout_ms: 5_000,
            activity_log_capacity: activity::DEFAULT_CAPACITY,
            retired_capacity: queue::DEFAULT_RETIRED_CAPACITY,
        }
    }
}

/// In-process broadcast hub configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Messages buffered per subscriber before it lags (default: 256)
    pub capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Expected minutes to serve one ticket, per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTimes {
    /// Teller tickets (default: 5)
    pub teller_minutes: u64,
    /// Executive tickets (default: 15)
    pub executive_minutes: u64,
}

impl ServiceTimes {
    /// Expected service time for one ticket of `kind`
    #[must_use]
    pub const fn for_kind(&self, kind: TicketKind) -> Duration {
        let minutes = match kind {
            TicketKind::Teller => self.teller_minutes,
            TicketKind::Executive => self.executive_minutes,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl Default for ServiceTimes {
    fn default() -> Self {
        Self {
            teller_minutes: TicketKind::Teller.default_service_time().as_secs() / 60,
            executive_minutes: TicketKind::Executive.default_service_time().as_secs() / 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            hub: HubConfig::default(),
            service_times: ServiceTimes::default(),
            log_filter: "info,turnos=debug".to_string(),
        }
    }
}

/// Invalid configuration value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value that must be positive is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str, default| parse_or(lookup(key), default);

        Self {
            session: SessionConfig {
                session_id: lookup("TURNOS_SESSION_ID").filter(|s| !s.trim().is_empty()),
                session_file: lookup("TURNOS_SESSION_FILE").filter(|s| !s.trim().is_empty()),
                notification_timeout_ms: parsed(
                    "TURNOS_NOTIFICATION_TIMEOUT_MS",
                    defaults.session.notification_timeout_ms,
                ),
                activity_log_capacity: parse_or(
                    lookup("TURNOS_ACTIVITY_LOG_CAPACITY"),
                    defaults.session.activity_log_capacity,
                ),
                retired_capacity: parse_or(
                    lookup("TURNOS_RETIRED_CAPACITY"),
                    defaults.session.retired_capacity,
                ),
            },
            hub: HubConfig {
                capacity: parse_or(lookup("TURNOS_HUB_CAPACITY"), defaults.hub.capacity),
            },
            service_times: ServiceTimes {
                teller_minutes: parsed(
                    "TURNOS_TELLER_MINUTES",
                    defaults.service_times.teller_minutes,
                ),
                executive_minutes: parsed(
                    "TURNOS_EXECUTIVE_MINUTES",
                    defaults.service_times.executive_minutes,
                ),
            },
            log_filter: lookup("TURNOS_LOG").unwrap_or(defaults.log_filter),
        }
    }

    /// Check that every capacity and duration is positive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] naming the first offending setting.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.session.notification_timeout_ms == 0 {
            return Err(ConfigError::Zero("TURNOS_NOTIFICATION_TIMEOUT_MS"));
        }
        if self.session.activity_log_capacity == 0 {
            return Err(ConfigError::Zero("TURNOS_ACTIVITY_LOG_CAPACITY"));
        }
        if self.session.retired_capacity == 0 {
            return Err(ConfigError::Zero("TURNOS_RETIRED_CAPACITY"));
        }
        if self.hub.capacity == 0 {
            return Err(ConfigError::Zero("TURNOS_HUB_CAPACITY"));
        }
        if self.service_times.teller_minutes == 0 {
            return Err(ConfigError::Zero("TURNOS_TELLER_MINUTES"));
        }
        if self.service_times.executive_minutes == 0 {
            return Err(ConfigError::Zero("TURNOS_EXECUTIVE_MINUTES"));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
