//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::supervisor::SupervisorOptions;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub socks5: Socks5Settings,
    pub supervisor: SupervisorSettings,
    pub log: LogConfig,
}

/// SOCKS5 service settings
///
/// Empty or absent username and password select no-authentication
/// mode; setting either one makes username/password authentication
/// mandatory for every client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Socks5Settings {
    pub enabled: bool,
    pub listening_address: SocketAddr,
    pub username: Option<String>,
    pub password: Option<String>,
    pub log_requests: bool,
}

/// Supervision timing settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorSettings {
    #[serde(with = "humantime_serde")]
    pub backoff_initial: Duration,
    #[serde(with = "humantime_serde")]
    pub stability_window: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for Socks5Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            listening_address: "0.0.0.0:1080".parse().unwrap(),
            username: None,
            password: None,
            log_requests: false,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_secs(10),
            stability_window: Duration::from_secs(1),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socks5: Socks5Settings::default(),
            supervisor: SupervisorSettings::default(),
            log: LogConfig::default(),
        }
    }
}

impl SupervisorSettings {
    /// Convert to the supervisor's timing options
    pub fn options(&self) -> SupervisorOptions {
        SupervisorOptions {
            backoff_initial: self.backoff_initial,
            stability_window: self.stability_window,
        }
    }
}
