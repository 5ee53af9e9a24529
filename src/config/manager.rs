//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(enabled) = std::env::var("TUNSOCKS_ENABLED") {
            config.socks5.enabled = enabled
                .parse::<bool>()
                .with_context(|| format!("Invalid TUNSOCKS_ENABLED: {}", enabled))?;
        }

        if let Ok(listen) = std::env::var("TUNSOCKS_LISTEN_ADDR") {
            config.socks5.listening_address = listen
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid TUNSOCKS_LISTEN_ADDR: {}", listen))?;
        }

        if let Ok(username) = std::env::var("TUNSOCKS_USER") {
            config.socks5.username = Some(username);
        }

        if let Ok(password) = std::env::var("TUNSOCKS_PASSWORD") {
            config.socks5.password = Some(password);
        }

        if let Ok(log_requests) = std::env::var("TUNSOCKS_LOG_REQUESTS") {
            config.socks5.log_requests = log_requests
                .parse::<bool>()
                .with_context(|| format!("Invalid TUNSOCKS_LOG_REQUESTS: {}", log_requests))?;
        }

        if let Ok(backoff) = std::env::var("TUNSOCKS_BACKOFF_INITIAL") {
            config.supervisor.backoff_initial = humantime::parse_duration(&backoff)
                .with_context(|| format!("Invalid TUNSOCKS_BACKOFF_INITIAL: {}", backoff))?;
        }

        if let Ok(log_level) = std::env::var("TUNSOCKS_LOG_LEVEL") {
            config.log.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(username) = &self.socks5.username {
            if username.len() > 255 {
                bail!("socks5.username exceeds 255 bytes");
            }
        }

        if let Some(password) = &self.socks5.password {
            if password.len() > 255 {
                bail!("socks5.password exceeds 255 bytes");
            }
        }

        if self.supervisor.backoff_initial.is_zero() {
            bail!("supervisor.backoff_initial must be greater than 0");
        }

        if self.supervisor.stability_window.is_zero() {
            bail!("supervisor.stability_window must be greater than 0");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log.level.as_str()) {
            bail!("log.level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        listen: Option<&str>,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
        log_requests: bool,
    ) {
        if let Some(listen_str) = listen {
            if let Ok(addr) = listen_str.parse::<SocketAddr>() {
                self.socks5.listening_address = addr;
                tracing::info!("CLI override: listening address set to {}", addr);
            } else {
                tracing::warn!("Invalid listening address provided: {}", listen_str);
            }
        }

        if let Some(port) = port {
            self.socks5.listening_address.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if username.is_some() {
            self.socks5.username = username;
            tracing::info!("CLI override: username set");
        }

        if password.is_some() {
            self.socks5.password = password;
        }

        if log_requests {
            self.socks5.log_requests = true;
            tracing::info!("CLI override: request logging enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn config_file_round_trips_through_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[socks5]
enabled = true
listening_address = "127.0.0.1:1984"
username = "user"
password = "pass"
log_requests = true

[supervisor]
backoff_initial = "5s"
stability_window = "500ms"
"#
        )
        .unwrap();

        let config = ConfigManager::load_from_file(file.path()).unwrap();
        assert_eq!(
            config.socks5.listening_address,
            "127.0.0.1:1984".parse().unwrap()
        );
        assert_eq!(config.socks5.username.as_deref(), Some("user"));
        assert!(config.socks5.log_requests);
        assert_eq!(config.supervisor.backoff_initial, Duration::from_secs(5));
        assert_eq!(
            config.supervisor.stability_window,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ConfigManager::load_from_file(Path::new("/nonexistent/tunsocks.toml")).unwrap();
        assert_eq!(config.socks5.listening_address, "0.0.0.0:1080".parse().unwrap());
        assert!(config.socks5.username.is_none());
    }

    #[test]
    fn overlong_credentials_fail_validation() {
        let mut config = Config::default();
        config.socks5.username = Some("u".repeat(256));
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_port_override_keeps_host() {
        let mut config = Config::default();
        config.merge_with_cli_args(None, Some(9050), None, None, false);
        assert_eq!(config.socks5.listening_address.port(), 9050);
        assert_eq!(
            config.socks5.listening_address.ip().to_string(),
            "0.0.0.0"
        );
    }
}
