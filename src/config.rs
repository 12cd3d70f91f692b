//! Configuration module for rustible-bigip
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/rustible/bigip.toml)
//! - User configuration (~/.rustible/bigip.toml)
//! - Project configuration (./bigip.toml)
//! - Environment variables (`F5_*`, `RUSTIBLE_LOG_*`)
//!
//! Module parameters given on the command line always win over anything here.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection defaults for BIG-IP devices
    pub bigip: BigIpDefaults,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Connection defaults used when module parameters leave them out
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BigIpDefaults {
    /// Management hostname or address
    pub server: Option<String>,

    /// Management port
    pub server_port: u16,

    /// Username
    pub user: Option<String>,

    /// Password
    pub password: Option<String>,

    /// Verify the device's TLS certificate
    pub validate_certs: bool,

    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for BigIpDefaults {
    fn default() -> Self {
        Self {
            server: None,
            server_port: 443,
            user: None,
            password: None,
            validate_certs: true,
            timeout: 30,
        }
    }
}

impl std::fmt::Debug for BigIpDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigIpDefaults")
            .field("server", &self.server)
            .field("server_port", &self.server_port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("validate_certs", &self.validate_certs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level when no verbosity flag or RUST_LOG is given
    pub level: String,

    /// Log format: compact, pretty, or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge(Self::read_file(&path)?);
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load from a specific file, without environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Config::default().merge(Self::read_file(path.as_ref())?))
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        // Explicit path takes priority
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = vec![PathBuf::from("/etc/rustible/bigip.toml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".rustible/bigip.toml"));
        }

        paths.push(PathBuf::from("bigip.toml"));

        if let Ok(env_config) = std::env::var("RUSTIBLE_BIGIP_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        paths
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config_load(path, format!("failed to read file: {}", e)))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let parsed: std::result::Result<Config, String> = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
            "json" => serde_json::from_str(&content).map_err(|e| e.to_string()),
            "toml" => toml::from_str(&content).map_err(|e| e.to_string()),
            // Try TOML first, then YAML
            _ => toml::from_str::<Config>(&content)
                .or_else(|_| serde_yaml::from_str::<Config>(&content))
                .map_err(|e| e.to_string()),
        };

        parsed.map_err(|message| Error::config_load(path, message))
    }

    /// Merge another config into this one; values set in `other` win
    fn merge(&self, other: Config) -> Config {
        let defaults = BigIpDefaults::default();
        let logging_defaults = LoggingConfig::default();
        Config {
            bigip: BigIpDefaults {
                server: other.bigip.server.or_else(|| self.bigip.server.clone()),
                server_port: if other.bigip.server_port != defaults.server_port {
                    other.bigip.server_port
                } else {
                    self.bigip.server_port
                },
                user: other.bigip.user.or_else(|| self.bigip.user.clone()),
                password: other.bigip.password.or_else(|| self.bigip.password.clone()),
                validate_certs: other.bigip.validate_certs && self.bigip.validate_certs,
                timeout: if other.bigip.timeout != defaults.timeout {
                    other.bigip.timeout
                } else {
                    self.bigip.timeout
                },
            },
            logging: LoggingConfig {
                level: if other.logging.level != logging_defaults.level {
                    other.logging.level
                } else {
                    self.logging.level.clone()
                },
                format: if other.logging.format != logging_defaults.format {
                    other.logging.format
                } else {
                    self.logging.format.clone()
                },
            },
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(server) = std::env::var("F5_SERVER") {
            self.bigip.server = Some(server);
        }

        if let Ok(port) = std::env::var("F5_SERVER_PORT") {
            if let Ok(n) = port.parse() {
                self.bigip.server_port = n;
            }
        }

        if let Ok(user) = std::env::var("F5_USER") {
            self.bigip.user = Some(user);
        }

        if let Ok(password) = std::env::var("F5_PASSWORD") {
            self.bigip.password = Some(password);
        }

        if let Ok(validate) = std::env::var("F5_VALIDATE_CERTS") {
            match validate.to_lowercase().as_str() {
                "false" | "no" | "0" | "off" => self.bigip.validate_certs = false,
                "true" | "yes" | "1" | "on" => self.bigip.validate_certs = true,
                _ => {}
            }
        }

        if let Ok(level) = std::env::var("RUSTIBLE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("RUSTIBLE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}
