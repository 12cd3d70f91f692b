//! Structured logging layer using the tracing crate.
//!
//! Logs always go to stderr; stdout is reserved for the module result.

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact single-line output
    #[default]
    Compact,
    /// Pretty multi-line output with colors
    Pretty,
    /// JSON structured output
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(Error::InvalidConfig {
                key: "logging.format".to_string(),
                message: format!("unknown log format '{}', expected compact, pretty or json", s),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Builder for constructing the global logging subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: String,
    format: LogFormat,
    ansi_colors: bool,
    with_target: bool,
}

impl LoggingBuilder {
    /// Create a new logging builder with default configuration.
    pub fn new() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
            ansi_colors: true,
            with_target: false,
        }
    }

    /// Create a builder from the loaded configuration.
    pub fn from_config(config: &LoggingConfig) -> Result<Self> {
        Ok(Self::new()
            .with_level(config.level.clone())
            .with_format(config.format.parse()?))
    }

    /// Set the default level directive, used when RUST_LOG is unset.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Derive the level from a `-v` count, overriding the configured level.
    pub fn with_verbosity(self, verbosity: u8) -> Self {
        match verbosity {
            0 => self,
            1 => self.with_level("info"),
            2 => self.with_level("debug"),
            _ => self.with_level("trace").with_target(true),
        }
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi_colors = enabled;
        self
    }

    /// Include target in logs.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// The effective level directive
    pub fn level(&self) -> &str {
        &self.level
    }

    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    }

    /// Build and install the global subscriber.
    pub fn init(self) -> Result<()> {
        let env_filter = self.build_filter();
        let registry = tracing_subscriber::registry().with(env_filter);

        let result = match self.format {
            LogFormat::Compact => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr)
                        .with_ansi(self.ansi_colors)
                        .with_target(self.with_target),
                )
                .try_init(),
            LogFormat::Pretty => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr)
                        .with_ansi(self.ansi_colors)
                        .with_target(self.with_target),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(self.with_target),
                )
                .try_init(),
        };

        result.map_err(|e| Error::Logging(e.to_string()))
    }
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}
