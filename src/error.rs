//! Error types for rustible-bigip.
//!
//! Module execution reports [`ModuleError`](crate::modules::ModuleError); this
//! crate-level [`Error`] wraps it together with configuration, logging and IO
//! failures so the CLI can report a single error type.

use crate::modules::ModuleError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for crate-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for rustible-bigip.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Module Errors
    // ========================================================================
    /// Module not found in the registry.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// Invalid module arguments.
    #[error("Invalid arguments for module '{module}': {message}")]
    ModuleArgs {
        /// Module name
        module: String,
        /// Error message
        message: String,
    },

    /// Module execution failed.
    #[error("Module '{module}' execution failed: {source}")]
    ModuleExecution {
        /// Module name
        module: String,
        /// Underlying module error
        #[source]
        source: ModuleError,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Error loading a configuration file.
    #[error("Failed to load configuration from '{path}': {message}")]
    ConfigLoad {
        /// Path to the configuration file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Logging could not be initialized.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    // ========================================================================
    // IO and Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new module args error.
    pub fn module_args(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModuleArgs {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a new module execution error.
    pub fn module_execution(module: impl Into<String>, source: ModuleError) -> Self {
        Self::ModuleExecution {
            module: module.into(),
            source,
        }
    }

    /// Creates a new configuration load error.
    pub fn config_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Lifts a module error into the crate error, keeping argument problems
    /// apart from device failures.
    pub fn from_module(module: &str, err: ModuleError) -> Self {
        match err {
            ModuleError::NotFound(name) => Self::ModuleNotFound(name),
            ModuleError::InvalidParameter(message) | ModuleError::MissingParameter(message) => {
                Self::module_args(module, message)
            }
            other => Self::module_execution(module, other),
        }
    }
}
