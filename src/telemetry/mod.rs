//! Telemetry for rustible-bigip.
//!
//! Only structured logging is provided: [`LoggingBuilder`] installs a
//! `tracing` subscriber that writes to stderr.

pub mod logging;

pub use logging::{LogFormat, LoggingBuilder};
