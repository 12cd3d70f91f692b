//! # rustible-bigip - iApp template management for F5 BIG-IP
//!
//! A rustible module that keeps a TCL iApp template on a BIG-IP device in
//! the desired state over the iControl REST API.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    CLI Interface                     │
//! │     (clap flags / JSON args file, JSON result)       │
//! └──────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                   Module Registry                    │
//! │        (bigip_iapp_template + ModuleManager)         │
//! └──────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────┐
//! │          IappTemplateApi / BigIpClient               │
//! │        (blocking iControl REST, basic auth)          │
//! └──────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//!                     BIG-IP device
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use rustible_bigip::prelude::*;
//!
//! let registry = ModuleRegistry::with_builtins();
//! let mut params = ModuleParams::new();
//! params.insert("content".into(), serde_json::json!(std::fs::read_to_string("web.tmpl")?));
//! params.insert("server".into(), serde_json::json!("lb.example.com"));
//! params.insert("user".into(), serde_json::json!("admin"));
//! params.insert("password".into(), serde_json::json!("secret"));
//!
//! let output = registry.execute("bigip_iapp_template", &params, &ModuleContext::new())?;
//! println!("{}", output.to_result_json());
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::modules::network::{
        BigIpClient, BigIpIappTemplateModule, BigIpProvider, IappTemplateApi, ModuleManager,
        TemplateParameters, TemplateState,
    };
    pub use crate::modules::{
        Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleRegistry,
        ModuleResult, ModuleStatus, ParamExt,
    };
}

pub mod cli;
pub mod config;
pub mod error;
pub mod modules;
pub mod telemetry;

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
