//! CLI module for rustible-bigip
//!
//! Collects module parameters from flags and an optional Ansible-style JSON
//! args file. Flags override values from the args file.

use crate::error::{Error, Result};
use crate::modules::ModuleParams;
use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Module invoked when `--module` is not given
pub const DEFAULT_MODULE: &str = "bigip_iapp_template";

/// Placeholder shown in logs for `no_log` parameters
const REDACTED: &str = "********";

/// rustible-bigip - manage iApp templates on F5 BIG-IP devices
#[derive(Parser, Debug, Clone)]
#[command(name = "rustible-bigip")]
#[command(author = "Rustible Contributors")]
#[command(version)]
#[command(about = "Manage TCL iApp templates on F5 BIG-IP devices", long_about = None)]
pub struct Cli {
    /// Module to run
    #[arg(short = 'm', long, default_value = DEFAULT_MODULE)]
    pub module: String,

    /// JSON file with module arguments (Ansible-style)
    #[arg(short = 'a', long)]
    pub args_file: Option<PathBuf>,

    /// Template content
    #[arg(long, conflicts_with = "src")]
    pub content: Option<String>,

    /// Read template content from a file
    #[arg(long)]
    pub src: Option<PathBuf>,

    /// Template name, parsed from the content when omitted
    #[arg(long)]
    pub name: Option<String>,

    /// Partition the template lives in
    #[arg(long)]
    pub partition: Option<String>,

    /// Desired state
    #[arg(long)]
    pub state: Option<StateArg>,

    /// Update the template even when application services use it
    #[arg(long)]
    pub force: bool,

    /// BIG-IP management address
    #[arg(long)]
    pub server: Option<String>,

    /// BIG-IP management port
    #[arg(long)]
    pub server_port: Option<u16>,

    /// BIG-IP username
    #[arg(long)]
    pub user: Option<String>,

    /// BIG-IP password
    #[arg(long)]
    pub password: Option<String>,

    /// Do not verify the device's TLS certificate
    #[arg(long)]
    pub no_validate_certs: bool,

    /// Run in check mode (dry-run, don't make changes)
    #[arg(long = "check")]
    pub check_mode: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, env = "RUSTIBLE_BIGIP_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Desired template state accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StateArg {
    /// Template should exist with the given content
    Present,
    /// Template should not exist
    Absent,
}

impl StateArg {
    fn as_str(self) -> &'static str {
        match self {
            StateArg::Present => "present",
            StateArg::Absent => "absent",
        }
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-4)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(4)
    }

    /// Whether check mode was requested by flag or by the args file
    pub fn check_mode(&self, params: &ModuleParams) -> bool {
        self.check_mode
            || params
                .get("_ansible_check_mode")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// Build module parameters from the args file and flags.
    pub fn module_params(&self) -> Result<ModuleParams> {
        let mut params = match &self.args_file {
            Some(path) => read_args_file(path, &self.module)?,
            None => ModuleParams::new(),
        };

        if let Some(path) = &self.src {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::module_args(
                    &self.module,
                    format!("cannot read src '{}': {}", path.display(), e),
                )
            })?;
            params.insert("content".to_string(), Value::String(content));
        }

        let strings = [
            ("content", &self.content),
            ("name", &self.name),
            ("partition", &self.partition),
            ("server", &self.server),
            ("user", &self.user),
            ("password", &self.password),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                params.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        if let Some(state) = self.state {
            params.insert("state".to_string(), Value::String(state.as_str().to_string()));
        }
        if let Some(port) = self.server_port {
            params.insert("server_port".to_string(), Value::from(port));
        }
        if self.force {
            params.insert("force".to_string(), Value::Bool(true));
        }
        if self.no_validate_certs {
            params.insert("validate_certs".to_string(), Value::Bool(false));
        }

        Ok(params)
    }
}

/// Read an args file. Both a flat object and Ansible's
/// `{"ANSIBLE_MODULE_ARGS": {...}}` wrapper are accepted.
pub fn read_args_file(path: &Path, module: &str) -> Result<ModuleParams> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;

    let value = match value {
        Value::Object(mut map) => match map.remove("ANSIBLE_MODULE_ARGS") {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        _ => value,
    };

    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(Error::module_args(
            module,
            format!("args file '{}' must contain a JSON object", path.display()),
        )),
    }
}

/// Copy of `params` with the named keys masked, for logging.
pub fn redact_params(params: &ModuleParams, no_log: &[&str]) -> ModuleParams {
    params
        .iter()
        .map(|(k, v)| {
            if no_log.contains(&k.as_str()) {
                (k.clone(), Value::String(REDACTED.to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}
