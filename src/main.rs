//! rustible-bigip - manage TCL iApp templates on F5 BIG-IP devices
//!
//! Runs a single module pass and prints the result as JSON on stdout, the
//! way an Ansible module reports back to its controller.

use anyhow::{Context, Result};
use rustible_bigip::cli::{redact_params, Cli};
use rustible_bigip::config::Config;
use rustible_bigip::error::Error;
use rustible_bigip::modules::{ModuleContext, ModuleOutput, ModuleRegistry};
use rustible_bigip::telemetry::LoggingBuilder;
use rustible_bigip::VERSION;
use std::process::ExitCode;
use tracing::{debug, warn};

fn main() -> ExitCode {
    // Parse command line arguments
    let cli = Cli::parse_args();

    match run(&cli) {
        Ok(output) => {
            println!("{}", output.to_result_json());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!(
                "{}",
                serde_json::json!({ "failed": true, "msg": format!("{:#}", e) })
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ModuleOutput> {
    // Load configuration; a broken file falls back to defaults
    let (config, config_error) = match Config::load(cli.config.as_ref()) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(cli, &config)?;
    debug!("rustible-bigip v{}", VERSION);

    if let Some(e) = config_error {
        warn!("Failed to load config, using defaults: {}", e);
    }

    let registry = ModuleRegistry::from_config(&config);
    let module = registry
        .get(&cli.module)
        .ok_or_else(|| Error::ModuleNotFound(cli.module.clone()))?;

    let params = cli.module_params()?;
    let context = ModuleContext::new().with_check_mode(cli.check_mode(&params));
    debug!(
        module = %cli.module,
        params = ?redact_params(&params, module.no_log_params()),
        check_mode = context.check_mode,
        "Executing module"
    );

    registry
        .execute(&cli.module, &params, &context)
        .map_err(|e| Error::from_module(&cli.module, e).into())
}

/// Initialize logging from config, with `-v` flags taking precedence
fn init_logging(cli: &Cli, config: &Config) -> Result<()> {
    LoggingBuilder::from_config(&config.logging)
        .unwrap_or_default()
        .with_verbosity(cli.verbosity())
        .init()
        .context("logging setup")
}
