mod config;
mod observability;

use clap::Parser;
use config::{Config, ConfigError};
use observability::ObservabilityError;
use relay::config::ValidationError;
use relay::errors::RelayError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "form-relay", version, about = "Relays website form submissions to upstream services")]
enum CliCommand {
    /// Serve the relays and the admin endpoints
    Run {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit
    CheckConfig {
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Observability(#[from] ObservabilityError),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

fn main() -> ExitCode {
    let result = match CliCommand::parse() {
        CliCommand::Run { config } => run(&config),
        CliCommand::CheckConfig { config } => check_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The subscriber may not be installed yet
            eprintln!("form-relay: {e}");
            tracing::error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}

fn load(path: &Path) -> Result<Config, CliError> {
    let config = Config::from_file(path)?;
    config.relay.validate()?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<(), CliError> {
    let config = load(path)?;

    for relay in &config.relay.relays {
        println!(
            "{} {} -> {} target(s), default {}",
            relay.name,
            relay.path,
            relay.targets.len(),
            relay.default_target
        );
    }
    for name in config.inline_token_relays() {
        println!("warning: relay {name} has a token written in the config file");
    }
    Ok(())
}

fn run(path: &Path) -> Result<(), CliError> {
    let config = load(path)?;
    let _guard = observability::init(&config.common)?;

    for name in config.inline_token_relays() {
        tracing::warn!(relay = name, "Token is set inline, prefer token_env");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting form-relay");
    rt.block_on(relay::run(config.relay))?;
    Ok(())
}
