use relay::config::{Config as RelayConfig, TokenSource};
use serde::Deserialize;
use std::fs::File;

#[derive(Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            sentry_dsn: None,
            environment: None,
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(flatten)]
    pub relay: RelayConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Relays whose tokens are written in the config file rather than
    /// read from the environment.
    pub fn inline_token_relays(&self) -> Vec<&str> {
        self.relay
            .relays
            .iter()
            .filter(|relay| {
                relay.targets.values().any(|target| {
                    matches!(
                        target.auth.as_ref().map(|auth| &auth.token),
                        Some(TokenSource::Inline { .. })
                    )
                })
            })
            .map(|relay| relay.name.as_str())
            .collect()
    }
}

fn default_metrics_prefix() -> String {
    "form_relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
