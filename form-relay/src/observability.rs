//! Process-wide logging, error reporting and metrics setup.

use crate::config::{CommonConfig, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(thiserror::Error, Debug)]
pub enum ObservabilityError {
    #[error("invalid sentry dsn: {0}")]
    InvalidDsn(String),
    #[error("could not create statsd recorder: {0}")]
    Statsd(String),
    #[error("a global metrics recorder is already installed")]
    RecorderAlreadySet,
    #[error("could not install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Keeps the sentry client alive; events are flushed when dropped.
pub struct ObservabilityGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

pub fn init(common: &CommonConfig) -> Result<ObservabilityGuard, ObservabilityError> {
    let default_logging = LoggingConfig::default();
    let logging = common.logging.as_ref().unwrap_or(&default_logging);

    let sentry = init_sentry(logging)?;
    init_logging(logging, sentry.is_some())?;

    if let Some(metrics) = &common.metrics {
        init_metrics(metrics)?;
    }

    Ok(ObservabilityGuard { _sentry: sentry })
}

fn init_sentry(logging: &LoggingConfig) -> Result<Option<sentry::ClientInitGuard>, ObservabilityError> {
    let Some(dsn) = logging.sentry_dsn.as_deref() else {
        return Ok(None);
    };

    let dsn = dsn
        .parse::<sentry::types::Dsn>()
        .map_err(|e| ObservabilityError::InvalidDsn(e.to_string()))?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        release: sentry::release_name!(),
        environment: logging.environment.clone().map(Into::into),
        ..Default::default()
    });

    Ok(Some(guard))
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig, with_sentry: bool) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| ObservabilityError::Subscriber(e.to_string()))?;

    let sentry_layer = with_sentry.then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(sentry_layer)
        .try_init()
        .map_err(|e| ObservabilityError::Subscriber(e.to_string()))
}

fn init_metrics(config: &MetricsConfig) -> Result<(), ObservabilityError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(&config.prefix))
        .map_err(|e| ObservabilityError::Statsd(e.to_string()))?;

    metrics::set_global_recorder(recorder).map_err(|_| ObservabilityError::RecorderAlreadySet)?;
    shared::metrics_defs::describe_all(relay::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        prefix = %config.prefix,
        "Reporting metrics to statsd"
    );
    Ok(())
}
