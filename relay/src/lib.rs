pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod metrics_defs;
pub mod normalizer;
pub mod relay;
pub mod response;
pub mod service;
pub mod targets;

#[cfg(test)]
mod testutils;

use crate::errors::RelayError;
use crate::service::{RelayService, Relays};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

/// Builds the HTTP client shared by every relay.
pub fn http_client() -> Result<reqwest::Client, RelayError> {
    reqwest::Client::builder()
        .user_agent(concat!("form-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RelayError::HttpClientError(e.to_string()))
}

/// Serves the relays and the admin endpoints until either listener fails.
pub async fn run(config: config::Config) -> Result<(), RelayError> {
    config.validate()?;

    let relays = Arc::new(Relays::new(&config, http_client()?, |name| {
        std::env::var(name).ok()
    })?);

    for relay in relays.iter() {
        for target in relay.targets().iter() {
            tracing::info!(
                relay = %relay.name(),
                path = %relay.path(),
                target = %target.key,
                upstream = %target.identifier(),
                "Relay target configured"
            );
            if !target.is_ready() {
                tracing::warn!(
                    relay = %relay.name(),
                    target = %target.key,
                    "Credential could not be resolved, requests to this target will fail"
                );
            }
        }
    }

    let relay_service = RelayService::new(relays.clone(), config.max_body_bytes);
    let admin_service = AdminService::<_, RelayError>::new(move || relays.is_ready());

    let relay_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        relay_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(relay_task, admin_task)?;
    Ok(())
}
