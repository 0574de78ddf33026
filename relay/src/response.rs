//! Maps relay outcomes to the `{success, ...}` envelope returned to the form.
//!
//! Callers only ever see a short summary on failure. Transport and
//! configuration details stay in the logs.

use crate::dispatcher::RelayResult;
use crate::errors::RelayError;
use http::StatusCode;
use serde_json::{Value, json};
use shared::http::error_envelope;

pub const UPSTREAM_UNAVAILABLE: &str = "Internal server error: upstream service unavailable";

/// Terminal state of a relayed request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    UpstreamFailed,
    TransportFailed,
    Misconfigured,
}

impl Outcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::UpstreamFailed => "upstream_failed",
            Outcome::TransportFailed => "transport_failed",
            Outcome::Misconfigured => "misconfigured",
        }
    }
}

/// Caller-facing status and body
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub status: StatusCode,
    pub body: Value,
    pub outcome: Outcome,
}

impl Envelope {
    /// Builds the envelope for a dispatch result.
    ///
    /// Passthrough relays return the upstream status with the upstream body
    /// merged into the success envelope, and propagate the upstream status on
    /// failure. Other relays answer a fixed acknowledgment and collapse
    /// upstream failures to 500.
    pub fn from_result(result: RelayResult, expects_body_passthrough: bool) -> Self {
        match result {
            RelayResult::Success { status, body } => {
                let (status, body) = match (expects_body_passthrough, body) {
                    (true, Some(body)) => (passthrough_status(status), success_envelope(body)),
                    _ => (StatusCode::OK, json!({ "success": true })),
                };
                Envelope {
                    status,
                    body,
                    outcome: Outcome::Succeeded,
                }
            }
            RelayResult::UpstreamError(upstream_status) => {
                let status = if expects_body_passthrough {
                    upstream_status
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                Envelope {
                    status,
                    body: error_envelope(&format!(
                        "Upstream service responded with status {}",
                        upstream_status.as_u16()
                    )),
                    outcome: Outcome::UpstreamFailed,
                }
            }
            RelayResult::TransportError(_) => Envelope {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: error_envelope(UPSTREAM_UNAVAILABLE),
                outcome: Outcome::TransportFailed,
            },
        }
    }

    /// Envelope for a request that could not be dispatched because the
    /// relay's static configuration is incomplete.
    pub fn configuration_error(error: &RelayError) -> Self {
        let message = match error {
            RelayError::MissingCredential(_) => "Internal server error: missing API credential",
            _ => "Internal server error: relay misconfigured",
        };
        Envelope {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: error_envelope(message),
            outcome: Outcome::Misconfigured,
        }
    }
}

/// 2xx statuses that cannot carry a body are answered with 200 so the
/// envelope reaches the caller.
fn passthrough_status(status: StatusCode) -> StatusCode {
    match status {
        StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT => StatusCode::OK,
        status => status,
    }
}

/// `{"success": true, ...}` around an upstream body. Objects keep their keys,
/// anything else is nested under `data`.
fn success_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut fields) => {
            fields.insert("success".to_string(), Value::Bool(true));
            Value::Object(fields)
        }
        data => json!({ "success": true, "data": data }),
    }
}
