use crate::config::{Config, ValidationError};
use crate::errors::RelayError;
use crate::normalizer::InboundSubmission;
use crate::relay::Relay;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{ALLOW, HeaderValue};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::Value;
use shared::http::{error_envelope, json_response, make_error_response};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type RelayBody = BoxBody<Bytes, RelayError>;

/// All configured relays, keyed by the path they are mounted on
pub struct Relays {
    by_path: HashMap<String, Relay>,
}

impl Relays {
    /// Builds every relay in `config`, resolving credentials with `env`.
    pub fn new<F>(config: &Config, client: reqwest::Client, env: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut by_path = HashMap::with_capacity(config.relays.len());
        for relay_config in &config.relays {
            let relay = Relay::from_config(relay_config.clone(), client.clone(), &env)?;
            if by_path.contains_key(relay.path()) {
                return Err(ValidationError::DuplicatePath(relay.path().to_string()));
            }
            by_path.insert(relay.path().to_string(), relay);
        }

        Ok(Self { by_path })
    }

    pub fn get(&self, path: &str) -> Option<&Relay> {
        self.by_path.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relay> {
        self.by_path.values()
    }

    /// True when every relay can dispatch to all of its targets
    pub fn is_ready(&self) -> bool {
        self.by_path.values().all(Relay::is_ready)
    }
}

/// hyper service accepting form submissions on the relays' paths
#[derive(Clone)]
pub struct RelayService {
    relays: Arc<Relays>,
    max_body_bytes: usize,
}

impl RelayService {
    pub fn new(relays: Arc<Relays>, max_body_bytes: usize) -> Self {
        Self {
            relays,
            max_body_bytes,
        }
    }
}

impl Service<Request<Incoming>> for RelayService {
    type Response = Response<RelayBody>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let relays = self.relays.clone();
        let max_body_bytes = self.max_body_bytes;

        Box::pin(async move { Ok(handle_request(&relays, req, max_body_bytes).await) })
    }
}

/// Routes a request to its relay and always answers with a JSON envelope.
pub async fn handle_request<B>(
    relays: &Relays,
    req: Request<B>,
    max_body_bytes: usize,
) -> Response<RelayBody>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let Some(relay) = relays.get(req.uri().path()) else {
        tracing::warn!(
            method = %req.method(),
            path = %req.uri().path(),
            "No relay matched"
        );
        return make_error_response(StatusCode::NOT_FOUND);
    };

    if req.method() != Method::POST {
        let mut response = make_error_response(StatusCode::METHOD_NOT_ALLOWED);
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return response;
    }

    let submission = match read_submission(req.into_body(), max_body_bytes).await {
        Ok(submission) => submission,
        Err(e) => {
            tracing::info!(relay = %relay.name(), error = %e, "Rejected request body");
            let status = match e {
                RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            };
            return json_response(status, &error_envelope(&e.to_string()));
        }
    };

    let envelope = relay.handle(submission).await;
    json_response(envelope.status, &envelope.body)
}

/// Reads a body of at most `limit` bytes holding a JSON object.
async fn read_submission<B>(body: B, limit: usize) -> Result<InboundSubmission, RelayError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                RelayError::PayloadTooLarge(limit)
            } else {
                RelayError::RequestBodyError(e.to_string())
            }
        })?
        .to_bytes();

    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(submission)) => Ok(submission),
        Ok(_) => Err(RelayError::InvalidSubmission(
            "expected a JSON object".to_string(),
        )),
        Err(e) => Err(RelayError::InvalidSubmission(e.to_string())),
    }
}
