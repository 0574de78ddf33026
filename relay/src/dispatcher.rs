use crate::errors::RelayError;
use crate::normalizer::OutboundPayload;
use crate::targets::RelayTarget;
use http::StatusCode;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;

/// Outcome of a single upstream exchange
#[derive(Clone, Debug, PartialEq)]
pub enum RelayResult {
    /// 2xx from upstream. `body` is the parsed JSON body in passthrough mode
    /// and `None` otherwise.
    Success {
        status: StatusCode,
        body: Option<Value>,
    },
    /// Non-2xx from upstream; the body is not inspected
    UpstreamError(StatusCode),
    /// The exchange did not complete: connect error, timeout or unusable body
    TransportError(String),
}

/// Sends outbound payloads to relay targets
///
/// Every call to [`Dispatcher::dispatch`] makes at most one upstream request
/// and never retries.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    timeout: Duration,
    expects_body_passthrough: bool,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, timeout: Duration, expects_body_passthrough: bool) -> Self {
        Self {
            client,
            timeout,
            expects_body_passthrough,
        }
    }

    pub fn expects_body_passthrough(&self) -> bool {
        self.expects_body_passthrough
    }

    /// Sends `payload` to `target` and classifies the outcome.
    ///
    /// Returns an error only when the target's static credential is missing,
    /// in which case no request is made.
    ///
    /// # Timeout Behavior
    ///
    /// The timeout covers the whole exchange: connecting, sending the
    /// request, receiving the headers and, in passthrough mode, reading the
    /// complete response body.
    pub async fn dispatch(
        &self,
        target: &RelayTarget,
        payload: &OutboundPayload,
    ) -> Result<RelayResult, RelayError> {
        let credential = target
            .credential
            .as_ref()
            .map(|credential| credential.header_pair())
            .transpose()?;

        let mut request = self
            .client
            .post(target.url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(payload);

        if let Some((name, value)) = credential {
            request = request.header(name.clone(), value.clone());
        }

        let upstream = target.identifier();
        let result = timeout(self.timeout, self.exchange(request, upstream))
            .await
            .map_err(|_| RelayError::UpstreamTimeout(upstream.to_string()))
            .and_then(|result| result);

        Ok(match result {
            Ok(RelayResult::UpstreamError(status)) => {
                tracing::warn!(
                    upstream = %upstream,
                    status = %status,
                    "Upstream responded with non-success status"
                );
                RelayResult::UpstreamError(status)
            }
            Ok(result) => result,
            Err(e) => {
                tracing::error!(upstream = %upstream, error = %e, "Upstream request failed");
                RelayResult::TransportError(e.to_string())
            }
        })
    }

    async fn exchange(
        &self,
        request: reqwest::RequestBuilder,
        upstream: &str,
    ) -> Result<RelayResult, RelayError> {
        let response = request.send().await.map_err(|e| {
            RelayError::UpstreamRequestFailed(upstream.to_string(), e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Ok(RelayResult::UpstreamError(status));
        }

        if !self.expects_body_passthrough {
            return Ok(RelayResult::Success { status, body: None });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::ResponseBodyError(e.to_string()))?;

        // An empty 2xx body carries nothing to pass through
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| RelayError::MalformedResponse(upstream.to_string(), e.to_string()))?
        };

        Ok(RelayResult::Success {
            status,
            body: Some(body),
        })
    }
}
