use crate::config::{RelayConfig, ValidationError};
use crate::dispatcher::Dispatcher;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT, UPSTREAM_OUTCOME};
use crate::normalizer::{InboundSubmission, SubmissionSchema, routing_value};
use crate::response::Envelope;
use crate::targets::RelayTargets;
use chrono::Utc;
use shared::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// One relay endpoint: normalizes a submission, forwards it to exactly one
/// target and maps the outcome to an envelope.
pub struct Relay {
    name: String,
    path: String,
    routing_key: Option<String>,
    schema: SubmissionSchema,
    targets: RelayTargets,
    dispatcher: Dispatcher,
}

impl Relay {
    /// Builds a relay, resolving target credentials with `env`.
    pub fn from_config<F>(
        config: RelayConfig,
        client: reqwest::Client,
        env: F,
    ) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        config.validate()?;
        let targets = RelayTargets::from_config(&config, env)?;
        let dispatcher = Dispatcher::new(
            client,
            Duration::from_secs(config.timeout_secs),
            config.expects_body_passthrough,
        );

        Ok(Self {
            name: config.name,
            path: config.path,
            routing_key: config.routing_key,
            schema: config.schema.into(),
            targets,
            dispatcher,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn targets(&self) -> &RelayTargets {
        &self.targets
    }

    pub fn is_ready(&self) -> bool {
        self.targets.is_ready()
    }

    /// Relays a submission and returns the caller-facing envelope.
    pub async fn handle(&self, submission: InboundSubmission) -> Envelope {
        let started = Instant::now();
        let _inflight = InflightGuard::new();

        let envelope = self.relay(submission).await;

        histogram!(
            REQUEST_DURATION,
            "relay" => self.name.clone(),
            "outcome" => envelope.outcome.as_str()
        )
        .record(started.elapsed().as_secs_f64());

        envelope
    }

    async fn relay(&self, submission: InboundSubmission) -> Envelope {
        let routing_key = self.routing_key.as_deref();
        let target = self
            .targets
            .select(routing_value(&submission, routing_key));
        let payload = self.schema.normalize(&submission, routing_key, Utc::now());

        tracing::debug!(
            relay = %self.name,
            kind = self.schema.kind(),
            target = %target.key,
            "Dispatching submission"
        );

        let envelope = match self.dispatcher.dispatch(target, &payload).await {
            Ok(result) => Envelope::from_result(result, self.dispatcher.expects_body_passthrough()),
            Err(e) => {
                tracing::error!(relay = %self.name, target = %target.key, error = %e, "Relay is misconfigured");
                Envelope::configuration_error(&e)
            }
        };

        counter!(
            UPSTREAM_OUTCOME,
            "relay" => self.name.clone(),
            "target" => target.key.clone(),
            "outcome" => envelope.outcome.as_str()
        )
        .increment(1);

        envelope
    }
}

/// Tracks a relayed request in the inflight gauge, including requests whose
/// caller went away before the upstream answered.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Outcome;
    use crate::testutils::{StubResponse, StubUpstream};
    use http::StatusCode;
    use serde_json::{Value, json};

    fn submission(value: Value) -> InboundSubmission {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn contact_relay(es: &StubUpstream, en: &StubUpstream) -> Relay {
        let yaml = format!(
            r#"
name: contact
path: /api/contact
expects_body_passthrough: false
routing_key: language
default_target: es
targets:
  es:
    url: "{}"
  en:
    url: "{}"
schema:
  kind: contact
  source: website-contact-form
"#,
            es.url("/hooks/contact-es"),
            en.url("/hooks/contact-en"),
        );
        let config: RelayConfig = serde_yaml::from_str(&yaml).unwrap();
        Relay::from_config(config, reqwest::Client::new(), |_| None).unwrap()
    }

    fn signup_relay(upstream: &StubUpstream, token: Option<&str>) -> Relay {
        let yaml = format!(
            r#"
name: signup
path: /api/signup
expects_body_passthrough: true
default_target: default
targets:
  default:
    url: "{}"
    auth:
      header: X-Api-Token
      token_env: SIGNUP_API_TOKEN
schema:
  kind: signup
"#,
            upstream.url("/api/v1/signup"),
        );
        let config: RelayConfig = serde_yaml::from_str(&yaml).unwrap();
        let token = token.map(String::from);
        Relay::from_config(config, reqwest::Client::new(), move |name| {
            (name == "SIGNUP_API_TOKEN").then(|| token.clone()).flatten()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_contact_routes_by_language() {
        let es = StubUpstream::spawn(StubResponse::new(StatusCode::OK, "")).await;
        let en = StubUpstream::spawn(StubResponse::new(StatusCode::OK, "")).await;
        let relay = contact_relay(&es, &en);

        let envelope = relay
            .handle(submission(json!({"language": "en", "name": "Bob"})))
            .await;

        assert_eq!(envelope.status, StatusCode::OK);
        assert_eq!(envelope.body, json!({"success": true}));
        assert_eq!(en.requests().len(), 1);
        assert!(es.requests().is_empty());

        let forwarded = &en.requests()[0];
        assert_eq!(forwarded.path, "/hooks/contact-en");
        assert_eq!(forwarded.body["name"], json!("Bob"));
        assert_eq!(forwarded.body["source"], json!("website-contact-form"));
        assert!(forwarded.body["submittedAt"].is_string());
        assert!(forwarded.body.get("language").is_none());
    }

    #[tokio::test]
    async fn test_contact_defaults_to_spanish() {
        let es = StubUpstream::spawn(StubResponse::new(StatusCode::OK, "")).await;
        let en = StubUpstream::spawn(StubResponse::new(StatusCode::OK, "")).await;
        let relay = contact_relay(&es, &en);

        for inbound in [
            json!({"name": "Beto"}),
            json!({"name": "Beto", "language": "fr"}),
            json!({"name": "Beto", "language": null}),
        ] {
            let envelope = relay.handle(submission(inbound)).await;
            assert_eq!(envelope.body, json!({"success": true}));
        }

        assert_eq!(es.requests().len(), 3);
        assert!(en.requests().is_empty());
    }

    #[tokio::test]
    async fn test_contact_upstream_failure_collapses_to_500() {
        let es = StubUpstream::spawn(StubResponse::new(StatusCode::SERVICE_UNAVAILABLE, "")).await;
        let en = StubUpstream::spawn(StubResponse::new(StatusCode::OK, "")).await;
        let relay = contact_relay(&es, &en);

        let envelope = relay.handle(submission(json!({"name": "Beto"}))).await;

        assert_eq!(envelope.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(envelope.body["success"], json!(false));
        assert!(envelope.body["error"].is_string());
        assert_eq!(envelope.outcome, Outcome::UpstreamFailed);
    }

    #[tokio::test]
    async fn test_signup_makes_exactly_one_call() {
        let upstream =
            StubUpstream::spawn(StubResponse::new(StatusCode::OK, r#"{"id":42}"#)).await;
        let relay = signup_relay(&upstream, Some("s3cret"));
        assert!(relay.is_ready());

        let envelope = relay
            .handle(submission(json!({
                "firstName": "Ana",
                "lastName": "Lopez",
                "email": "a@x.com",
                "phoneNumber": "713-555-0100",
                "acceptedTerms": true,
                "receiveUpdates": false,
            })))
            .await;

        assert_eq!(envelope.status, StatusCode::OK);
        assert_eq!(envelope.body, json!({"success": true, "id": 42}));

        let requests = upstream.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body["phoneNumber"], json!("7135550100"));
        assert_eq!(requests[0].headers.get("x-api-token").unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn test_signup_without_token_is_not_dispatched() {
        let upstream = StubUpstream::spawn(StubResponse::new(StatusCode::OK, "{}")).await;
        let relay = signup_relay(&upstream, None);
        assert!(!relay.is_ready());

        let envelope = relay.handle(submission(json!({"firstName": "Ana"}))).await;

        assert_eq!(envelope.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(envelope.outcome, Outcome::Misconfigured);
        assert!(
            envelope.body["error"]
                .as_str()
                .unwrap()
                .starts_with("Internal server error: ")
        );
        assert!(upstream.requests().is_empty());
    }
}
