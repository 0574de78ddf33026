//! Payload normalization
//!
//! Turns an inbound form submission into the payload sent upstream. Each
//! relay kind has its own field schema; anything outside it is dropped.
//! Nothing here fails: missing fields are omitted and malformed values are
//! passed through or dropped, never rejected.

use crate::config::SchemaConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// A submission as received: field name to JSON value
pub type InboundSubmission = Map<String, Value>;

/// Fields added by the contact relay; never taken from the client
const SUBMITTED_AT: &str = "submittedAt";
const SOURCE: &str = "source";

/// Keeps the decimal digits of `input`, in order.
pub fn digits_only(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

/// Normalizes a phone value. Strings and numbers keep their digits; other
/// JSON types carry no phone number and are dropped.
fn normalize_phone(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(digits_only(s)),
        Value::Number(n) => Some(digits_only(&n.to_string())),
        _ => None,
    }
}

/// Body of a signup request
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_terms: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_updates: Option<Value>,
}

impl SignupPayload {
    pub fn from_submission(submission: &InboundSubmission) -> Self {
        let field = |name: &str| submission.get(name).cloned();

        Self {
            first_name: field("firstName"),
            last_name: field("lastName"),
            email: field("email"),
            phone_number: submission.get("phoneNumber").and_then(normalize_phone),
            accepted_terms: field("acceptedTerms"),
            receive_updates: field("receiveUpdates"),
        }
    }
}

/// Body of a contact webhook request
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub submitted_at: String,
    pub source: String,
}

/// The payload forwarded upstream
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundPayload {
    Signup(SignupPayload),
    Contact(ContactPayload),
}

/// The field schema a relay applies to its submissions
#[derive(Clone, Debug)]
pub enum SubmissionSchema {
    Signup,
    Contact {
        source: String,
        allowed_fields: Vec<String>,
        phone_fields: Vec<String>,
    },
}

impl From<SchemaConfig> for SubmissionSchema {
    fn from(config: SchemaConfig) -> Self {
        match config {
            SchemaConfig::Signup => SubmissionSchema::Signup,
            SchemaConfig::Contact {
                source,
                allowed_fields,
                phone_fields,
            } => SubmissionSchema::Contact {
                source,
                allowed_fields,
                phone_fields,
            },
        }
    }
}

impl SubmissionSchema {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionSchema::Signup => "signup",
            SubmissionSchema::Contact { .. } => "contact",
        }
    }

    /// Builds the outbound payload for `submission`.
    ///
    /// `routing_key` names the field used to pick the target; it is never
    /// forwarded. `submitted_at` is stamped on contact payloads.
    pub fn normalize(
        &self,
        submission: &InboundSubmission,
        routing_key: Option<&str>,
        submitted_at: DateTime<Utc>,
    ) -> OutboundPayload {
        match self {
            SubmissionSchema::Signup => {
                OutboundPayload::Signup(SignupPayload::from_submission(submission))
            }
            SubmissionSchema::Contact {
                source,
                allowed_fields,
                phone_fields,
            } => {
                let mut fields = Map::new();
                for name in allowed_fields {
                    if Some(name.as_str()) == routing_key || name == SUBMITTED_AT || name == SOURCE
                    {
                        continue;
                    }

                    let Some(value) = submission.get(name) else {
                        continue;
                    };

                    if phone_fields.contains(name) {
                        if let Some(phone) = normalize_phone(value) {
                            fields.insert(name.clone(), Value::String(phone));
                        }
                    } else {
                        fields.insert(name.clone(), value.clone());
                    }
                }

                OutboundPayload::Contact(ContactPayload {
                    fields,
                    submitted_at: submitted_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                    source: source.clone(),
                })
            }
        }
    }
}

/// Reads the routing key value from a submission. Non-string values count
/// as absent.
pub fn routing_value<'a>(
    submission: &'a InboundSubmission,
    routing_key: Option<&str>,
) -> Option<&'a str> {
    routing_key
        .and_then(|key| submission.get(key))
        .and_then(Value::as_str)
}
