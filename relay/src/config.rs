use http::HeaderName;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty relay name")]
    EmptyRelayName,

    #[error("Duplicate relay name: {0}")]
    DuplicateRelay(String),

    #[error("Duplicate relay path: {0}")]
    DuplicatePath(String),

    #[error("Relay path must start with '/': {0:?}")]
    InvalidPath(String),

    #[error("Relay {0} has no targets")]
    NoTargets(String),

    #[error("Relay {relay} references unknown default target: {target}")]
    UnknownDefaultTarget { relay: String, target: String },

    #[error("Relay {0} has a timeout of 0 seconds")]
    ZeroTimeout(String),

    #[error("Relay {relay} has an invalid auth header name: {header:?}")]
    InvalidHeaderName { relay: String, header: String },

    #[error("Relay {0} has an empty source tag")]
    EmptySource(String),

    #[error("max_body_bytes cannot be 0")]
    ZeroBodyLimit,
}

/// Relay service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener receiving form submissions
    pub listener: Listener,
    /// Admin listener for health and readiness checks
    pub admin_listener: Listener,
    /// Upper bound on an inbound request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Relays mounted on the main listener
    pub relays: Vec<RelayConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.max_body_bytes == 0 {
            return Err(ValidationError::ZeroBodyLimit);
        }

        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for relay in &self.relays {
            relay.validate()?;

            if !names.insert(&relay.name) {
                return Err(ValidationError::DuplicateRelay(relay.name.clone()));
            }
            if !paths.insert(&relay.path) {
                return Err(ValidationError::DuplicatePath(relay.path.clone()));
            }
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// One relay endpoint and the upstreams it may forward to
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// Name used in logs and metric tags
    pub name: String,
    /// Path the relay is mounted on (e.g., "/api/signup")
    pub path: String,
    /// Bound on the whole upstream exchange
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Return the upstream body verbatim (true) or a fixed `{"success": true}` (false)
    pub expects_body_passthrough: bool,
    /// Submission field selecting the target. Absent means every request
    /// goes to `default_target`.
    #[serde(default)]
    pub routing_key: Option<String>,
    /// Target used when the routing key is missing or unrecognized
    pub default_target: String,
    /// Targets by routing key value, in declaration order
    pub targets: IndexMap<String, TargetConfig>,
    /// Field schema of the submissions this relay accepts
    pub schema: SchemaConfig,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyRelayName);
        }

        if !self.path.starts_with('/') {
            return Err(ValidationError::InvalidPath(self.path.clone()));
        }

        if self.timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout(self.name.clone()));
        }

        if self.targets.is_empty() {
            return Err(ValidationError::NoTargets(self.name.clone()));
        }

        if !self.targets.contains_key(&self.default_target) {
            return Err(ValidationError::UnknownDefaultTarget {
                relay: self.name.clone(),
                target: self.default_target.clone(),
            });
        }

        for target in self.targets.values() {
            if let Some(auth) = &target.auth
                && HeaderName::from_bytes(auth.header.as_bytes()).is_err()
            {
                return Err(ValidationError::InvalidHeaderName {
                    relay: self.name.clone(),
                    header: auth.header.clone(),
                });
            }
        }

        if let SchemaConfig::Contact { source, .. } = &self.schema
            && source.is_empty()
        {
            return Err(ValidationError::EmptySource(self.name.clone()));
        }

        Ok(())
    }
}

/// Upstream a relay can forward to
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// Destination URL, validated during deserialization
    pub url: Url,
    /// Static credential attached to every request
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

/// A pre-shared token sent as a fixed header
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Header name, e.g. "X-Api-Token"
    pub header: String,
    #[serde(flatten)]
    pub token: TokenSource,
}

#[derive(Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TokenSource {
    /// Read from the named environment variable at start-up
    Env { token_env: String },
    /// Inline in the config file
    Inline { token: String },
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Env { token_env } => {
                f.debug_struct("Env").field("token_env", token_env).finish()
            }
            TokenSource::Inline { .. } => f
                .debug_struct("Inline")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Field schema of a relay's submissions
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaConfig {
    /// Client portal signup: a fixed set of fields
    Signup,
    /// Contact form: an allow-list of fields plus request metadata
    Contact {
        /// Fixed `source` tag added to every payload
        source: String,
        #[serde(default = "default_contact_fields")]
        allowed_fields: Vec<String>,
        #[serde(default = "default_phone_fields")]
        phone_fields: Vec<String>,
    },
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_contact_fields() -> Vec<String> {
    [
        "name",
        "firstName",
        "lastName",
        "email",
        "phone",
        "phoneNumber",
        "subject",
        "message",
        "caseType",
        "preferredContact",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_phone_fields() -> Vec<String> {
    vec!["phone".to_string(), "phoneNumber".to_string()]
}
