//! Relay Targets
//!
//! Maps routing key values to the upstreams a relay forwards to.
//!
//! # Model
//!
//! ```text
//! Relay "contact" (routing key "language", default "es")
//!   ├─ "es" → RelayTarget { url: "https://hooks.example.com/contact-es" }
//!   └─ "en" → RelayTarget { url: "https://hooks.example.com/contact-en" }
//! ```
//!
//! Credentials are resolved once when the table is built. A credential that
//! cannot be resolved is kept as missing so the relay still starts, reports
//! not ready, and answers requests for that target with a configuration
//! error instead of sending them unauthenticated.
//!
//! The table is immutable during request processing.

use crate::config::{AuthConfig, RelayConfig, TokenSource, ValidationError};
use crate::errors::RelayError;
use http::{HeaderName, HeaderValue};
use indexmap::IndexMap;
use std::fmt;
use url::Url;

/// A pre-shared token attached to every request as a fixed header
#[derive(Clone)]
pub struct StaticCredential {
    header: HeaderName,
    value: Option<HeaderValue>,
    /// Where the token was expected to come from, for error messages
    origin: String,
}

impl StaticCredential {
    /// Resolves the configured token, looking up environment variables with `env`.
    pub fn resolve<F>(auth: &AuthConfig, env: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let header = HeaderName::from_bytes(auth.header.as_bytes()).map_err(|_| {
            ValidationError::InvalidHeaderName {
                relay: String::new(),
                header: auth.header.clone(),
            }
        })?;

        let (token, origin) = match &auth.token {
            TokenSource::Env { token_env } => {
                (env(token_env), format!("environment variable {token_env}"))
            }
            TokenSource::Inline { token } => (Some(token.clone()), "inline token".to_string()),
        };

        let value = token
            .filter(|token| !token.is_empty())
            .and_then(|token| HeaderValue::from_str(&token).ok())
            .map(|mut value| {
                value.set_sensitive(true);
                value
            });

        Ok(Self {
            header,
            value,
            origin,
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }

    /// The header to attach, or an error naming what is missing.
    pub fn header_pair(&self) -> Result<(&HeaderName, &HeaderValue), RelayError> {
        match &self.value {
            Some(value) => Ok((&self.header, value)),
            None => Err(RelayError::MissingCredential(format!(
                "{} for header {}",
                self.origin, self.header
            ))),
        }
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredential")
            .field("header", &self.header)
            .field("resolved", &self.is_resolved())
            .field("origin", &self.origin)
            .finish()
    }
}

/// A single upstream a relay can dispatch to
#[derive(Clone, Debug)]
pub struct RelayTarget {
    /// Routing key value selecting this target
    pub key: String,
    pub url: Url,
    pub credential: Option<StaticCredential>,
}

impl RelayTarget {
    /// Host used to identify the target in logs and errors
    pub fn identifier(&self) -> &str {
        self.url.host_str().unwrap_or(self.url.as_str())
    }

    pub fn is_ready(&self) -> bool {
        self.credential
            .as_ref()
            .is_none_or(StaticCredential::is_resolved)
    }
}

/// A relay's targets keyed by routing key value, with a designated default
#[derive(Clone, Debug)]
pub struct RelayTargets {
    /// Targets in declaration order
    targets: IndexMap<String, RelayTarget>,
    /// Index of the default target in `targets`
    default_index: usize,
}

impl RelayTargets {
    /// Builds the table for a relay, resolving credentials with `env`.
    pub fn from_config<F>(config: &RelayConfig, env: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut targets = IndexMap::with_capacity(config.targets.len());
        for (key, target) in &config.targets {
            let credential = target
                .auth
                .as_ref()
                .map(|auth| StaticCredential::resolve(auth, &env))
                .transpose()
                .map_err(|e| match e {
                    ValidationError::InvalidHeaderName { header, .. } => {
                        ValidationError::InvalidHeaderName {
                            relay: config.name.clone(),
                            header,
                        }
                    }
                    other => other,
                })?;

            targets.insert(
                key.clone(),
                RelayTarget {
                    key: key.clone(),
                    url: target.url.clone(),
                    credential,
                },
            );
        }

        let default_index = targets.get_index_of(&config.default_target).ok_or_else(|| {
            ValidationError::UnknownDefaultTarget {
                relay: config.name.clone(),
                target: config.default_target.clone(),
            }
        })?;

        Ok(Self {
            targets,
            default_index,
        })
    }

    /// Selects the target for a routing key value.
    ///
    /// Missing or unrecognized keys select the default target.
    pub fn select(&self, key: Option<&str>) -> &RelayTarget {
        key.and_then(|key| self.targets.get(key))
            .unwrap_or(&self.targets[self.default_index])
    }

    pub fn default_target(&self) -> &RelayTarget {
        &self.targets[self.default_index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelayTarget> {
        self.targets.values()
    }

    /// True when every target's credential has been resolved
    pub fn is_ready(&self) -> bool {
        self.targets.values().all(RelayTarget::is_ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchemaConfig, TargetConfig};

    fn target_config(url: &str, auth: Option<AuthConfig>) -> TargetConfig {
        TargetConfig {
            url: Url::parse(url).unwrap(),
            auth,
        }
    }

    fn contact_config() -> RelayConfig {
        RelayConfig {
            name: "contact".to_string(),
            path: "/api/contact".to_string(),
            timeout_secs: 10,
            expects_body_passthrough: false,
            routing_key: Some("language".to_string()),
            default_target: "es".to_string(),
            targets: IndexMap::from([
                (
                    "es".to_string(),
                    target_config("https://hooks.example.com/contact-es", None),
                ),
                (
                    "en".to_string(),
                    target_config("https://hooks.example.com/contact-en", None),
                ),
            ]),
            schema: SchemaConfig::Contact {
                source: "website".to_string(),
                allowed_fields: vec!["name".to_string()],
                phone_fields: vec![],
            },
        }
    }

    fn token_env_auth(var: &str) -> AuthConfig {
        AuthConfig {
            header: "X-Api-Token".to_string(),
            token: TokenSource::Env {
                token_env: var.to_string(),
            },
        }
    }

    #[test]
    fn test_select_by_key() {
        let targets = RelayTargets::from_config(&contact_config(), |_| None).unwrap();

        assert_eq!(targets.select(Some("en")).key, "en");
        assert_eq!(targets.select(Some("es")).key, "es");
        assert_eq!(
            targets.select(Some("en")).url.as_str(),
            "https://hooks.example.com/contact-en"
        );
    }

    #[test]
    fn test_select_falls_back_to_default() {
        let targets = RelayTargets::from_config(&contact_config(), |_| None).unwrap();

        assert_eq!(targets.select(None).key, "es");
        assert_eq!(targets.select(Some("fr")).key, "es");
        assert_eq!(targets.select(Some("EN")).key, "es");
        assert_eq!(targets.select(Some("")).key, "es");
        assert_eq!(targets.default_target().key, "es");
    }

    #[test]
    fn test_unknown_default_target() {
        let mut config = contact_config();
        config.default_target = "de".to_string();

        assert!(matches!(
            RelayTargets::from_config(&config, |_| None).unwrap_err(),
            ValidationError::UnknownDefaultTarget { .. }
        ));
    }

    #[test]
    fn test_credentials_resolved_from_env() {
        let mut config = contact_config();
        config.targets["es"].auth = Some(token_env_auth("CONTACT_TOKEN"));

        let targets = RelayTargets::from_config(&config, |name| {
            (name == "CONTACT_TOKEN").then(|| "s3cret".to_string())
        })
        .unwrap();
        assert!(targets.is_ready());

        let credential = targets.select(None).credential.as_ref().unwrap();
        let (name, value) = credential.header_pair().unwrap();
        assert_eq!(name, "x-api-token");
        assert_eq!(value, "s3cret");
        assert!(value.is_sensitive());
        assert!(!format!("{credential:?}").contains("s3cret"));

        // Targets without auth carry no credential
        assert!(targets.select(Some("en")).credential.is_none());
    }

    #[test]
    fn test_missing_credential() {
        let mut config = contact_config();
        config.targets["es"].auth = Some(token_env_auth("UNSET_TOKEN"));

        let targets = RelayTargets::from_config(&config, |_| None).unwrap();
        assert!(!targets.is_ready());

        let credential = targets.select(None).credential.as_ref().unwrap();
        let err = credential.header_pair().unwrap_err();
        assert!(matches!(err, RelayError::MissingCredential(_)));
        assert!(err.to_string().contains("UNSET_TOKEN"));

        // An empty variable counts as missing
        let targets = RelayTargets::from_config(&config, |_| Some(String::new())).unwrap();
        assert!(!targets.is_ready());
    }

    #[test]
    fn test_inline_credential() {
        let mut config = contact_config();
        config.targets["en"].auth = Some(AuthConfig {
            header: "Authorization".to_string(),
            token: TokenSource::Inline {
                token: "Bearer abc".to_string(),
            },
        });

        let targets = RelayTargets::from_config(&config, |_| None).unwrap();
        assert!(targets.is_ready());
        let credential = targets.select(Some("en")).credential.as_ref().unwrap();
        let (name, value) = credential.header_pair().unwrap();
        assert_eq!(name, "authorization");
        assert_eq!(value, "Bearer abc");
    }
}
