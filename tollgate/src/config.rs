use std::time::Duration;

use aliri::{jwa, jwt};
use serde::Deserialize;
use serde_json::Value;

use crate::{metadata::ServerKind, ConfigError};

/// One trusted authorization server, as configured
///
/// Either `metadata` is given inline, or `issuer` is given and the
/// metadata is discovered on first use.
///
/// ```json
/// { "type": "oidc", "issuer": "https://idp.example" }
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct AuthorizationServerConfig {
    /// The flavor of authorization server
    #[serde(rename = "type")]
    pub kind: ServerKind,
    /// Inline metadata, using `snake_case` wire names
    #[serde(default)]
    pub metadata: Option<Value>,
    /// The issuer whose metadata is to be discovered
    #[serde(default)]
    pub issuer: Option<String>,
}

impl AuthorizationServerConfig {
    /// An authorization server with metadata known up front
    pub fn resolved(kind: ServerKind, metadata: Value) -> Self {
        Self {
            kind,
            metadata: Some(metadata),
            issuer: None,
        }
    }

    /// An authorization server whose metadata is discovered from its
    /// issuer
    pub fn discovery(kind: ServerKind, issuer: impl Into<String>) -> Self {
        Self {
            kind,
            metadata: None,
            issuer: Some(issuer.into()),
        }
    }
}

/// One protected resource and the authorization servers it trusts
#[derive(Clone, Debug, Deserialize)]
pub struct ProtectedResourceConfig {
    /// The resource identifier
    pub resource: String,
    /// The authorization servers trusted for the resource
    pub authorization_servers: Vec<AuthorizationServerConfig>,
    /// The scopes advertised for the resource
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
}

/// The full trust configuration of a resource server
///
/// Exactly one of `authorization_server` (a single server trusted for
/// every request) or `protected_resources` must be given.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// The single authorization server trusted for every request
    #[serde(default)]
    pub authorization_server: Option<AuthorizationServerConfig>,
    /// The resource identifier advertised alongside the single
    /// authorization server
    #[serde(default)]
    pub resource: Option<String>,
    /// The scopes advertised alongside the single authorization server
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
    /// Protected resources, each with its own trusted servers
    #[serde(default)]
    pub protected_resources: Option<Vec<ProtectedResourceConfig>>,
}

impl RegistryConfig {
    /// Trusts a single authorization server for every request
    pub fn legacy(server: AuthorizationServerConfig) -> Self {
        Self {
            authorization_server: Some(server),
            ..Self::default()
        }
    }

    /// Trusts authorization servers per protected resource
    pub fn multi_resource(resources: Vec<ProtectedResourceConfig>) -> Self {
        Self {
            protected_resources: Some(resources),
            ..Self::default()
        }
    }

    /// Sets the resource identifier advertised in single-server mode
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Decodes a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Rules handed to the token verification primitive
///
/// By default, expiration is enforced with no leeway, `nbf` is not
/// required, and any algorithm compatible with the selected key is
/// accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct VerifyOptions {
    leeway: Duration,
    algorithms: Vec<jwa::Algorithm>,
    check_not_before: bool,
}

impl VerifyOptions {
    /// Default verification options
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows a grace period on either side of `exp` and `nbf`
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Restricts the accepted signing algorithms
    ///
    /// May be called more than once.
    pub fn allow_algorithm(mut self, alg: jwa::Algorithm) -> Self {
        if !self.algorithms.contains(&alg) {
            self.algorithms.push(alg);
        }
        self
    }

    /// Requires and enforces the `nbf` claim
    pub fn check_not_before(mut self) -> Self {
        self.check_not_before = true;
        self
    }

    pub(crate) fn validator(&self, issuer: &str) -> jwt::CoreValidator {
        let mut validator = jwt::CoreValidator::default()
            .with_leeway(self.leeway)
            .extend_approved_algorithms(self.algorithms.iter().copied())
            .require_issuer(jwt::Issuer::new(issuer.to_owned()));

        if self.check_not_before {
            validator = validator.check_not_before();
        }

        validator
    }
}
