use std::{fmt::Write, sync::Arc};

use aliri::JwtRef;
use aliri_traits::Policy;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::{
    IdentityContext, RequiredScopes, ResolveError, ScopeToken, VerifierRegistry, VerifyError,
    VerifyOptions,
};

/// Per-route requirements for the bearer decision pipeline
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct BearerAuthOptions {
    resource: Option<String>,
    required_audience: Option<String>,
    required_scopes: RequiredScopes,
    show_error_details: bool,
    resource_metadata_url: Option<String>,
}

impl BearerAuthOptions {
    /// No audience or scope requirements, no error details
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the protected resource the request targets
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Requires the token's `aud` claim to name `audience`
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.required_audience = Some(audience.into());
        self
    }

    /// Requires the token to have been granted `scope`
    pub fn require_scope(mut self, scope: ScopeToken) -> Self {
        self.required_scopes.insert(scope);
        self
    }

    /// Requires the token to have been granted every scope in `scopes`
    pub fn with_required_scopes(mut self, scopes: RequiredScopes) -> Self {
        self.required_scopes = scopes;
        self
    }

    /// Whether failure responses include internal error details
    ///
    /// Off by default.
    pub fn show_error_details(mut self, show: bool) -> Self {
        self.show_error_details = show;
        self
    }

    /// Advertises where the resource's protected resource metadata lives
    pub fn with_resource_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.resource_metadata_url = Some(url.into());
        self
    }

    /// The protected resource the request targets
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The audience the token must name
    pub fn required_audience(&self) -> Option<&str> {
        self.required_audience.as_deref()
    }

    /// The scopes the token must have been granted
    pub fn required_scopes(&self) -> &RequiredScopes {
        &self.required_scopes
    }

    /// Whether failure responses include internal error details
    pub fn shows_error_details(&self) -> bool {
        self.show_error_details
    }

    /// Where the resource's protected resource metadata lives
    pub fn resource_metadata_url(&self) -> Option<&str> {
        self.resource_metadata_url.as_deref()
    }
}

/// A request was refused by the bearer decision pipeline
///
/// Carries an OAuth 2.0 style error code and the HTTP status to answer
/// with.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{code}: {description}")]
pub struct AuthFailure {
    code: &'static str,
    status: StatusCode,
    description: String,
    cause: Option<String>,
    missing_scopes: Option<Vec<ScopeToken>>,
}

impl AuthFailure {
    fn new(code: &'static str, status: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            status,
            description: description.into(),
            cause: None,
            missing_scopes: None,
        }
    }

    fn unauthorized(code: &'static str, description: impl Into<String>) -> Self {
        Self::new(code, StatusCode::UNAUTHORIZED, description)
    }

    fn server(code: &'static str, description: impl Into<String>) -> Self {
        Self::new(code, StatusCode::INTERNAL_SERVER_ERROR, description)
    }

    fn caused_by(mut self, error: &(dyn std::error::Error + 'static)) -> Self {
        self.cause = Some(error_chain(error));
        self
    }

    /// The OAuth 2.0 style error code, such as `invalid_token`
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// The HTTP status to answer with
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// A human-readable description of the failure
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Internal detail about the failure
    ///
    /// Only shown to callers when error details are enabled.
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// Every required scope the token was not granted
    pub fn missing_scopes(&self) -> Option<&[ScopeToken]> {
        self.missing_scopes.as_deref()
    }

    /// Whether the token was valid but lacked scope
    pub fn is_insufficient_scope(&self) -> bool {
        self.status == StatusCode::FORBIDDEN
    }

    /// The JSON body describing the failure
    pub fn body(&self, show_error_details: bool) -> ErrorBody {
        ErrorBody {
            error: self.code,
            error_description: self.description.clone(),
            missing_scopes: self
                .missing_scopes
                .as_ref()
                .map(|scopes| scopes.iter().map(|s| s.as_str().to_owned()).collect()),
            cause: if show_error_details {
                self.cause.clone()
            } else {
                None
            },
        }
    }
}

/// The JSON body of a failure response
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// The error code
    pub error: &'static str,
    /// A human-readable description
    pub error_description: String,
    /// Every required scope that was not granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_scopes: Option<Vec<String>>,
    /// Internal detail about the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut description = String::new();
    let mut err = error;
    let _ = write!(&mut description, "{err}");
    while let Some(next) = err.source() {
        let _ = write!(&mut description, ": {next}");
        err = next;
    }
    description
}

impl From<ResolveError> for AuthFailure {
    fn from(err: ResolveError) -> Self {
        Self::server(
            "resource_not_configured",
            "No trust policy is configured for the requested resource",
        )
        .caused_by(&err)
    }
}

impl From<VerifyError> for AuthFailure {
    fn from(err: VerifyError) -> Self {
        let failure = match &err {
            VerifyError::MalformedToken(_) => {
                Self::unauthorized("invalid_token", "The access token is malformed")
            }
            VerifyError::MissingIssuer => {
                Self::unauthorized("invalid_token", "The access token does not name an issuer")
            }
            VerifyError::UntrustedIssuer(_) => Self::unauthorized(
                "untrusted_issuer",
                "The access token was issued by an untrusted authorization server",
            ),
            VerifyError::Discovery(_) => Self::server(
                "authorization_server_error",
                "Unable to retrieve authorization server metadata",
            ),
            VerifyError::MissingJwksUri { .. } => Self::unauthorized(
                "jwks_unavailable",
                "The authorization server does not publish signing keys",
            ),
            VerifyError::KeySet(_) | VerifyError::UnknownKeyId => Self::unauthorized(
                "invalid_token",
                "The access token signing key could not be found",
            ),
            VerifyError::Rejected(_) => {
                Self::unauthorized("invalid_token", "The access token is invalid")
            }
            VerifyError::Unexpected(_) => {
                Self::server("server_error", "The access token could not be verified")
            }
        };
        failure.caused_by(&err)
    }
}

/// Runs the bearer decision pipeline against a [`VerifierRegistry`]
///
/// Clones share the same registry and caches.
#[derive(Clone, Debug)]
#[must_use]
pub struct BearerAuth {
    registry: Arc<VerifierRegistry>,
    verify: VerifyOptions,
}

impl BearerAuth {
    /// Verifies tokens against `registry` with default verification options
    pub fn new(registry: VerifierRegistry) -> Self {
        Self::from_shared(Arc::new(registry))
    }

    /// Verifies tokens against a shared registry
    pub fn from_shared(registry: Arc<VerifierRegistry>) -> Self {
        Self {
            registry,
            verify: VerifyOptions::default(),
        }
    }

    /// Sets the rules handed to the verification primitive
    pub fn with_verify_options(mut self, verify: VerifyOptions) -> Self {
        self.verify = verify;
        self
    }

    /// The registry tokens are verified against
    pub fn registry(&self) -> &Arc<VerifierRegistry> {
        &self.registry
    }

    /// Decides whether the `Authorization` header grants access
    ///
    /// Checks run in order: header shape, trust and signature, audience,
    /// then scope. The first failing check decides the outcome.
    pub async fn authenticate(
        &self,
        header: Option<&HeaderValue>,
        options: &BearerAuthOptions,
    ) -> Result<IdentityContext, AuthFailure> {
        let result = self.decide(header, options).await;
        if let Err(failure) = &result {
            tracing::debug!(
                error.code = failure.code(),
                http.status_code = failure.status().as_u16(),
                resource = options.resource(),
                cause = failure.cause(),
                "bearer authentication failed"
            );
        }
        result
    }

    async fn decide(
        &self,
        header: Option<&HeaderValue>,
        options: &BearerAuthOptions,
    ) -> Result<IdentityContext, AuthFailure> {
        let token = bearer_token(header)?;

        let policy = self.registry.resolve_verifier(options.resource())?;

        let identity = policy
            .verification_fn(self.verify.clone())
            .verify(token)
            .await?;

        if let Some(audience) = options.required_audience() {
            if !identity.has_audience(audience) {
                let mut failure = AuthFailure::unauthorized(
                    "invalid_audience",
                    "The access token was not issued for this resource",
                );
                failure.cause = Some(format!(
                    "expected audience {audience}; token names {:?}",
                    identity.audience.as_deref().unwrap_or_default()
                ));
                return Err(failure);
            }
        }

        if let Err(denial) = options.required_scopes().evaluate(&identity.scopes) {
            let mut failure = AuthFailure::new(
                "insufficient_scope",
                StatusCode::FORBIDDEN,
                "The access token does not grant the required scopes",
            )
            .caused_by(&denial);
            failure.missing_scopes = Some(denial.missing);
            return Err(failure);
        }

        Ok(identity)
    }
}

fn bearer_token(header: Option<&HeaderValue>) -> Result<&JwtRef, AuthFailure> {
    let Some(header) = header else {
        return Err(AuthFailure::unauthorized(
            "missing_auth_header",
            "The request has no Authorization header",
        ));
    };

    let invalid_format = || {
        AuthFailure::unauthorized(
            "invalid_auth_header_format",
            "The Authorization header must have the form `Bearer <token>`",
        )
    };

    let value = header.to_str().map_err(|_| invalid_format())?;
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), None, None) if scheme.eq_ignore_ascii_case("bearer") => {
            Err(AuthFailure::unauthorized(
                "missing_bearer_token",
                "The Authorization header carries no bearer token",
            ))
        }
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            Ok(JwtRef::from_str(token))
        }
        _ => Err(invalid_format()),
    }
}
