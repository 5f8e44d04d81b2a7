use std::sync::Arc;

use thiserror::Error;

use crate::{metadata::MetadataError, trust::UntrustedIssuer};

/// The trust configuration cannot be used to build a verifier registry
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither a legacy authorization server nor any protected resources
    /// were configured
    #[error("configuration must name either an authorization server or protected resources")]
    NoMode,
    /// Both a legacy authorization server and protected resources were
    /// configured
    #[error("configuration cannot name both an authorization server and protected resources")]
    BothModes,
    /// Two protected resources share the same identifier
    #[error("protected resource {resource} is configured more than once")]
    DuplicateResource {
        /// The repeated resource identifier
        resource: String,
    },
    /// Two protected resources would publish their metadata at the same
    /// well-known path
    #[error("protected resources {resource} and {other} share the metadata path {path}")]
    MetadataPathCollision {
        /// The resource configured later
        resource: String,
        /// The resource already publishing at `path`
        other: String,
        /// The shared `/.well-known/oauth-protected-resource` path
        path: String,
    },
    /// `scopes_supported` was given for a single authorization server
    /// without a `resource` to describe
    #[error("`scopes_supported` requires `resource` when a single authorization server is configured")]
    ScopesWithoutResource,
    /// Two authorization servers within one trust policy share an issuer
    #[error("issuer {issuer} is trusted more than once for resource {resource}")]
    DuplicateIssuer {
        /// The resource whose trust policy repeats the issuer
        resource: String,
        /// The repeated issuer
        issuer: String,
    },
    /// A protected resource trusts no authorization servers
    #[error("protected resource {resource} trusts no authorization servers")]
    NoAuthorizationServers {
        /// The resource without a trusted server
        resource: String,
    },
    /// A protected resource identifier is not an absolute URI
    #[error("protected resource {resource} is not a valid URI")]
    InvalidResource {
        /// The offending resource identifier
        resource: String,
        /// The reason parsing failed
        #[source]
        source: url::ParseError,
    },
    /// An authorization server entry gave both or neither of `metadata`
    /// and `issuer`
    #[error("authorization server entry for resource {resource} must give exactly one of `metadata` or `issuer`")]
    AmbiguousServer {
        /// The resource whose trust policy holds the entry
        resource: String,
    },
    /// A discovery-mode authorization server named an unusable issuer
    #[error("authorization server issuer {issuer} for resource {resource} is not a valid issuer URL")]
    InvalidIssuer {
        /// The resource whose trust policy holds the entry
        resource: String,
        /// The offending issuer
        issuer: String,
    },
    /// Inline authorization server metadata failed validation
    #[error("authorization server metadata for resource {resource} is invalid")]
    InvalidMetadata {
        /// The resource whose trust policy holds the entry
        resource: String,
        /// The fields that failed validation
        #[source]
        source: MetadataError,
    },
    /// The configuration document could not be decoded
    #[error("configuration is not valid JSON")]
    Json(#[from] serde_json::Error),
    /// The HTTP client could not be constructed
    #[error("unable to construct HTTP client")]
    HttpClient(#[from] reqwest::Error),
}

/// Authorization server metadata could not be discovered
///
/// Fetch failures and validation failures are kept apart so that the
/// operator can tell a network problem from a misbehaving server. Every
/// caller waiting on the same fetch receives a clone of the same error.
#[derive(Clone, Debug, Error)]
pub enum DiscoveryError {
    /// The issuer cannot be turned into a discovery URL
    #[error("issuer {issuer} cannot be used to build a discovery URL")]
    InvalidIssuer {
        /// The offending issuer
        issuer: String,
        /// The reason parsing failed
        #[source]
        source: url::ParseError,
    },
    /// The discovery request failed before a response arrived
    #[error("fetching metadata from {url} failed")]
    Fetch {
        /// The discovery URL
        url: String,
        /// The transport error
        #[source]
        source: Arc<reqwest::Error>,
    },
    /// The discovery endpoint responded with a non-success status
    #[error("fetching metadata from {url} returned status {status}")]
    Status {
        /// The discovery URL
        url: String,
        /// The status returned
        status: http::StatusCode,
    },
    /// The discovery document is not JSON
    #[error("metadata from {url} is not valid JSON")]
    Malformed {
        /// The discovery URL
        url: String,
        /// The decoding error
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// The discovery document failed validation
    #[error("metadata from {url} is invalid")]
    Invalid {
        /// The discovery URL
        url: String,
        /// The fields that failed validation
        #[source]
        source: MetadataError,
    },
    /// The discovery document describes a different issuer
    #[error("metadata for issuer {expected} names issuer {actual}")]
    IssuerMismatch {
        /// The issuer that was requested
        expected: String,
        /// The issuer named by the document
        actual: String,
    },
    /// The background fetch was aborted before completing
    #[error("metadata fetch was aborted")]
    Aborted(#[source] Arc<tokio::task::JoinError>),
}

impl DiscoveryError {
    /// Whether the error came from validating the document rather than
    /// fetching it
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Malformed { .. } | Self::Invalid { .. } | Self::IssuerMismatch { .. }
        )
    }
}

impl From<tokio::task::JoinError> for DiscoveryError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Aborted(Arc::new(err))
    }
}

/// A JSON Web Key Set could not be fetched
#[derive(Clone, Debug, Error)]
pub enum KeySetError {
    /// The JWKS request failed before a response arrived
    #[error("fetching JWKS from {url} failed")]
    Fetch {
        /// The JWKS URL
        url: String,
        /// The transport error
        #[source]
        source: Arc<reqwest::Error>,
    },
    /// The JWKS endpoint responded with a non-success status
    #[error("fetching JWKS from {url} returned status {status}")]
    Status {
        /// The JWKS URL
        url: String,
        /// The status returned
        status: http::StatusCode,
    },
    /// The JWKS document could not be decoded
    #[error("JWKS from {url} is malformed")]
    Malformed {
        /// The JWKS URL
        url: String,
        /// The decoding error
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// The background fetch was aborted before completing
    #[error("JWKS fetch was aborted")]
    Aborted(#[source] Arc<tokio::task::JoinError>),
}

impl From<tokio::task::JoinError> for KeySetError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Aborted(Arc::new(err))
    }
}

/// A bearer token could not be verified
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The token could not be decoded far enough to read its issuer
    #[error("token is malformed: {0}")]
    MalformedToken(&'static str),
    /// The token does not carry an `iss` claim
    #[error("token has no issuer")]
    MissingIssuer,
    /// The token was issued by a server that is not trusted
    #[error(transparent)]
    UntrustedIssuer(#[from] UntrustedIssuer),
    /// The issuer's metadata could not be discovered
    #[error("authorization server metadata unavailable")]
    Discovery(#[from] DiscoveryError),
    /// The trusted authorization server does not publish a JWKS URI
    #[error("authorization server {issuer} does not publish a JWKS URI")]
    MissingJwksUri {
        /// The misconfigured issuer
        issuer: String,
    },
    /// The issuer's key set could not be fetched
    #[error("key set unavailable")]
    KeySet(#[from] KeySetError),
    /// No key in the issuer's key set matches the token header
    #[error("no matching key found to validate JWT")]
    UnknownKeyId,
    /// The token signature or claims were rejected
    #[error("invalid JWT")]
    Rejected(#[source] aliri::error::JwtVerifyError),
    /// The verification primitive failed in an unexpected way
    #[error("unexpected verification failure")]
    Unexpected(#[source] aliri::error::JwtVerifyError),
}

impl From<aliri::error::JwtVerifyError> for VerifyError {
    fn from(err: aliri::error::JwtVerifyError) -> Self {
        use aliri::error::JwtVerifyError as E;
        match err {
            err @ E::Unexpected(_) => Self::Unexpected(err),
            err => Self::Rejected(err),
        }
    }
}

/// No trust policy applies to the request
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Multiple resources are configured but the request did not say which
    /// one it targets
    #[error("a resource must be named when multiple protected resources are configured")]
    ResourceRequired,
    /// The named resource is not configured
    #[error("protected resource {resource} is not configured")]
    ResourceNotConfigured {
        /// The unknown resource
        resource: String,
    },
}
