//! Trust resolution and bearer token verification for OAuth2/OIDC protected
//! resources
//!
//! A resource server trusts one or more authorization servers. This crate
//! decides, for each incoming bearer token, which authorization server is
//! responsible for it, where that server publishes its keys, and whether the
//! token is acceptable for the resource being accessed.
//!
//! The moving parts, leaf first:
//!
//! * [`DiscoveryCache`] fetches and memoizes authorization server metadata
//!   (RFC 8414 / OpenID Connect Discovery), collapsing concurrent fetches for
//!   the same issuer into one request.
//! * [`KeySetCache`] hands out one [`RemoteKeySet`] per JWKS URI.
//! * [`TrustPolicy`] holds the trusted servers for one resource and produces
//!   a [`VerificationFn`].
//! * [`VerifierRegistry`] maps resources to trust policies.
//! * [`BearerAuth`] runs the per-request decision pipeline and yields either
//!   an [`IdentityContext`] or an [`AuthFailure`].
//!
//! Signature and claim checks are performed by [`aliri`]; this crate only
//! chooses the key material and the validation rules handed to it.
//!
//! # Example
//!
//! ```no_run
//! use tollgate::{BearerAuth, BearerAuthOptions, RegistryConfig, ScopeToken, VerifierRegistry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegistryConfig::from_json(r#"{
//!     "protected_resources": [{
//!         "resource": "https://api.example.com/notes",
//!         "authorization_servers": [
//!             { "type": "oidc", "issuer": "https://idp.example.com" }
//!         ]
//!     }]
//! }"#)?;
//!
//! let registry = VerifierRegistry::new(config)?;
//! let auth = BearerAuth::new(registry);
//!
//! let options = BearerAuthOptions::new()
//!     .with_resource("https://api.example.com/notes")
//!     .require_scope(ScopeToken::from_static("notes:read"));
//!
//! let header = http::HeaderValue::from_static("Bearer eyJ...");
//! match auth.authenticate(Some(&header), &options).await {
//!     Ok(identity) => println!("hello, {:?}", identity.subject),
//!     Err(failure) => println!("rejected: {}", failure.code()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `rustls-tls` (default): fetch metadata and key sets over HTTPS using
//!   `rustls`.
//! * `default-tls`: use the platform's native TLS stack instead. Disable
//!   default features to drop `rustls`.
//! * `ec`: accept tokens signed with elliptic curve keys.
//!
//! Without a TLS feature, only `http://` endpoints can be reached.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod bearer;
mod config;
mod descriptor;
mod discovery;
mod error;
mod flight;
mod identity;
mod jwks;
pub mod metadata;
mod registry;
pub mod scope;
mod trust;

#[cfg(test)]
pub(crate) mod test;

pub use bearer::{AuthFailure, BearerAuth, BearerAuthOptions, ErrorBody};
pub use config::{
    AuthorizationServerConfig, ProtectedResourceConfig, RegistryConfig, VerifyOptions,
};
pub use descriptor::{AuthorizationServerDescriptor, ProtectedResourceDescriptor};
pub use discovery::DiscoveryCache;
pub use error::{ConfigError, DiscoveryError, KeySetError, ResolveError, VerifyError};
pub use identity::IdentityContext;
pub use jwks::{KeySetCache, RemoteKeySet};
pub use metadata::{ServerKind, ServerMetadata};
pub use registry::VerifierRegistry;
pub use scope::{InsufficientScope, RequiredScopes, ScopeToken, ScopeTokenRef};
pub use trust::{TrustPolicy, UntrustedIssuer, VerificationFn};

const USER_AGENT: &str = concat!("tollgate/", env!("CARGO_PKG_VERSION"));

/// Builds the HTTP client shared by the discovery and key-set caches
pub(crate) fn default_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().user_agent(USER_AGENT).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_builds() {
        default_client().unwrap();
    }

    #[test]
    #[cfg(feature = "rustls-tls")]
    fn rustls_backend_is_available() {
        reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(USER_AGENT)
            .build()
            .unwrap();
    }
}
