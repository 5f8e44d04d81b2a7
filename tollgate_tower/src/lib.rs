//! Authorizers for enforcing `tollgate` trust policies with `tower_http` and
//! other constructs in the ecosystem, including `axum`.
//!
//! See the `examples` folder in the repository for a working example using
//! an `axum` web server.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::{routing::get, Extension, Router};
//! use tollgate::{
//!     BearerAuth, BearerAuthOptions, IdentityContext, RegistryConfig, ScopeToken,
//!     VerifierRegistry,
//! };
//! use tollgate_tower::{BearerAuthorizer, WellKnownLayer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegistryConfig::from_json(r#"{
//!     "protected_resources": [{
//!         "resource": "https://api.example.com/notes",
//!         "authorization_servers": [
//!             { "type": "oauth", "issuer": "https://idp.example.com" }
//!         ],
//!         "scopes_supported": ["notes:read"]
//!     }]
//! }"#)?;
//! let registry = Arc::new(VerifierRegistry::new(config)?);
//!
//! let authorizer = BearerAuthorizer::new(BearerAuth::from_shared(Arc::clone(&registry)))
//!     .with_terse_error_handler::<axum::body::Body>();
//!
//! let read_notes = authorizer.layer(
//!     BearerAuthOptions::new()
//!         .with_resource("https://api.example.com/notes")
//!         .require_scope(ScopeToken::from_static("notes:read"))
//!         .with_resource_metadata_url(
//!             "https://api.example.com/.well-known/oauth-protected-resource/notes",
//!         ),
//! );
//!
//! let app = Router::new()
//!     .route("/notes", get(list_notes).layer(read_notes))
//!     .layer(WellKnownLayer::new(registry));
//!
//! async fn list_notes(Extension(identity): Extension<IdentityContext>) -> String {
//!     format!("notes for {:?}", identity.subject)
//! }
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

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

use std::fmt;
use std::marker::PhantomData;

mod authorizer;
pub mod util;
mod verify;
mod well_known;


pub use crate::authorizer::BearerAuthorizer;
pub use crate::verify::{IdentityReplaced, OnAuthFailure, VerifyBearer};
pub use crate::well_known::{WellKnown, WellKnownLayer};

/// Terse responders for authentication and authorization failures
///
/// Failure details are only included in the response body when the route
/// enables [`BearerAuthOptions::show_error_details`][tollgate::BearerAuthOptions::show_error_details].
pub struct TerseErrorHandler<ResBody> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> TerseErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for TerseErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TerseErrorHandler")
    }
}

impl<ResBody> Default for TerseErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Clone for TerseErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Copy for TerseErrorHandler<ResBody> {}

/// Verbose responders for authentication and authorization failures
///
/// Failure details are always included in the response body.
pub struct VerboseErrorHandler<ResBody> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> VerboseErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for VerboseErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("VerboseErrorHandler")
    }
}

impl<ResBody> Default for VerboseErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Clone for VerboseErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Copy for VerboseErrorHandler<ResBody> {}
