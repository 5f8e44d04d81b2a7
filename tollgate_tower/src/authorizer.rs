use std::fmt;

use tollgate::{BearerAuth, BearerAuthOptions};
use tower_http::auth::AsyncRequireAuthorizationLayer;

use crate::{OnAuthFailure, TerseErrorHandler, VerboseErrorHandler, VerifyBearer};

/// Builder for generating layers that authenticate bearer tokens against a
/// [`VerifierRegistry`][tollgate::VerifierRegistry]
///
/// One authorizer can produce layers for many routes, each with its own
/// [`BearerAuthOptions`].
pub struct BearerAuthorizer<OnError = ()> {
    auth: BearerAuth,
    on_error: OnError,
}

impl<OnError> Clone for BearerAuthorizer<OnError>
where
    OnError: Clone,
{
    fn clone(&self) -> Self {
        Self {
            auth: self.auth.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<OnError> fmt::Debug for BearerAuthorizer<OnError>
where
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BearerAuthorizer")
            .field("auth", &self.auth)
            .field("on_error", &self.on_error)
            .finish()
    }
}

impl BearerAuthorizer<()> {
    /// Constructs a new authorizer without an error handler
    #[inline]
    pub fn new(auth: BearerAuth) -> Self {
        Self { auth, on_error: () }
    }

    /// Attaches a custom error handler to generate responses
    /// in the event of a verification failure
    #[inline]
    pub fn with_error_handler<OnError>(self, on_error: OnError) -> BearerAuthorizer<OnError> {
        BearerAuthorizer {
            auth: self.auth,
            on_error,
        }
    }

    /// Attaches the default terse error handler: [`TerseErrorHandler`]
    ///
    /// Failure details are only included when the route's options ask for
    /// them
    #[inline]
    pub fn with_terse_error_handler<ResBody: From<String>>(
        self,
    ) -> BearerAuthorizer<TerseErrorHandler<ResBody>> {
        self.with_error_handler(TerseErrorHandler::new())
    }

    /// Attaches the default verbose error handler: [`VerboseErrorHandler`]
    ///
    /// Failure details are always included in the response body
    #[inline]
    pub fn with_verbose_error_handler<ResBody: From<String>>(
        self,
    ) -> BearerAuthorizer<VerboseErrorHandler<ResBody>> {
        self.with_error_handler(VerboseErrorHandler::new())
    }
}

impl<OnError> BearerAuthorizer<OnError>
where
    OnError: OnAuthFailure + Clone,
{
    /// Authorizer layer that enforces `options` on each request
    ///
    /// The token is read from the request `Authorization` header. The
    /// resulting [`IdentityContext`][tollgate::IdentityContext] is made
    /// available through [`Request::extensions`][http::Request::extensions].
    pub fn layer(
        &self,
        options: BearerAuthOptions,
    ) -> AsyncRequireAuthorizationLayer<VerifyBearer<OnError>> {
        AsyncRequireAuthorizationLayer::new(VerifyBearer::new(
            self.auth.clone(),
            options,
            self.on_error.clone(),
        ))
    }

    /// The bearer pipeline shared by every layer
    pub fn auth(&self) -> &BearerAuth {
        &self.auth
    }
}
