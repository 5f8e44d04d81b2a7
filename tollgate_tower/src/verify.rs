use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use http::{Request, Response};
use tollgate::{AuthFailure, BearerAuth, BearerAuthOptions};
use tower_http::auth::AsyncAuthorizeRequest;

use crate::{util::failure_response, TerseErrorHandler, VerboseErrorHandler};

/// Marker added to request extensions when an
/// [`IdentityContext`][tollgate::IdentityContext] inserted by an outer layer
/// was replaced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdentityReplaced;

/// Authorizes requests by running the bearer decision pipeline
///
/// Accepted requests carry the resulting
/// [`IdentityContext`][tollgate::IdentityContext] in their extensions. Built
/// by [`BearerAuthorizer`][crate::BearerAuthorizer].
pub struct VerifyBearer<OnError> {
    auth: BearerAuth,
    options: Arc<BearerAuthOptions>,
    on_error: OnError,
}

impl<OnError> Clone for VerifyBearer<OnError>
where
    OnError: Clone,
{
    #[inline]
    fn clone(&self) -> Self {
        Self {
            auth: self.auth.clone(),
            options: Arc::clone(&self.options),
            on_error: self.on_error.clone(),
        }
    }
}

impl<OnError> fmt::Debug for VerifyBearer<OnError>
where
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VerifyBearer")
            .field("auth", &self.auth)
            .field("options", &self.options)
            .field("on_error", &self.on_error)
            .finish()
    }
}

impl<OnError> VerifyBearer<OnError> {
    #[inline]
    pub(crate) fn new(auth: BearerAuth, options: BearerAuthOptions, on_error: OnError) -> Self {
        Self {
            auth,
            options: Arc::new(options),
            on_error,
        }
    }
}

impl<OnError, ReqBody> AsyncAuthorizeRequest<ReqBody> for VerifyBearer<OnError>
where
    OnError: OnAuthFailure + Clone + Send + Sync + 'static,
    OnError::Body: Send + 'static,
    ReqBody: Send + 'static,
{
    type RequestBody = ReqBody;
    type ResponseBody = OnError::Body;
    type Future = BoxFuture<'static, Result<Request<ReqBody>, Response<OnError::Body>>>;

    fn authorize(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            let header = request.headers().get(http::header::AUTHORIZATION).cloned();

            let identity = this
                .auth
                .authenticate(header.as_ref(), &this.options)
                .await
                .map_err(|failure| this.on_error.on_auth_failure(&failure, &this.options))?;

            tracing::trace!(
                issuer = %identity.issuer,
                subject = identity.subject.as_deref(),
                "bearer token accepted"
            );

            if let Some(previous) = request.extensions_mut().insert(identity) {
                tracing::warn!(
                    previous.issuer = %previous.issuer,
                    previous.subject = previous.subject.as_deref(),
                    "replaced an identity attached by an earlier authorizer"
                );
                request.extensions_mut().insert(IdentityReplaced);
            }

            Ok(request)
        })
    }
}

/// Handler for responding to requests refused by the bearer decision
/// pipeline
pub trait OnAuthFailure {
    /// The body type returned on an error
    type Body;

    /// Response for a refused request
    fn on_auth_failure(
        &self,
        failure: &AuthFailure,
        options: &BearerAuthOptions,
    ) -> Response<Self::Body>;
}

macro_rules! delegate_impls {
    ($($ty:ty)*) => {
        $(
            impl<T> OnAuthFailure for $ty
            where
                T: OnAuthFailure,
            {
                type Body = T::Body;

                fn on_auth_failure(
                    &self,
                    failure: &AuthFailure,
                    options: &BearerAuthOptions,
                ) -> Response<Self::Body> {
                    T::on_auth_failure(self, failure, options)
                }
            }
        )*
    }
}

delegate_impls!(
    &'_ T
    Box<T>
    std::rc::Rc<T>
    Arc<T>
);

impl<ResBody> OnAuthFailure for TerseErrorHandler<ResBody>
where
    ResBody: From<String>,
{
    type Body = ResBody;

    #[inline]
    fn on_auth_failure(
        &self,
        failure: &AuthFailure,
        options: &BearerAuthOptions,
    ) -> Response<Self::Body> {
        failure_response(failure, options, options.shows_error_details())
    }
}

impl<ResBody> OnAuthFailure for VerboseErrorHandler<ResBody>
where
    ResBody: From<String>,
{
    type Body = ResBody;

    #[inline]
    fn on_auth_failure(
        &self,
        failure: &AuthFailure,
        options: &BearerAuthOptions,
    ) -> Response<Self::Body> {
        tracing::debug!(
            error.code = failure.code(),
            cause = failure.cause(),
            "responding with failure details"
        );
        failure_response(failure, options, true)
    }
}
