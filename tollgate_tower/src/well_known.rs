use std::{
    fmt,
    sync::Arc,
    task::{Context, Poll},
};

use futures::future::{self, BoxFuture};
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use serde_json::json;
use tollgate::{metadata::OAUTH_WELL_KNOWN, VerifierRegistry};
use tower_layer::Layer;
use tower_service::Service;

/// Layer serving the metadata documents of a [`VerifierRegistry`]
///
/// `GET` requests for each protected resource's
/// `/.well-known/oauth-protected-resource` path are answered with its
/// [RFC 9728] document. With a single trust policy, `GET
/// /.well-known/oauth-authorization-server` is answered with the trusted
/// authorization server's metadata. All other requests pass through.
///
///   [RFC 9728]: https://datatracker.ietf.org/doc/html/rfc9728
#[derive(Clone)]
pub struct WellKnownLayer {
    registry: Arc<VerifierRegistry>,
}

impl fmt::Debug for WellKnownLayer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WellKnownLayer")
            .field("multi_resource", &self.registry.is_multi_resource())
            .finish()
    }
}

impl WellKnownLayer {
    /// Serves the documents of `registry`
    pub fn new(registry: Arc<VerifierRegistry>) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for WellKnownLayer {
    type Service = WellKnown<S>;

    fn layer(&self, inner: S) -> Self::Service {
        WellKnown {
            inner,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Service produced by [`WellKnownLayer`]
#[derive(Clone)]
pub struct WellKnown<S> {
    inner: S,
    registry: Arc<VerifierRegistry>,
}

impl<S> fmt::Debug for WellKnown<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WellKnown")
            .field("inner", &self.inner)
            .field("multi_resource", &self.registry.is_multi_resource())
            .finish()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for WellKnown<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        if request.method() == Method::GET {
            let path = request.uri().path();

            if let Some(response) = protected_resource_document(&self.registry, path) {
                return Box::pin(future::ready(Ok(response)));
            }

            if path == OAUTH_WELL_KNOWN && !self.registry.is_multi_resource() {
                let registry = Arc::clone(&self.registry);
                return Box::pin(
                    async move { Ok(authorization_server_document(&registry).await) },
                );
            }
        }

        Box::pin(self.inner.call(request))
    }
}

fn protected_resource_document<B>(
    registry: &VerifierRegistry,
    path: &str,
) -> Option<Response<B>>
where
    B: From<String>,
{
    let descriptor = registry
        .protected_resources()
        .into_iter()
        .find(|d| d.metadata_path() == path)?;

    tracing::trace!(
        resource = descriptor.resource(),
        "serving protected resource metadata"
    );
    Some(json_response(
        StatusCode::OK,
        serde_json::to_string(&descriptor.metadata()),
    ))
}

async fn authorization_server_document<B>(registry: &VerifierRegistry) -> Response<B>
where
    B: From<String>,
{
    match registry.authorization_server_metadata().await {
        Ok(Some(metadata)) => json_response(StatusCode::OK, serde_json::to_string(&*metadata)),
        Ok(None) => json_response(
            StatusCode::NOT_FOUND,
            Ok(json!({ "error": "not_found" }).to_string()),
        ),
        Err(err) => {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "unable to serve authorization server metadata");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                Ok(json!({
                    "error": "authorization_server_error",
                    "error_description": "Unable to retrieve authorization server metadata",
                })
                .to_string()),
            )
        }
    }
}

fn json_response<B>(status: StatusCode, body: Result<String, serde_json::Error>) -> Response<B>
where
    B: From<String>,
{
    let (status, body) = match body {
        Ok(body) => (status, body),
        Err(err) => {
            let error: &dyn std::error::Error = &err;
            tracing::error!(error, "unable to serialize metadata document");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "server_error" }).to_string(),
            )
        }
    };

    let mut resp = Response::new(B::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, routing::get, Router};
    use color_eyre::Result;
    use serde_json::json;
    use tollgate::{
        AuthorizationServerConfig, ProtectedResourceConfig, RegistryConfig, ServerKind,
    };
    use tower::ServiceExt;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::test;

    fn app(registry: Arc<VerifierRegistry>) -> Router {
        Router::new()
            .route("/notes", get(|| async { "notes" }))
            .fallback(|| async { (StatusCode::NOT_FOUND, "fallback") })
            .layer(WellKnownLayer::new(registry))
    }

    #[tokio::test]
    async fn serves_protected_resource_metadata() -> Result<()> {
        let server = MockServer::start().await;
        let app = app(test::registry(&server).await?);

        let resp = app
            .oneshot(test::get("/.well-known/oauth-protected-resource/notes", None)?)
            .await?;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            test::json_body(resp).await?,
            json!({
                "resource": test::RESOURCE,
                "authorization_servers": [test::ISSUER],
                "bearer_methods_supported": ["header"],
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn serves_authorization_server_metadata_for_a_single_server() -> Result<()> {
        let server = MockServer::start().await;
        let app = app(test::registry(&server).await?);

        let resp = app.oneshot(test::get(OAUTH_WELL_KNOWN, None)?).await?;

        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::json_body(resp).await?;
        assert_eq!(body["issuer"], test::ISSUER);
        assert_eq!(body["jwks_uri"], format!("{}/jwks", server.uri()));
        Ok(())
    }

    #[tokio::test]
    async fn other_requests_pass_through() -> Result<()> {
        let server = MockServer::start().await;
        let registry = test::registry(&server).await?;

        let resp = app(Arc::clone(&registry))
            .oneshot(test::get("/notes", None)?)
            .await?;
        assert_eq!(test::text_body(resp).await?, "notes");

        let post = http::Request::builder()
            .method(Method::POST)
            .uri("/.well-known/oauth-protected-resource/notes")
            .body(Body::empty())?;
        let resp = app(Arc::clone(&registry)).oneshot(post).await?;
        assert_eq!(test::text_body(resp).await?, "fallback");

        let resp = app(registry)
            .oneshot(test::get("/.well-known/oauth-protected-resource/other", None)?)
            .await?;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(test::text_body(resp).await?, "fallback");
        Ok(())
    }

    #[tokio::test]
    async fn discovery_failure_is_a_server_error() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(OAUTH_WELL_KNOWN))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let config = RegistryConfig::legacy(AuthorizationServerConfig::discovery(
            ServerKind::Oauth,
            server.uri(),
        ));
        let app = app(Arc::new(VerifierRegistry::new(config)?));

        let resp = app.oneshot(test::get(OAUTH_WELL_KNOWN, None)?).await?;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = test::json_body(resp).await?;
        assert_eq!(body["error"], "authorization_server_error");
        Ok(())
    }

    #[tokio::test]
    async fn multiple_resources_serve_only_their_own_documents() -> Result<()> {
        let resource = |uri: &str, issuer: &str| ProtectedResourceConfig {
            resource: uri.to_owned(),
            authorization_servers: vec![AuthorizationServerConfig::discovery(
                ServerKind::Oauth,
                issuer,
            )],
            scopes_supported: Some(vec!["read".to_owned()]),
        };
        let config = RegistryConfig::multi_resource(vec![
            resource("https://api.example.com/r1", "https://as1.example"),
            resource("https://api.example.com/r2", "https://as2.example"),
        ]);
        let registry = Arc::new(VerifierRegistry::new(config)?);

        let resp = app(Arc::clone(&registry))
            .oneshot(test::get("/.well-known/oauth-protected-resource/r2", None)?)
            .await?;
        assert_eq!(
            test::json_body(resp).await?,
            json!({
                "resource": "https://api.example.com/r2",
                "authorization_servers": ["https://as2.example"],
                "scopes_supported": ["read"],
                "bearer_methods_supported": ["header"],
            })
        );

        let resp = app(registry)
            .oneshot(test::get(OAUTH_WELL_KNOWN, None)?)
            .await?;
        assert_eq!(test::text_body(resp).await?, "fallback");
        Ok(())
    }
}
