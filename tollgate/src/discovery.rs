use std::sync::Arc;

use reqwest::{header, Client};
use serde_json::Value;

use crate::{
    flight::SingleFlight,
    metadata::{self, ServerKind, ServerMetadata},
    AuthorizationServerDescriptor, DiscoveryError,
};

#[derive(Debug)]
struct Inner {
    client: Client,
    flights: SingleFlight<String, Arc<ServerMetadata>, DiscoveryError>,
}

/// Fetches and memoizes authorization server metadata
///
/// Metadata is keyed by issuer and kept for the life of the cache once
/// fetched. Concurrent lookups for an issuer that has not been fetched yet
/// share a single request; a failed request is not remembered, so the next
/// lookup tries again.
///
/// Clones share the same underlying cache.
#[derive(Clone, Debug)]
#[must_use]
pub struct DiscoveryCache {
    inner: Arc<Inner>,
}

impl DiscoveryCache {
    /// Constructs an empty cache with a default HTTP client
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(crate::default_client()?))
    }

    /// Constructs an empty cache that fetches with the given client
    pub fn with_client(client: Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                flights: SingleFlight::new(),
            }),
        }
    }

    /// Resolves the metadata for an authorization server
    ///
    /// Resolved descriptors are answered without any I/O.
    pub async fn resolve(
        &self,
        descriptor: &AuthorizationServerDescriptor,
    ) -> Result<Arc<ServerMetadata>, DiscoveryError> {
        match descriptor {
            AuthorizationServerDescriptor::Resolved { metadata, .. } => Ok(Arc::clone(metadata)),
            AuthorizationServerDescriptor::Discovery { kind, issuer } => {
                let client = self.inner.client.clone();
                let kind = *kind;
                let owned = issuer.clone();
                self.inner
                    .flights
                    .get_or_fetch(issuer.clone(), move || fetch(client, kind, owned))
                    .await
            }
        }
    }

    /// The metadata already discovered for an issuer, if any
    pub fn cached(&self, issuer: &str) -> Option<Arc<ServerMetadata>> {
        self.inner.flights.cached(issuer)
    }
}

#[tracing::instrument(skip(client), fields(discovery.url = tracing::field::Empty))]
async fn fetch(
    client: Client,
    kind: ServerKind,
    issuer: String,
) -> Result<Arc<ServerMetadata>, DiscoveryError> {
    let url = metadata::discovery_url(kind, &issuer).map_err(|source| {
        DiscoveryError::InvalidIssuer {
            issuer: issuer.clone(),
            source,
        }
    })?;
    tracing::Span::current().record("discovery.url", url.as_str());
    tracing::debug!("fetching authorization server metadata");

    let response = client
        .get(url.clone())
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|err| {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "metadata fetch failed");
            DiscoveryError::Fetch {
                url: url.to_string(),
                source: Arc::new(err),
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(
            http.status_code = status.as_u16(),
            "metadata fetch failed; unexpected response status"
        );
        return Err(DiscoveryError::Status {
            url: url.to_string(),
            status,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|err| DiscoveryError::Fetch {
            url: url.to_string(),
            source: Arc::new(err),
        })?;

    let document: Value =
        serde_json::from_slice(&body).map_err(|err| DiscoveryError::Malformed {
            url: url.to_string(),
            source: Arc::new(err),
        })?;

    let metadata = ServerMetadata::parse(kind, &document).map_err(|source| {
        tracing::warn!(%source, "metadata rejected");
        DiscoveryError::Invalid {
            url: url.to_string(),
            source,
        }
    })?;

    if metadata.issuer != issuer {
        tracing::warn!(metadata.issuer = %metadata.issuer, "metadata names a different issuer");
        return Err(DiscoveryError::IssuerMismatch {
            expected: issuer,
            actual: metadata.issuer,
        });
    }

    tracing::info!("authorization server metadata fetched");
    Ok(Arc::new(metadata))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use color_eyre::Result;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::test;

    fn discovery(issuer: &str) -> AuthorizationServerDescriptor {
        AuthorizationServerDescriptor::Discovery {
            kind: ServerKind::Oauth,
            issuer: issuer.to_owned(),
        }
    }

    fn cache() -> DiscoveryCache {
        DiscoveryCache::with_client(Client::new())
    }

    #[tokio::test]
    #[cfg(any(feature = "rustls-tls", feature = "default-tls"))]
    async fn default_cache_can_reach_https_issuers() -> Result<()> {
        let cache = DiscoveryCache::new()?;

        // Nothing listens here; the fetch must fail to connect rather than
        // for lack of an HTTPS connector.
        let err = cache
            .resolve(&discovery("https://127.0.0.1:9"))
            .await
            .unwrap_err();
        let details = format!("{err:?}");
        assert!(!details.contains("scheme is not http"), "{details}");
        Ok(())
    }

    #[tokio::test]
    async fn resolved_descriptor_needs_no_fetch() -> Result<()> {
        let metadata = Arc::new(ServerMetadata::parse(
            ServerKind::Oauth,
            &test::metadata_json("https://as.example", None),
        )?);
        let descriptor = AuthorizationServerDescriptor::Resolved {
            kind: ServerKind::Oauth,
            metadata: Arc::clone(&metadata),
        };

        let resolved = cache().resolve(&descriptor).await?;
        assert!(Arc::ptr_eq(&resolved, &metadata));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_first_requests_fetch_once() -> Result<()> {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(test::metadata_json(&issuer, None))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache();
        let descriptor = discovery(&issuer);
        let (a, b) = tokio::join!(cache.resolve(&descriptor), cache.resolve(&descriptor));
        let (a, b) = (a?, b?);

        assert_eq!(a, b);
        assert_eq!(a.issuer, issuer);
        Ok(())
    }

    #[tokio::test]
    async fn resolved_metadata_is_kept() -> Result<()> {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test::metadata_json(&issuer, None)))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache();
        let descriptor = discovery(&issuer);
        cache.resolve(&descriptor).await?;
        cache.resolve(&descriptor).await?;
        cache.resolve(&descriptor).await?;

        assert!(cache.cached(&issuer).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_by_next_request() -> Result<()> {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test::metadata_json(&issuer, None)))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache();
        let descriptor = discovery(&issuer);

        let err = cache.resolve(&descriptor).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Status { status, .. } if status == 503));
        assert!(!err.is_validation());
        assert!(cache.cached(&issuer).is_none());

        let metadata = cache.resolve(&descriptor).await?;
        assert_eq!(metadata.issuer, issuer);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_document_is_a_validation_error() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": server.uri(),
            })))
            .mount(&server)
            .await;

        let err = cache().resolve(&discovery(&server.uri())).await.unwrap_err();

        assert!(matches!(err, DiscoveryError::Invalid { .. }));
        assert!(err.is_validation());
        Ok(())
    }

    #[tokio::test]
    async fn document_for_another_issuer_is_rejected() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(test::metadata_json("https://elsewhere.example", None)),
            )
            .mount(&server)
            .await;

        let err = cache().resolve(&discovery(&server.uri())).await.unwrap_err();

        assert!(matches!(err, DiscoveryError::IssuerMismatch { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn oidc_discovery_appends_to_issuer_path() -> Result<()> {
        let server = MockServer::start().await;
        let issuer = format!("{}/realms/main", server.uri());
        let mut document = test::metadata_json(&issuer, Some(&format!("{issuer}/certs")));
        document["subject_types_supported"] = serde_json::json!(["public"]);
        document["id_token_signing_alg_values_supported"] = serde_json::json!(["RS256"]);
        Mock::given(method("GET"))
            .and(path("/realms/main/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .expect(1)
            .mount(&server)
            .await;

        let descriptor = AuthorizationServerDescriptor::Discovery {
            kind: ServerKind::Oidc,
            issuer: issuer.clone(),
        };
        let metadata = cache().resolve(&descriptor).await?;

        assert_eq!(metadata.jwks_uri.as_deref(), Some(&*format!("{issuer}/certs")));
        Ok(())
    }
}
