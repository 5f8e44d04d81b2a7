use std::sync::Arc;

use aliri::{jwt, JwtRef};
use thiserror::Error;

use crate::{
    descriptor, identity::UnverifiedClaims, AuthorizationServerDescriptor, ConfigError,
    DiscoveryCache, IdentityContext, KeySetCache, VerifyError, VerifyOptions,
};

/// A token's issuer is not among the trusted authorization servers
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("issuer {actual} is not trusted; expected one of: {}", .expected.join(", "))]
pub struct UntrustedIssuer {
    /// Every issuer that is trusted
    pub expected: Vec<String>,
    /// The issuer named by the token
    pub actual: String,
}

#[derive(Debug)]
struct Inner {
    servers: Vec<AuthorizationServerDescriptor>,
    discovery: DiscoveryCache,
    key_sets: KeySetCache,
}

/// The authorization servers trusted for one protected resource
///
/// The set of servers is fixed at construction. Key sets are created as
/// tokens from each server are verified and are kept for the life of the
/// policy.
#[derive(Clone, Debug)]
#[must_use]
pub struct TrustPolicy {
    inner: Arc<Inner>,
}

impl TrustPolicy {
    pub(crate) fn new(
        resource: &str,
        servers: Vec<AuthorizationServerDescriptor>,
        discovery: DiscoveryCache,
        key_sets: KeySetCache,
    ) -> Result<Self, ConfigError> {
        if servers.is_empty() {
            return Err(ConfigError::NoAuthorizationServers {
                resource: resource.to_owned(),
            });
        }
        descriptor::ensure_unique_issuers(resource, &servers)?;

        Ok(Self {
            inner: Arc::new(Inner {
                servers,
                discovery,
                key_sets,
            }),
        })
    }

    /// The trusted authorization servers
    pub fn authorization_servers(&self) -> &[AuthorizationServerDescriptor] {
        &self.inner.servers
    }

    /// The key sets created by this policy
    pub fn key_sets(&self) -> &KeySetCache {
        &self.inner.key_sets
    }

    /// Finds the trusted server with exactly the given issuer
    ///
    /// No metadata is fetched to answer this.
    pub fn validate_issuer_trusted(
        &self,
        issuer: &str,
    ) -> Result<&AuthorizationServerDescriptor, UntrustedIssuer> {
        self.inner
            .servers
            .iter()
            .find(|s| s.issuer() == issuer)
            .ok_or_else(|| UntrustedIssuer {
                expected: self
                    .inner
                    .servers
                    .iter()
                    .map(|s| s.issuer().to_owned())
                    .collect(),
                actual: issuer.to_owned(),
            })
    }

    /// Produces a function that verifies tokens against this policy
    pub fn verification_fn(&self, options: VerifyOptions) -> VerificationFn {
        VerificationFn {
            policy: self.clone(),
            options,
        }
    }
}

/// Verifies bearer tokens against a [`TrustPolicy`]
#[derive(Clone, Debug)]
#[must_use]
pub struct VerificationFn {
    policy: TrustPolicy,
    options: VerifyOptions,
}

impl VerificationFn {
    /// Verifies a token and describes its bearer
    ///
    /// The issuer is read from the token before anything else, so that no
    /// metadata or keys are fetched for servers that are not trusted.
    pub async fn verify(&self, token: &JwtRef) -> Result<IdentityContext, VerifyError> {
        let UnverifiedClaims { issuer, claims } = UnverifiedClaims::peek(token)?;

        let server = self.policy.validate_issuer_trusted(&issuer)?;

        let metadata = self.policy.inner.discovery.resolve(server).await?;

        let Some(jwks_uri) = metadata.jwks_uri.as_deref() else {
            tracing::error!(
                issuer = %issuer,
                "trusted authorization server does not publish a JWKS URI"
            );
            return Err(VerifyError::MissingJwksUri { issuer });
        };

        let key_set = self.policy.inner.key_sets.key_source(jwks_uri);

        let validator = self.options.validator(&issuer);
        match key_set.verify::<jwt::BasicClaims>(token, &validator).await {
            Ok(_) => {}
            Err(err @ VerifyError::Unexpected(_)) => {
                let error: &dyn std::error::Error = &err;
                tracing::error!(error, issuer = %issuer, "unexpected failure verifying token");
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        Ok(IdentityContext::from_claims(token.to_owned(), issuer, claims))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use color_eyre::Result;
    use reqwest::Client;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{metadata::ServerKind, test, DiscoveryError, ServerMetadata};

    fn resolved(issuer: &str, jwks_uri: Option<&str>) -> AuthorizationServerDescriptor {
        AuthorizationServerDescriptor::Resolved {
            kind: ServerKind::Oauth,
            metadata: Arc::new(
                ServerMetadata::parse(ServerKind::Oauth, &test::metadata_json(issuer, jwks_uri))
                    .unwrap(),
            ),
        }
    }

    fn policy(servers: Vec<AuthorizationServerDescriptor>) -> TrustPolicy {
        TrustPolicy::new(
            "https://api.example.com",
            servers,
            DiscoveryCache::with_client(Client::new()),
            KeySetCache::with_client(Client::new()),
        )
        .unwrap()
    }

    async fn serve_jwks(server: &MockServer, route: &str, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(test::jwks_json(&[test::key("k1")])))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn untrusted_issuer_lists_every_trusted_issuer() {
        let policy = policy(vec![
            resolved("https://a.example", None),
            resolved("https://b.example", None),
        ]);

        let err = policy.validate_issuer_trusted("https://c.example").unwrap_err();
        assert_eq!(err.expected, vec!["https://a.example", "https://b.example"]);
        assert_eq!(err.actual, "https://c.example");
    }

    #[test]
    fn issuer_match_is_exact() {
        let policy = policy(vec![resolved("https://a.example", None)]);

        assert!(policy.validate_issuer_trusted("https://a.example").is_ok());
        assert!(policy.validate_issuer_trusted("https://a.example/").is_err());
    }

    #[test]
    fn rejects_duplicate_issuers() {
        let err = TrustPolicy::new(
            "https://api.example.com",
            vec![
                resolved("https://a.example", None),
                AuthorizationServerDescriptor::Discovery {
                    kind: ServerKind::Oidc,
                    issuer: "https://a.example".into(),
                },
            ],
            DiscoveryCache::with_client(Client::new()),
            KeySetCache::with_client(Client::new()),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::DuplicateIssuer { .. }));
    }

    #[tokio::test]
    async fn verifies_token_from_trusted_issuer() -> Result<()> {
        let server = MockServer::start().await;
        serve_jwks(&server, "/a/jwks", 1).await;
        let issuer = "https://a.example";
        let policy = policy(vec![resolved(issuer, Some(&format!("{}/a/jwks", server.uri())))]);

        let mut claims = test::claims(issuer);
        claims["scope"] = json!("read write");
        claims["client_id"] = json!("cli");
        let token = test::mint(&test::key("k1"), claims);

        let verify = policy.verification_fn(VerifyOptions::new());
        let identity = verify.verify(&token).await?;

        assert_eq!(identity.issuer, issuer);
        assert_eq!(identity.subject.as_deref(), Some("user-1"));
        assert_eq!(identity.client_id.as_deref(), Some("cli"));
        assert_eq!(identity.scopes, vec!["read", "write"]);

        verify.verify(&token).await?;
        assert_eq!(policy.key_sets().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn token_from_other_issuer_never_touches_key_sets() -> Result<()> {
        let server = MockServer::start().await;
        serve_jwks(&server, "/b/jwks", 0).await;
        let policy = policy(vec![resolved(
            "https://b.example",
            Some(&format!("{}/b/jwks", server.uri())),
        )]);

        let token = test::mint(&test::key("k1"), test::claims("https://a.example"));
        let err = policy
            .verification_fn(VerifyOptions::new())
            .verify(&token)
            .await
            .unwrap_err();

        match err {
            VerifyError::UntrustedIssuer(e) => {
                assert_eq!(e.actual, "https://a.example");
                assert_eq!(e.expected, vec!["https://b.example"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(policy.key_sets().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn token_from_other_issuer_never_triggers_discovery() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let policy = policy(vec![AuthorizationServerDescriptor::Discovery {
            kind: ServerKind::Oauth,
            issuer: server.uri(),
        }]);

        let token = test::mint(&test::key("k1"), test::claims("https://a.example"));
        let err = policy
            .verification_fn(VerifyOptions::new())
            .verify(&token)
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::UntrustedIssuer(_)));
        Ok(())
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn missing_jwks_uri_is_a_configuration_error() -> Result<()> {
        let policy = policy(vec![resolved("https://a.example", None)]);

        let token = test::mint(&test::key("k1"), test::claims("https://a.example"));
        let err = policy
            .verification_fn(VerifyOptions::new())
            .verify(&token)
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::MissingJwksUri { .. }));
        assert!(logs_contain("does not publish a JWKS URI"));
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_rejected() -> Result<()> {
        let server = MockServer::start().await;
        serve_jwks(&server, "/a/jwks", 1).await;
        let issuer = "https://a.example";
        let policy = policy(vec![resolved(issuer, Some(&format!("{}/a/jwks", server.uri())))]);

        let mut claims = test::claims(issuer);
        claims["exp"] = json!(test::now() - 120);
        let token = test::mint(&test::key("k1"), claims.clone());

        let err = policy
            .verification_fn(VerifyOptions::new())
            .verify(&token)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Rejected(_)));

        let lenient = policy.verification_fn(VerifyOptions::new().with_leeway(Duration::from_secs(300)));
        lenient.verify(&token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn disallowed_algorithm_is_rejected() -> Result<()> {
        let server = MockServer::start().await;
        serve_jwks(&server, "/a/jwks", 1).await;
        let issuer = "https://a.example";
        let policy = policy(vec![resolved(issuer, Some(&format!("{}/a/jwks", server.uri())))]);

        let token = test::mint(&test::key("k1"), test::claims(issuer));
        let err = policy
            .verification_fn(VerifyOptions::new().allow_algorithm(aliri::jwa::Algorithm::RS256))
            .verify(&token)
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::Rejected(_)));
        Ok(())
    }

    #[tokio::test]
    async fn discovery_failure_is_surfaced() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        let policy = policy(vec![AuthorizationServerDescriptor::Discovery {
            kind: ServerKind::Oauth,
            issuer: server.uri(),
        }]);

        let token = test::mint(&test::key("k1"), test::claims(&server.uri()));
        let err = policy
            .verification_fn(VerifyOptions::new())
            .verify(&token)
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::Discovery(DiscoveryError::Status { .. })));
        Ok(())
    }
}
