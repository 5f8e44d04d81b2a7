//! Authorization server and protected resource metadata documents
//!
//! Documents are exchanged with `snake_case` field names, as defined by
//! [RFC 8414], [OpenID Connect Discovery 1.0][OIDC], and [RFC 9728].
//!
//!   [RFC 8414]: https://datatracker.ietf.org/doc/html/rfc8414
//!   [OIDC]: https://openid.net/specs/openid-connect-discovery-1_0.html
//!   [RFC 9728]: https://datatracker.ietf.org/doc/html/rfc9728

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

/// Well-known path of RFC 8414 authorization server metadata
pub const OAUTH_WELL_KNOWN: &str = "/.well-known/oauth-authorization-server";
const OIDC_WELL_KNOWN: &str = "/.well-known/openid-configuration";
const PROTECTED_RESOURCE_WELL_KNOWN: &str = "/.well-known/oauth-protected-resource";

/// The flavor of authorization server, which decides where its metadata is
/// published and which fields it must carry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// An OAuth 2.0 authorization server ([RFC 8414])
    ///
    ///   [RFC 8414]: https://datatracker.ietf.org/doc/html/rfc8414
    Oauth,
    /// An OpenID Connect provider
    Oidc,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oauth => f.write_str("oauth"),
            Self::Oidc => f.write_str("oidc"),
        }
    }
}

/// Builds the well-known URL at which an issuer publishes its metadata
///
/// OAuth servers insert the well-known segment between the origin and the
/// issuer path. OpenID Connect providers append it to the issuer.
///
/// ```
/// use tollgate::{metadata::discovery_url, ServerKind};
///
/// let oauth = discovery_url(ServerKind::Oauth, "https://idp.example/tenant1").unwrap();
/// assert_eq!(
///     oauth.as_str(),
///     "https://idp.example/.well-known/oauth-authorization-server/tenant1"
/// );
///
/// let oidc = discovery_url(ServerKind::Oidc, "https://idp.example/tenant1").unwrap();
/// assert_eq!(
///     oidc.as_str(),
///     "https://idp.example/tenant1/.well-known/openid-configuration"
/// );
/// ```
pub fn discovery_url(kind: ServerKind, issuer: &str) -> Result<Url, url::ParseError> {
    match kind {
        ServerKind::Oauth => {
            let mut url = Url::parse(issuer)?;
            let path = url.path().trim_end_matches('/').to_owned();
            url.set_path(&format!("{OAUTH_WELL_KNOWN}{path}"));
            url.set_query(None);
            url.set_fragment(None);
            Ok(url)
        }
        ServerKind::Oidc => Url::parse(&format!(
            "{}{OIDC_WELL_KNOWN}",
            issuer.trim_end_matches('/')
        )),
    }
}

/// Authorization server metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    /// The issuer identifier
    pub issuer: String,
    /// The authorization endpoint
    pub authorization_endpoint: String,
    /// The token endpoint
    pub token_endpoint: String,
    /// The location of the server's JSON Web Key Set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    /// The dynamic client registration endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    /// The token revocation endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    /// The token introspection endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    /// The OpenID Connect userinfo endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    /// Scopes the server supports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// Response types the server supports
    pub response_types_supported: Vec<String>,
    /// Response modes the server supports
    pub response_modes_supported: Vec<String>,
    /// Grant types the server supports
    pub grant_types_supported: Vec<String>,
    /// PKCE code challenge methods the server supports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
    /// OpenID Connect subject identifier types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_types_supported: Option<Vec<String>>,
    /// OpenID Connect ID token signing algorithms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
}

impl ServerMetadata {
    /// Parses and validates a metadata document
    ///
    /// Every field that fails validation is reported, not just the first.
    /// Absent `grant_types_supported` and `response_modes_supported` take
    /// the defaults given by RFC 8414.
    pub fn parse(kind: ServerKind, document: &Value) -> Result<Self, MetadataError> {
        let Some(object) = document.as_object() else {
            return Err(MetadataError {
                issues: vec![FieldIssue {
                    field: "$",
                    problem: Problem::NotAnObject,
                }],
            });
        };

        let mut fields = Fields {
            object,
            issues: Vec::new(),
        };

        let issuer = fields.issuer();
        let authorization_endpoint = fields.required_url("authorization_endpoint");
        let token_endpoint = fields.required_url("token_endpoint");
        let jwks_uri = match kind {
            ServerKind::Oauth => fields.optional_url("jwks_uri"),
            ServerKind::Oidc => fields.required_url("jwks_uri"),
        };
        let registration_endpoint = fields.optional_url("registration_endpoint");
        let revocation_endpoint = fields.optional_url("revocation_endpoint");
        let introspection_endpoint = fields.optional_url("introspection_endpoint");
        let userinfo_endpoint = fields.optional_url("userinfo_endpoint");
        let scopes_supported = fields.optional_strings("scopes_supported");
        let response_types_supported = fields.required_strings("response_types_supported");
        let response_modes_supported = fields
            .optional_strings("response_modes_supported")
            .unwrap_or_else(|| strings(&["query", "fragment"]));
        let grant_types_supported = fields
            .optional_strings("grant_types_supported")
            .unwrap_or_else(|| strings(&["authorization_code", "implicit"]));
        let code_challenge_methods_supported =
            fields.optional_strings("code_challenge_methods_supported");
        let (subject_types_supported, id_token_signing_alg_values_supported) = match kind {
            ServerKind::Oauth => (
                fields.optional_strings("subject_types_supported"),
                fields.optional_strings("id_token_signing_alg_values_supported"),
            ),
            ServerKind::Oidc => (
                fields.required_strings("subject_types_supported"),
                fields.required_strings("id_token_signing_alg_values_supported"),
            ),
        };

        if !fields.issues.is_empty() {
            return Err(MetadataError {
                issues: fields.issues,
            });
        }

        // Every required field yields a value once no issues were recorded
        let (
            Some(issuer),
            Some(authorization_endpoint),
            Some(token_endpoint),
            Some(response_types_supported),
        ) = (
            issuer,
            authorization_endpoint,
            token_endpoint,
            response_types_supported,
        )
        else {
            return Err(MetadataError { issues: Vec::new() });
        };

        let supports_s256 = code_challenge_methods_supported
            .as_deref()
            .is_some_and(|methods| methods.iter().any(|m| m == "S256"));
        if !supports_s256 {
            tracing::warn!(
                issuer = %issuer,
                "authorization server does not advertise PKCE S256 support"
            );
        }

        Ok(Self {
            issuer,
            authorization_endpoint,
            token_endpoint,
            jwks_uri,
            registration_endpoint,
            revocation_endpoint,
            introspection_endpoint,
            userinfo_endpoint,
            scopes_supported,
            response_types_supported,
            response_modes_supported,
            grant_types_supported,
            code_challenge_methods_supported,
            subject_types_supported,
            id_token_signing_alg_values_supported,
        })
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|&v| v.to_owned()).collect()
}

struct Fields<'a> {
    object: &'a Map<String, Value>,
    issues: Vec<FieldIssue>,
}

impl Fields<'_> {
    fn issue(&mut self, field: &'static str, problem: Problem) {
        self.issues.push(FieldIssue { field, problem });
    }

    fn present(&self, field: &str) -> Option<&Value> {
        self.object.get(field).filter(|v| !v.is_null())
    }

    fn issuer(&mut self) -> Option<String> {
        let issuer = self.required_url("issuer")?;
        if issuer.contains('?') || issuer.contains('#') {
            self.issue("issuer", Problem::QueryOrFragment);
            return None;
        }
        Some(issuer)
    }

    fn required_url(&mut self, field: &'static str) -> Option<String> {
        if self.present(field).is_none() {
            self.issue(field, Problem::Missing);
            return None;
        }
        self.optional_url(field)
    }

    fn optional_url(&mut self, field: &'static str) -> Option<String> {
        let value = self.present(field)?;
        let Some(s) = value.as_str() else {
            self.issue(field, Problem::NotAString);
            return None;
        };

        match Url::parse(s) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(s.to_owned()),
            _ => {
                self.issue(field, Problem::NotAUrl);
                None
            }
        }
    }

    fn required_strings(&mut self, field: &'static str) -> Option<Vec<String>> {
        if self.present(field).is_none() {
            self.issue(field, Problem::Missing);
            return None;
        }
        let values = self.optional_strings(field)?;
        if values.is_empty() {
            self.issue(field, Problem::Empty);
            return None;
        }
        Some(values)
    }

    fn optional_strings(&mut self, field: &'static str) -> Option<Vec<String>> {
        let value = self.present(field)?;
        let parsed = value.as_array().and_then(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(ToOwned::to_owned))
                .collect::<Option<Vec<_>>>()
        });

        if parsed.is_none() {
            self.issue(field, Problem::NotAStringArray);
        }
        parsed
    }
}

/// Metadata failed validation
///
/// Lists every offending field.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid metadata: {}", DisplayIssues(.issues))]
pub struct MetadataError {
    issues: Vec<FieldIssue>,
}

impl MetadataError {
    /// The fields that failed validation
    pub fn issues(&self) -> &[FieldIssue] {
        &self.issues
    }
}

struct DisplayIssues<'a>(&'a [FieldIssue]);

impl fmt::Display for DisplayIssues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// A single field that failed validation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldIssue {
    /// The wire name of the field
    pub field: &'static str,
    /// What is wrong with it
    pub problem: Problem,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {}", self.field, self.problem)
    }
}

/// The ways a metadata field can fail validation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Problem {
    /// The document is not a JSON object
    NotAnObject,
    /// A required field is absent
    Missing,
    /// The field is not a string
    NotAString,
    /// The field is not an absolute `http` or `https` URL
    NotAUrl,
    /// The issuer carries a query or fragment
    QueryOrFragment,
    /// The field is not an array of strings
    NotAStringArray,
    /// A required list is empty
    Empty,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotAnObject => "is not an object",
            Self::Missing => "is required",
            Self::NotAString => "must be a string",
            Self::NotAUrl => "must be an absolute http(s) URL",
            Self::QueryOrFragment => "must not contain a query or fragment",
            Self::NotAStringArray => "must be an array of strings",
            Self::Empty => "must not be empty",
        })
    }
}

/// Protected resource metadata ([RFC 9728])
///
///   [RFC 9728]: https://datatracker.ietf.org/doc/html/rfc9728
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The protected resource identifier
    pub resource: String,
    /// Issuers of the authorization servers trusted by the resource
    pub authorization_servers: Vec<String>,
    /// Scopes used to authorize requests to the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    /// Ways a bearer token may be presented
    pub bearer_methods_supported: Vec<String>,
}

impl ProtectedResourceMetadata {
    /// Describes a resource that accepts bearer tokens in the
    /// `Authorization` header
    pub fn new(
        resource: String,
        authorization_servers: Vec<String>,
        scopes_supported: Option<Vec<String>>,
    ) -> Self {
        Self {
            resource,
            authorization_servers,
            scopes_supported,
            bearer_methods_supported: vec!["header".to_owned()],
        }
    }
}

/// The path at which a resource's protected resource metadata is served
///
/// The resource's path, if any, is appended to the well-known path. Query
/// and fragment are ignored.
///
/// ```
/// use tollgate::metadata::protected_resource_metadata_path;
///
/// let root = url::Url::parse("https://api.example.com").unwrap();
/// assert_eq!(
///     protected_resource_metadata_path(&root),
///     "/.well-known/oauth-protected-resource"
/// );
///
/// let notes = url::Url::parse("https://api.example.com/v1/notes?x=1#y").unwrap();
/// assert_eq!(
///     protected_resource_metadata_path(&notes),
///     "/.well-known/oauth-protected-resource/v1/notes"
/// );
/// ```
pub fn protected_resource_metadata_path(resource: &Url) -> String {
    match resource.path() {
        "" | "/" => PROTECTED_RESOURCE_WELL_KNOWN.to_owned(),
        path => format!("{PROTECTED_RESOURCE_WELL_KNOWN}{path}"),
    }
}

/// The absolute URL at which a resource's protected resource metadata is
/// served
pub fn protected_resource_metadata_url(resource: &Url) -> Url {
    let mut url = resource.clone();
    url.set_path(&protected_resource_metadata_path(resource));
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn oauth_document() -> Value {
        json!({
            "issuer": "https://idp.example",
            "authorization_endpoint": "https://idp.example/authorize",
            "token_endpoint": "https://idp.example/token",
            "jwks_uri": "https://idp.example/jwks.json",
            "response_types_supported": ["code"],
            "code_challenge_methods_supported": ["S256"],
        })
    }

    #[test]
    fn parses_minimal_oauth_metadata_with_defaults() {
        let metadata = ServerMetadata::parse(ServerKind::Oauth, &oauth_document()).unwrap();

        assert_eq!(metadata.issuer, "https://idp.example");
        assert_eq!(metadata.jwks_uri.as_deref(), Some("https://idp.example/jwks.json"));
        assert_eq!(
            metadata.grant_types_supported,
            vec!["authorization_code", "implicit"]
        );
        assert_eq!(metadata.response_modes_supported, vec!["query", "fragment"]);
    }

    #[test]
    fn oauth_metadata_may_omit_jwks_uri() {
        let mut document = oauth_document();
        document.as_object_mut().unwrap().remove("jwks_uri");

        let metadata = ServerMetadata::parse(ServerKind::Oauth, &document).unwrap();
        assert_eq!(metadata.jwks_uri, None);
    }

    #[test]
    fn oidc_metadata_requires_provider_fields() {
        let err = ServerMetadata::parse(ServerKind::Oidc, &oauth_document()).unwrap_err();

        let fields: Vec<_> = err.issues().iter().map(|i| i.field).collect();
        assert_eq!(
            fields,
            vec![
                "subject_types_supported",
                "id_token_signing_alg_values_supported"
            ]
        );
    }

    #[test]
    fn reports_every_invalid_field() {
        let document = json!({
            "issuer": "https://idp.example?tenant=1",
            "token_endpoint": "/relative",
            "jwks_uri": 42,
            "response_types_supported": [],
            "grant_types_supported": "authorization_code",
        });

        let err = ServerMetadata::parse(ServerKind::Oauth, &document).unwrap_err();

        assert_eq!(
            err.issues(),
            &[
                FieldIssue {
                    field: "issuer",
                    problem: Problem::QueryOrFragment
                },
                FieldIssue {
                    field: "authorization_endpoint",
                    problem: Problem::Missing
                },
                FieldIssue {
                    field: "token_endpoint",
                    problem: Problem::NotAUrl
                },
                FieldIssue {
                    field: "jwks_uri",
                    problem: Problem::NotAString
                },
                FieldIssue {
                    field: "response_types_supported",
                    problem: Problem::Empty
                },
                FieldIssue {
                    field: "grant_types_supported",
                    problem: Problem::NotAStringArray
                },
            ]
        );
    }

    #[test]
    fn rejects_non_object_documents() {
        let err = ServerMetadata::parse(ServerKind::Oauth, &json!(["nope"])).unwrap_err();
        assert_eq!(err.issues()[0].problem, Problem::NotAnObject);
    }

    #[test]
    #[tracing_test::traced_test]
    fn missing_pkce_is_only_a_warning() {
        let mut document = oauth_document();
        document
            .as_object_mut()
            .unwrap()
            .remove("code_challenge_methods_supported");

        assert!(ServerMetadata::parse(ServerKind::Oauth, &document).is_ok());
        assert!(logs_contain("does not advertise PKCE S256 support"));
    }

    #[test]
    fn serializes_with_snake_case_names() {
        let metadata = ServerMetadata::parse(ServerKind::Oauth, &oauth_document()).unwrap();
        let value = serde_json::to_value(&metadata).unwrap();

        assert_eq!(value["authorization_endpoint"], "https://idp.example/authorize");
        assert_eq!(value["response_types_supported"], json!(["code"]));
        assert!(value.get("registration_endpoint").is_none());
    }

    #[test]
    fn oauth_discovery_url_for_root_issuer() {
        let url = discovery_url(ServerKind::Oauth, "https://idp.example/").unwrap();
        assert_eq!(
            url.as_str(),
            "https://idp.example/.well-known/oauth-authorization-server"
        );
    }

    #[test]
    fn oidc_discovery_url_trims_trailing_slash() {
        let url = discovery_url(ServerKind::Oidc, "https://idp.example/realms/a/").unwrap();
        assert_eq!(
            url.as_str(),
            "https://idp.example/realms/a/.well-known/openid-configuration"
        );
    }

    #[test]
    fn protected_resource_document_advertises_header_bearer() {
        let doc = ProtectedResourceMetadata::new(
            "https://api.example.com/notes".into(),
            vec!["https://idp.example".into()],
            None,
        );
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["bearer_methods_supported"], json!(["header"]));
        assert!(value.get("scopes_supported").is_none());
    }

    #[test]
    fn protected_resource_url_replaces_path() {
        let resource = Url::parse("https://api.example.com/v1/notes").unwrap();
        assert_eq!(
            protected_resource_metadata_url(&resource).as_str(),
            "https://api.example.com/.well-known/oauth-protected-resource/v1/notes"
        );
    }
}
