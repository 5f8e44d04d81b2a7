use aliri::{Jwt, JwtRef};
use aliri_base64::Base64Url;
use aliri_clock::UnixTime;
use serde_json::{Map, Value};

use crate::VerifyError;

/// The verified identity behind a bearer token
///
/// Built fresh for each verified request.
#[derive(Clone, Debug)]
pub struct IdentityContext {
    /// The token as presented
    pub token: Jwt,
    /// The issuer that vouched for the token
    pub issuer: String,
    /// The `sub` claim
    pub subject: Option<String>,
    /// The `client_id` claim, or `azp` when `client_id` is absent
    pub client_id: Option<String>,
    /// The scopes granted to the token
    pub scopes: Vec<String>,
    /// The `aud` claim, normalized to a list
    pub audience: Option<Vec<String>>,
    /// The `exp` claim
    pub expires_at: Option<UnixTime>,
    /// Every claim in the token
    pub claims: Map<String, Value>,
}

impl IdentityContext {
    pub(crate) fn from_claims(token: Jwt, issuer: String, claims: Map<String, Value>) -> Self {
        let scopes = match (claims.get("scope"), claims.get("scopes")) {
            (Some(Value::String(scope)), _) => scope.split_whitespace().map(str::to_owned).collect(),
            (_, Some(Value::Array(scopes))) => strings(scopes),
            _ => Vec::new(),
        };

        let client_id = string_claim(&claims, "client_id").or_else(|| string_claim(&claims, "azp"));

        let audience = match claims.get("aud") {
            Some(Value::String(aud)) => Some(vec![aud.clone()]),
            Some(Value::Array(aud)) => Some(strings(aud)),
            _ => None,
        };

        Self {
            token,
            issuer,
            subject: string_claim(&claims, "sub"),
            client_id,
            scopes,
            audience,
            expires_at: claims.get("exp").and_then(Value::as_u64).map(UnixTime),
            claims,
        }
    }

    /// Whether the token was issued for `audience`
    ///
    /// A token without an `aud` claim matches no audience.
    pub fn has_audience(&self, audience: &str) -> bool {
        self.audience
            .as_deref()
            .is_some_and(|aud| aud.iter().any(|a| a == audience))
    }
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Option<String> {
    claims.get(name).and_then(Value::as_str).map(str::to_owned)
}

fn strings(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect()
}

/// Claims read from a token without verifying it
///
/// Only used to decide which authorization server should verify the token.
#[derive(Debug)]
pub(crate) struct UnverifiedClaims {
    pub(crate) issuer: String,
    pub(crate) claims: Map<String, Value>,
}

impl UnverifiedClaims {
    pub(crate) fn peek(token: &JwtRef) -> Result<Self, VerifyError> {
        let mut parts = token.as_str().split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(VerifyError::MalformedToken("expected three segments")),
        };

        let raw = Base64Url::from_encoded(payload)
            .map_err(|_| VerifyError::MalformedToken("payload is not base64url"))?;
        let claims: Map<String, Value> = serde_json::from_slice(raw.as_slice())
            .map_err(|_| VerifyError::MalformedToken("payload is not a JSON object"))?;

        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .filter(|iss| !iss.is_empty())
            .ok_or(VerifyError::MissingIssuer)?
            .to_owned();

        Ok(Self { issuer, claims })
    }
}
