//! Helpers for minting tokens and standing up authorization server
//! documents in tests

use std::time::{SystemTime, UNIX_EPOCH};

use aliri::{jwa, jwk, jwt, Jwk, Jwt};
use aliri_base64::Base64Url;
use serde_json::{json, Value};

pub(crate) fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn hmac_key(kid: &str, secret: &str) -> Jwk {
    let mut raw = secret.as_bytes().to_vec();
    raw.resize(32, b'.');
    Jwk::from(jwa::Hmac::new(Base64Url::from_raw(raw)))
        .with_algorithm(jwa::Algorithm::HS256)
        .with_key_id(jwk::KeyId::new(kid.to_owned()))
}

/// A signing key for `kid`; the same `kid` always yields the same secret
pub(crate) fn key(kid: &str) -> Jwk {
    hmac_key(kid, &format!("secret for {kid}"))
}

/// A key with the same `kid` as [`key`] but a different secret
pub(crate) fn other_key(kid: &str) -> Jwk {
    hmac_key(kid, &format!("forged secret for {kid}"))
}

pub(crate) fn jwks_json(keys: &[Jwk]) -> Value {
    json!({ "keys": keys })
}

pub(crate) fn metadata_json(issuer: &str, jwks_uri: Option<&str>) -> Value {
    let mut document = json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"],
    });
    if let Some(jwks_uri) = jwks_uri {
        document["jwks_uri"] = Value::from(jwks_uri);
    }
    document
}

/// Claims for a token from `issuer` that expires in five minutes
pub(crate) fn claims(issuer: &str) -> Value {
    json!({
        "iss": issuer,
        "sub": "user-1",
        "exp": now() + 300,
    })
}

pub(crate) fn mint(key: &Jwk, claims: Value) -> Jwt {
    let headers = match key.key_id() {
        Some(kid) => jwt::BasicHeaders::with_key_id(jwa::Algorithm::HS256, kid.to_owned()),
        None => jwt::BasicHeaders::new(jwa::Algorithm::HS256),
    };
    Jwt::try_from_parts_with_signature(&headers, &claims, key).unwrap()
}
