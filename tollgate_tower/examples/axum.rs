use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use aliri::{jwa, jwk, jwt, Jwk, Jwt};
use aliri_base64::Base64Url;
use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use tollgate::{
    AuthorizationServerConfig, BearerAuth, BearerAuthOptions, IdentityContext, RegistryConfig,
    ScopeToken, ServerKind, VerifierRegistry,
};
use tollgate_tower::{BearerAuthorizer, WellKnownLayer};

const ADDR: &str = "127.0.0.1:8080";
const ISSUER: &str = "https://as.example";
const RESOURCE: &str = "http://127.0.0.1:8080/users";
const KEY_ID: &str = "test key";

fn signing_key() -> Jwk {
    let secret = Base64Url::from_raw(b"a very secret key that nobody knows".to_vec());
    Jwk::from(jwa::Hmac::new(secret))
        .with_algorithm(jwa::Algorithm::HS256)
        .with_key_id(jwk::KeyId::new(KEY_ID.to_owned()))
}

/// The authorization server is known up front; its keys are served by this
/// same process at `/jwks`
fn construct_registry() -> Result<VerifierRegistry, tollgate::ConfigError> {
    let metadata = json!({
        "issuer": ISSUER,
        "authorization_endpoint": format!("{ISSUER}/authorize"),
        "token_endpoint": format!("{ISSUER}/token"),
        "jwks_uri": format!("http://{ADDR}/jwks"),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"],
    });

    let config = RegistryConfig::legacy(AuthorizationServerConfig::resolved(
        ServerKind::Oauth,
        metadata,
    ))
    .with_resource(RESOURCE);

    VerifierRegistry::new(config)
}

async fn jwks() -> Json<Value> {
    Json(json!({ "keys": [signing_key()] }))
}

async fn handle_post() -> &'static str {
    "Handled POST /users"
}

async fn handle_get(Extension(identity): Extension<IdentityContext>) -> String {
    format!(
        "Handled GET /users for {} from {}",
        identity.subject.as_deref().unwrap_or("nobody"),
        identity.issuer
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(construct_registry()?);

    let authorizer = BearerAuthorizer::new(BearerAuth::from_shared(Arc::clone(&registry)))
        .with_verbose_error_handler::<axum::body::Body>();

    let require_scope = |scope: &'static str| {
        authorizer.layer(
            BearerAuthOptions::new()
                .require_scope(ScopeToken::from_static(scope))
                .with_resource_metadata_url(
                    "http://127.0.0.1:8080/.well-known/oauth-protected-resource/users",
                ),
        )
    };

    let app = Router::new()
        .route(
            "/users",
            get(handle_get)
                .layer(require_scope("get_user"))
                .merge(post(handle_post).layer(require_scope("post_user"))),
        )
        .route("/jwks", get(jwks))
        .layer(WellKnownLayer::new(registry));

    print_example_token(&signing_key())?;
    println!("Press Ctrl+C to exit");

    let listener = tokio::net::TcpListener::bind(ADDR).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn print_example_token(key: &Jwk) -> Result<(), Box<dyn std::error::Error>> {
    let headers =
        jwt::BasicHeaders::with_key_id(jwa::Algorithm::HS256, jwk::KeyId::new(KEY_ID.to_owned()));

    let exp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() + 300;
    let payload = json!({
        "sub": "test",
        "iss": ISSUER,
        "exp": exp,
        "scope": "get_user post_user",
    });

    let jwt = Jwt::try_from_parts_with_signature(&headers, &payload, key)?;

    println!("Use the following JWT to access the service. It is good for the next 5 minutes, so use it fast!");
    println!(
        "The tool at https://jwt.io/ can be used to mess with the claims and see what happens."
    );
    println!("Token: {}", jwt.as_str());
    Ok(())
}
