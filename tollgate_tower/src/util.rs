//! Utilities for generating HTTP responses on authorization failures

use http::{header, HeaderValue, Response, StatusCode};
use tollgate::{AuthFailure, BearerAuthOptions};

/// Build the response for a refused request
///
/// The status and JSON body come from the failure. The `www-authenticate`
/// header follows [RFC 6750 §3], with descriptions escaped so that they are
/// header-friendly:
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// content-type: application/json
/// www-authenticate: Bearer error="invalid_token", error_description="{description}", resource_metadata="{url}"
/// ```
///
/// A request without credentials gets neither `error` nor
/// `error_description`, and a scope denial lists the missing scopes:
///
/// ```http
/// HTTP/1.1 403 Forbidden
/// www-authenticate: Bearer error="insufficient_scope", error_description="{description}", scope="notes:read notes:write"
/// ```
///
/// Server errors carry no `www-authenticate` header.
///
///   [RFC 6750 §3]: https://datatracker.ietf.org/doc/html/rfc6750#section-3
pub fn failure_response<Body>(
    failure: &AuthFailure,
    options: &BearerAuthOptions,
    show_error_details: bool,
) -> Response<Body>
where
    Body: From<String>,
{
    let body = serde_json::to_string(&failure.body(show_error_details))
        .unwrap_or_else(|_| format!(r#"{{"error":"{}"}}"#, failure.code()));

    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = failure.status();
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    if let Some(challenge) = challenge(failure, options.resource_metadata_url()) {
        resp.headers_mut().insert(header::WWW_AUTHENTICATE, challenge);
    }

    resp
}

fn challenge(failure: &AuthFailure, resource_metadata: Option<&str>) -> Option<HeaderValue> {
    let mut params = Vec::new();

    let error = match failure.status() {
        StatusCode::UNAUTHORIZED if failure.code() == "missing_auth_header" => None,
        StatusCode::UNAUTHORIZED => Some("invalid_token"),
        StatusCode::FORBIDDEN => Some("insufficient_scope"),
        _ => return None,
    };

    if let Some(error) = error {
        params.push(format!(r#"error="{error}""#));
    }

    if error.is_some() && !failure.description().is_empty() {
        params.push(format!(
            r#"error_description="{}""#,
            failure.description().escape_default()
        ));
    }

    // Scope tokens are printable ASCII without `\` or `"`, so they never
    // need escaping.
    if let Some(missing) = failure.missing_scopes().filter(|m| !m.is_empty()) {
        let scope = missing
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        params.push(format!(r#"scope="{scope}""#));
    }

    if let Some(url) = resource_metadata {
        params.push(format!(r#"resource_metadata="{}""#, url.escape_default()));
    }

    let value = if params.is_empty() {
        "Bearer".to_owned()
    } else {
        format!("Bearer {}", params.join(", "))
    };

    Some(HeaderValue::try_from(value).expect("escaped challenge is a valid header value"))
}
