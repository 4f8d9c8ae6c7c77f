use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::routes::AppState;

/// Inbound caller authentication. An empty configured proxy key means open
/// access; otherwise the caller must present the key as a bearer token or,
/// for native-Gemini-style clients, as a `key` query parameter. Rejection
/// happens before any upstream work.
pub async fn require_proxy_key(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let supplied = extract_caller_key(request.headers(), request.uri().query());

    // Never forward caller credentials upstream, authorized or not.
    request.headers_mut().remove(header::AUTHORIZATION);
    strip_key_query(request.uri_mut());

    let expected = state.config.proxy_key.as_str();
    if expected.is_empty() {
        return Ok(next.run(request).await);
    }

    match supplied {
        Some(key) if constant_time_eq(key.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn extract_caller_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let value = value.trim();
        if let Some(token) = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
        {
            return Some(token.trim().to_string());
        }
        // A malformed Authorization header never falls back to the query key.
        return None;
    }

    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query?).ok()?;
    pairs
        .into_iter()
        .find(|(name, _)| name == "key")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn strip_key_query(uri: &mut Uri) {
    let Some(query) = uri.query() else { return };

    let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(query) else {
        return;
    };
    let filtered: Vec<(String, String)> =
        pairs.into_iter().filter(|(name, _)| name != "key").collect();
    let Ok(new_query) = serde_urlencoded::to_string(&filtered) else {
        return;
    };

    let path = uri.path();
    let rewritten = if new_query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{new_query}")
    };
    if let Ok(new_uri) = rewritten.parse() {
        *uri = new_uri;
    }
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
