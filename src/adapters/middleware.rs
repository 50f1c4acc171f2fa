//! Axum middleware used by the gateway router.
//!
//! Stateless layers for request timing, request IDs and CORS, plus the
//! bearer-token gate which only reads the configured key.
use std::{future::Future, pin::Pin, sync::Arc, time::Instant};

use axum::{
    Json,
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::Instrument;

/// Log start/end of a request including latency.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    tracing::info!("Started processing {} {} {:?}", method, uri, version);

    let response = next.run(req).await;
    let duration = start.elapsed();

    tracing::info!(
        "Completed {} {} {:?} - {} in {:?}",
        method,
        uri,
        version,
        response.status(),
        duration
    );

    response
}

/// Generate a per-request UUID and expose it via tracing plus `X-Request-ID`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        http.method = %req.method(),
        http.path = %req.uri().path(),
        http.status_code = tracing::field::Empty,
    );

    let mut response = next.run(req).instrument(span.clone()).await;
    span.record("http.status_code", response.status().as_u16());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", header_value);
    }

    response
}

/// Permissive CORS: reflect the caller's origin, allow every method and
/// header. Preflight `OPTIONS` requests are answered here with 204.
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    let origin = req.headers().get(header::ORIGIN).cloned();
    let requested_headers = req
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned();
    let is_preflight = req.method() == Method::OPTIONS
        && req
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = if is_preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        origin.unwrap_or(HeaderValue::from_static("*")),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        requested_headers.unwrap_or(HeaderValue::from_static("*")),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    headers.append(header::VARY, HeaderValue::from_static("origin"));

    response
}

/// Token of a `<scheme> <token>` header whose scheme is `bearer` in any case.
fn bearer_token(value: &str) -> Option<&str> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        _ => None,
    }
}

fn unauthorized(message: &str) -> Response {
    let body = json!({
        "error": {
            "message": message,
            "code": "unauthorized",
        }
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Reject requests without the configured bearer token. A `None` key lets
/// everything through.
pub async fn bearer_auth_middleware(
    req: Request,
    next: Next,
    api_key: Option<Arc<str>>,
) -> Response {
    let Some(expected) = api_key else {
        return next.run(req).await;
    };

    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        tracing::warn!("Rejected {} {}: missing bearer token", req.method(), req.uri().path());
        return unauthorized("Missing Authorization header");
    };
    let Some(token) = value.to_str().ok().and_then(bearer_token) else {
        tracing::warn!("Rejected {} {}: malformed Authorization header", req.method(), req.uri().path());
        return unauthorized("Malformed Authorization header, expected 'Bearer YOUR_API_KEY'");
    };
    if token != &*expected {
        tracing::warn!("Rejected {} {}: invalid bearer token", req.method(), req.uri().path());
        return unauthorized("Invalid API key");
    }
    next.run(req).await
}

/// Create a cloneable closure wrapping [`bearer_auth_middleware`].
pub fn create_bearer_auth_middleware(
    api_key: Option<Arc<str>>,
) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone {
    move |req, next| {
        let api_key = api_key.clone();
        Box::pin(async move { bearer_auth_middleware(req, next, api_key).await })
    }
}
