//! Permissive CORS headers for the tunnel endpoints.
//!
//! Applied to every response of a version's endpoint family, error
//! envelopes and WebSocket upgrade rejections included.

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
        },
        HeaderMap, HeaderValue, Request, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::bare::policy::VersionPolicy;

const X_ROBOTS_TAG: &str = "x-robots-tag";

pub fn apply_cors_headers(headers: &mut HeaderMap, policy: &VersionPolicy) {
    let any = HeaderValue::from_static("*");
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, any.clone());
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, any.clone());
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, any);
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(policy.allow_methods),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("7200"));
    headers.insert(X_ROBOTS_TAG, HeaderValue::from_static("noindex"));
}

/// Middleware attaching the CORS set for one protocol version.
pub async fn cors_middleware(
    State(policy): State<&'static VersionPolicy>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let mut resp = next.run(req).await;
    apply_cors_headers(resp.headers_mut(), policy);
    resp
}

/// Preflight answer: 204 with no body. CORS headers come from the middleware.
pub async fn preflight() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
