//! Plumbing shared by the per-version endpoint handlers.

use axum::{
    body::Body,
    extract::{ws::WebSocket, FromRequestParts, WebSocketUpgrade},
    http::{HeaderMap, Method, Request},
    response::{IntoResponse, Response},
};

use crate::bare::headers::{is_listed, FORBIDDEN_FORWARD_HEADERS, X_BARE_ID};
use crate::bare::policy::ProtocolVersion;
use crate::bare::request::TunnelRequest;
use crate::bare::target::RemoteTarget;
use crate::bare::BareError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::cors::preflight;
use crate::tunnel::{close_with, pump, RemoteSocket};

/// Serve a plain HTTP call on a tunnel path.
pub async fn serve_http(state: &AppState, version: ProtocolVersion, req: Request<Body>) -> Response {
    if req.method() == Method::OPTIONS {
        return preflight().await;
    }
    match tunnel_http(state, version, req).await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(
                version = %version,
                code = err.code(),
                message = err.message(),
                "Tunnel request rejected"
            );
            err.into_response()
        }
    }
}

async fn tunnel_http(
    state: &AppState,
    version: ProtocolVersion,
    req: Request<Body>,
) -> Result<Response, BareError> {
    let (parts, body) = req.into_parts();
    let mut request = TunnelRequest::parse(version, &parts.headers, parts.uri.query())?;
    request.apply_forwarded(&parts.headers);
    state
        .http
        .execute(parts.method, &request, body, version.policy())
        .await
}

/// Extract the upgrade from an upgrade request, keeping its headers.
pub async fn into_upgrade(
    state: &AppState,
    req: Request<Body>,
) -> Result<(WebSocketUpgrade, HeaderMap), Response> {
    let (mut parts, _body) = req.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, state)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((upgrade, parts.headers))
}

/// Pump a tunnel session to completion under session tracking.
pub async fn relay(
    state: &AppState,
    version: ProtocolVersion,
    client: WebSocket,
    remote: RemoteSocket,
    target: &RemoteTarget,
) {
    let session = state.sessions.track(version);
    tracing::info!(session_id = %session.id(), version = %version, remote = %target, "Tunnel session open");
    let end = pump(client, remote).await;
    tracing::info!(session_id = %session.id(), version = %version, end = ?end, "Tunnel session ended");
}

/// Close an accepted socket because the session could not be set up.
pub async fn reject(version: ProtocolVersion, client: WebSocket, err: BareError) {
    tracing::info!(
        version = %version,
        code = err.code(),
        message = err.message(),
        "WebSocket tunnel rejected"
    );
    metrics::record_error(err.code());
    close_with(client, &err).await;
}

/// `x-bare-id` of a metadata request.
pub fn meta_id(headers: &HeaderMap) -> Result<String, BareError> {
    let value = headers
        .get(X_BARE_ID)
        .ok_or_else(|| BareError::missing_header(X_BARE_ID))?;
    value
        .to_str()
        .map(|id| id.trim().to_string())
        .map_err(|_| BareError::invalid_header(X_BARE_ID, "Header x-bare-id was not valid text"))
}

/// Lowercased forward-header names with forbidden entries dropped.
pub fn allowed_forward_names(names: Vec<String>) -> Vec<String> {
    let mut allowed: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.to_ascii_lowercase();
        if is_listed(&name, FORBIDDEN_FORWARD_HEADERS) {
            tracing::debug!(header = %name, "Ignoring forbidden forward header");
            continue;
        }
        if !allowed.contains(&name) {
            allowed.push(name);
        }
    }
    allowed
}
