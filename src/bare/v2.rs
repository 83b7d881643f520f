//! Bare v2 endpoints.
//!
//! HTTP responses use selective pass-through. WebSocket parameters are
//! registered up front through `ws-new-meta`; the upgrade presents the
//! minted ID as its only subprotocol.

use axum::{
    body::Body,
    extract::{State, WebSocketUpgrade},
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::bare::endpoint::{into_upgrade, meta_id, reject, relay, serve_http};
use crate::bare::policy::ProtocolVersion;
use crate::bare::request::TunnelRequest;
use crate::bare::BareError;
use crate::http::request::{is_websocket_upgrade, offered_protocols};
use crate::http::response::{plain_text, write_envelope};
use crate::http::server::AppState;
use crate::metadata::{MetaResponse, StoredRequest};

const VERSION: ProtocolVersion = ProtocolVersion::V2;

/// `ANY {prefix}v2/`: HTTP tunnel or WebSocket upgrade.
pub async fn endpoint(State(state): State<AppState>, req: Request<Body>) -> Response {
    if !is_websocket_upgrade(req.headers()) {
        return serve_http(&state, VERSION, req).await;
    }
    match into_upgrade(&state, req).await {
        Ok((upgrade, headers)) => websocket(state, headers, upgrade),
        Err(rejection) => rejection,
    }
}

/// `POST {prefix}v2/ws-new-meta`: register the remote and headers for an
/// upcoming upgrade.
pub async fn new_meta(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, BareError> {
    let request = TunnelRequest::parse(VERSION, &headers, None)?;
    let target = request.target.to_string();
    let id = state.store.create(
        VERSION,
        Some(StoredRequest {
            target: request.target,
            send_headers: request.send_headers,
            forward_headers: request.forward_headers,
        }),
    );
    tracing::debug!(id = %id, remote = %target, "v2 WebSocket metadata registered");
    Ok(plain_text(id))
}

/// `GET {prefix}v2/ws-meta`: hand over the handshake outcome once, as Bare
/// envelope headers.
pub async fn ws_meta(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, BareError> {
    let id = meta_id(&headers)?;
    let outcome = state.store.consume_once(&id, VERSION)?;
    let mut response = StatusCode::OK.into_response();
    write_envelope(
        response.headers_mut(),
        outcome.status,
        &outcome.status_text,
        &outcome.headers,
    );
    Ok(response)
}

fn websocket(state: AppState, headers: HeaderMap, upgrade: WebSocketUpgrade) -> Response {
    let id = offered_protocols(&headers).into_iter().next();
    let upgrade = match &id {
        Some(id) => upgrade.protocols([id.clone()]),
        None => upgrade,
    };

    upgrade.on_upgrade(move |socket| async move {
        let Some(id) = id else {
            let err = BareError::missing_header(SEC_WEBSOCKET_PROTOCOL.as_str());
            return reject(VERSION, socket, err).await;
        };
        let stored = match state.store.request(&id, VERSION) {
            Ok(stored) => stored,
            Err(e) => return reject(VERSION, socket, e.into()).await,
        };

        let mut send_headers = stored.send_headers;
        send_headers.forward_from(&headers, &stored.forward_headers);

        match state.ws.connect(&stored.target, &send_headers, &[]).await {
            Ok(handshake) => {
                let outcome = MetaResponse {
                    status: handshake.status,
                    status_text: handshake.status_text,
                    headers: handshake.headers,
                };
                record(&state, &id, outcome);
                relay(&state, VERSION, socket, handshake.socket, &stored.target).await;
            }
            Err(err) => {
                record(&state, &id, MetaResponse::failure(&err));
                reject(VERSION, socket, err).await;
            }
        }
    })
}

fn record(state: &AppState, id: &str, outcome: MetaResponse) {
    if let Err(e) = state.store.populate(id, outcome) {
        tracing::debug!(id = %id, error = %e, "Handshake outcome not stored");
    }
}
