//! Bare v1 endpoints.
//!
//! HTTP responses use the envelope mode. WebSocket metadata travels inside
//! the second `Sec-WebSocket-Protocol` entry, percent-encoded; the remote's
//! handshake headers are retrieved afterwards through `ws-meta`.

use axum::{
    body::Body,
    extract::{State, WebSocketUpgrade},
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::bare::endpoint::{allowed_forward_names, into_upgrade, meta_id, reject, relay, serve_http};
use crate::bare::headers::{HeaderSet, FORBIDDEN_SEND_HEADERS};
use crate::bare::policy::ProtocolVersion;
use crate::bare::target::{parse_port, RemoteTarget};
use crate::bare::BareError;
use crate::http::request::{is_websocket_upgrade, offered_protocols};
use crate::http::response::plain_text;
use crate::http::server::AppState;
use crate::metadata::{MetaResponse, StoreError};
use crate::tunnel::RemoteSocket;

const VERSION: ProtocolVersion = ProtocolVersion::V1;

/// Subprotocol a v1 client must offer first.
pub const BARE_PROTOCOL: &str = "bare";

/// `ANY {prefix}v1/`: HTTP tunnel or WebSocket upgrade.
pub async fn endpoint(State(state): State<AppState>, req: Request<Body>) -> Response {
    if !is_websocket_upgrade(req.headers()) {
        return serve_http(&state, VERSION, req).await;
    }
    match into_upgrade(&state, req).await {
        Ok((upgrade, headers)) => websocket(state, headers, upgrade),
        Err(rejection) => rejection,
    }
}

/// `POST {prefix}v1/ws-new-meta`: mint an ID for an upcoming upgrade.
pub async fn new_meta(State(state): State<AppState>) -> Response {
    plain_text(state.store.create(VERSION, None))
}

#[derive(Serialize)]
struct MetaBody<'a> {
    headers: &'a HeaderSet,
}

/// `GET {prefix}v1/ws-meta`: hand over the remote handshake headers once.
pub async fn ws_meta(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, BareError> {
    let id = meta_id(&headers)?;
    let outcome = state.store.consume_once(&id, VERSION)?;
    Ok(Json(MetaBody {
        headers: &outcome.headers,
    })
    .into_response())
}

/// Connection metadata carried in the subprotocol list.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SocketMeta {
    remote: SocketRemote,
    headers: HeaderSet,
    forward_headers: Vec<String>,
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SocketRemote {
    protocol: String,
    host: String,
    port: PortValue,
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

impl SocketRemote {
    fn target(&self) -> Result<RemoteTarget, BareError> {
        let port = match &self.port {
            PortValue::Number(port) => *port,
            PortValue::Text(raw) => parse_port(raw)?,
        };
        RemoteTarget::from_parts(&self.protocol, &self.host, port, &self.path)
    }
}

fn invalid_protocol(message: impl Into<String>) -> BareError {
    BareError::invalid_header(SEC_WEBSOCKET_PROTOCOL.as_str(), message)
}

fn parse_meta(headers: &HeaderMap) -> Result<SocketMeta, BareError> {
    let offered = offered_protocols(headers);
    match offered.first() {
        Some(first) if first.eq_ignore_ascii_case(BARE_PROTOCOL) => {}
        _ => return Err(invalid_protocol("Expected 'bare' as the first subprotocol")),
    }
    let encoded = offered
        .get(1)
        .ok_or_else(|| invalid_protocol("Missing encoded metadata in Sec-WebSocket-Protocol"))?;

    let decoded = String::from_utf8(decode_protocol(encoded))
        .map_err(|_| invalid_protocol("Metadata was not valid UTF-8"))?;
    serde_json::from_str(&decoded).map_err(|e| invalid_protocol(format!("Invalid v1 WebSocket metadata: {e}")))
}

/// `%XX` escapes to bytes; anything else, malformed escapes included, is kept.
fn decode_protocol(raw: &str) -> Vec<u8> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes
                .get(i + 1..i + 3)
                .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = escape {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn websocket(state: AppState, headers: HeaderMap, upgrade: WebSocketUpgrade) -> Response {
    let meta = parse_meta(&headers);
    upgrade
        .protocols([BARE_PROTOCOL])
        .on_upgrade(move |socket| async move {
            let meta = match meta {
                Ok(meta) => meta,
                Err(err) => return reject(VERSION, socket, err).await,
            };
            match open(&state, &headers, meta).await {
                Ok((remote, target)) => relay(&state, VERSION, socket, remote, &target).await,
                Err(err) => reject(VERSION, socket, err).await,
            }
        })
}

async fn open(
    state: &AppState,
    client: &HeaderMap,
    meta: SocketMeta,
) -> Result<(RemoteSocket, RemoteTarget), BareError> {
    if !state.store.is_pending(&meta.id, VERSION) {
        return Err(StoreError::NotFound.into());
    }
    let target = meta.remote.target()?;

    let mut send_headers = meta.headers;
    send_headers.strip(FORBIDDEN_SEND_HEADERS);
    send_headers.forward_from(client, &allowed_forward_names(meta.forward_headers));

    let handshake = state.ws.connect(&target, &send_headers, &[]).await?;
    let outcome = MetaResponse {
        status: handshake.status,
        status_text: handshake.status_text,
        headers: handshake.headers,
    };
    if let Err(e) = state.store.populate(&meta.id, outcome) {
        tracing::debug!(id = %meta.id, error = %e, "Handshake metadata not stored");
    }
    Ok((handshake.socket, target))
}
