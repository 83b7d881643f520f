//! Bare v3 endpoints.
//!
//! HTTP uses selective pass-through with the remote given as `x-bare-url`.
//! WebSocket setup is in-band: the client's first text frame is a connect
//! packet, answered by an open packet once the remote is up.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, Request},
    response::Response,
};
use serde::{Deserialize, Serialize};

use crate::bare::endpoint::{allowed_forward_names, into_upgrade, reject, relay, serve_http};
use crate::bare::headers::{HeaderSet, FORBIDDEN_SEND_HEADERS};
use crate::bare::policy::ProtocolVersion;
use crate::bare::target::RemoteTarget;
use crate::bare::{BareError, ErrorKind};
use crate::http::request::is_websocket_upgrade;
use crate::http::server::AppState;
use crate::tunnel::RemoteHandshake;

const VERSION: ProtocolVersion = ProtocolVersion::V3;

const PACKET_ID: &str = "request.websocket.packet";

/// `ANY {prefix}v3/`: HTTP tunnel or WebSocket upgrade.
pub async fn endpoint(State(state): State<AppState>, req: Request<Body>) -> Response {
    if !is_websocket_upgrade(req.headers()) {
        return serve_http(&state, VERSION, req).await;
    }
    match into_upgrade(&state, req).await {
        Ok((upgrade, headers)) => websocket(state, headers, upgrade),
        Err(rejection) => rejection,
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ConnectType {
    Connect,
}

/// First client frame of a v3 session.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectPacket {
    #[serde(rename = "type")]
    _kind: ConnectType,
    remote: String,
    headers: HeaderSet,
    #[serde(rename = "forwardHeaders")]
    forward_headers: Vec<String>,
    protocols: Vec<String>,
}

impl ConnectPacket {
    fn parse(text: &str) -> Result<Self, BareError> {
        serde_json::from_str(text).map_err(|e| invalid_packet(format!("Invalid connect packet: {e}")))
    }
}

/// Server reply once the remote accepted the upgrade.
#[derive(Debug, Serialize)]
struct OpenPacket {
    #[serde(rename = "type")]
    kind: &'static str,
    protocol: String,
    #[serde(rename = "setCookies")]
    set_cookies: Vec<String>,
}

impl OpenPacket {
    fn from_handshake(handshake: &RemoteHandshake) -> Self {
        Self {
            kind: "open",
            protocol: handshake.protocol.clone().unwrap_or_default(),
            set_cookies: handshake.set_cookies.clone(),
        }
    }
}

fn invalid_packet(message: impl Into<String>) -> BareError {
    BareError::new(ErrorKind::InvalidHeader, PACKET_ID, message)
}

fn websocket(state: AppState, headers: HeaderMap, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |mut socket| async move {
        let wait = Duration::from_secs(state.config.bare.connect_packet_timeout_secs);
        let packet = match tokio::time::timeout(wait, read_connect(&mut socket)).await {
            Ok(Ok(packet)) => packet,
            Ok(Err(err)) => return reject(VERSION, socket, err).await,
            Err(_) => {
                let err = invalid_packet("No connect packet received in time");
                return reject(VERSION, socket, err).await;
            }
        };

        match open(&state, &headers, packet).await {
            Ok((handshake, target)) => {
                let reply = OpenPacket::from_handshake(&handshake);
                let reply = match serde_json::to_string(&reply) {
                    Ok(reply) => reply,
                    Err(e) => return reject(VERSION, socket, BareError::unknown(e.to_string())).await,
                };
                if let Err(e) = socket.send(Message::Text(reply.into())).await {
                    tracing::debug!(error = %e, "Client went away before the open packet");
                    return;
                }
                relay(&state, VERSION, socket, handshake.socket, &target).await;
            }
            Err(err) => reject(VERSION, socket, err).await,
        }
    })
}

async fn read_connect(socket: &mut WebSocket) -> Result<ConnectPacket, BareError> {
    while let Some(message) = socket.recv().await {
        let message = message.map_err(|e| invalid_packet(format!("Client socket failed: {e}")))?;
        match message {
            Message::Text(text) => return ConnectPacket::parse(text.as_str()),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Binary(_) => return Err(invalid_packet("Connect packet must be a text frame")),
            Message::Close(_) => break,
        }
    }
    Err(invalid_packet("Client closed before sending a connect packet"))
}

async fn open(
    state: &AppState,
    client: &HeaderMap,
    packet: ConnectPacket,
) -> Result<(RemoteHandshake, RemoteTarget), BareError> {
    let target = RemoteTarget::from_url(&packet.remote)?;

    let mut send_headers = packet.headers;
    send_headers.strip(FORBIDDEN_SEND_HEADERS);
    send_headers.forward_from(client, &allowed_forward_names(packet.forward_headers));

    let handshake = state.ws.connect(&target, &send_headers, &packet.protocols).await?;
    Ok((handshake, target))
}
