//! Outbound WebSocket tunnel and the duplex pump.
//!
//! # Data Flow
//! ```text
//! Client ←──── axum WebSocket ────→ pump ←──── tungstenite ────→ Remote
//! ```
//!
//! # Design Decisions
//! - Only text and binary frames are relayed; each endpoint answers its
//!   own pings
//! - A close frame from one side is forwarded before teardown
//! - The first direction to finish ends the session; the other is dropped
//! - Teardown of both sinks is bounded by a close deadline

use std::time::Duration;

use axum::extract::ws::{CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{HeaderName, HeaderValue},
    protocol::{frame::coding::CloseCode, CloseFrame as RemoteCloseFrame},
    Message as RemoteMessage,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::bare::error::CLOSE_INTERNAL_ERROR;
use crate::bare::headers::{is_listed, HeaderSet};
use crate::bare::target::RemoteTarget;
use crate::bare::BareError;
use crate::security::SsrfGuard;

pub type RemoteSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Headers owned by the handshake itself; never copied from the client.
pub const HANDSHAKE_HEADERS: &[&str] = &[
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "sec-websocket-accept",
    "sec-websocket-protocol",
    "upgrade",
    "connection",
    "host",
];

/// Time allowed for both sides to complete the closing handshake.
const CLOSE_DEADLINE: Duration = Duration::from_secs(5);

/// An open remote socket and what its handshake response said.
pub struct RemoteHandshake {
    pub socket: RemoteSocket,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderSet,
    /// Subprotocol the remote selected.
    pub protocol: Option<String>,
    pub set_cookies: Vec<String>,
}

/// Opens guarded WebSocket connections to remotes.
#[derive(Debug, Clone)]
pub struct WsConnector {
    guard: SsrfGuard,
    timeout: Duration,
}

impl WsConnector {
    pub fn new(guard: SsrfGuard, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    /// Authorize and connect to `target`, offering `protocols`.
    ///
    /// A remote that selects no subprotocol while some were offered fails
    /// the handshake.
    pub async fn connect(
        &self,
        target: &RemoteTarget,
        headers: &HeaderSet,
        protocols: &[String],
    ) -> Result<RemoteHandshake, BareError> {
        self.guard.authorize(&target.host).await?;

        let url = target.ws_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BareError::unknown(format!("Invalid remote WebSocket URL {url}: {e}")))?;

        for (name, entry) in headers.iter() {
            if is_listed(name, HANDSHAKE_HEADERS) {
                continue;
            }
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in entry.values() {
                if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                    request.headers_mut().append(name.clone(), value);
                }
            }
        }
        if !protocols.is_empty() {
            let offered = HeaderValue::from_str(&protocols.join(", "))
                .map_err(|_| BareError::unknown("Invalid WebSocket subprotocol list"))?;
            request.headers_mut().insert("sec-websocket-protocol", offered);
        }

        let (socket, response) =
            match tokio::time::timeout(self.timeout, tokio_tungstenite::connect_async(request)).await {
                Ok(result) => result.map_err(|e| {
                    tracing::debug!(remote = %url, error = %e, "Remote WebSocket handshake failed");
                    BareError::from(e)
                })?,
                Err(_) => return Err(BareError::connection_timeout()),
            };

        let status = response.status();
        let protocol = response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let set_cookies = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();

        tracing::debug!(remote = %url, status = status.as_u16(), "Remote WebSocket connected");
        Ok(RemoteHandshake {
            socket,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers: HeaderSet::from_header_map(response.headers()),
            protocol,
            set_cookies,
        })
    }
}

/// How a pumped session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEnd {
    ClientClosed,
    RemoteClosed,
    ClientError(String),
    RemoteError(String),
}

/// Relay frames between `client` and `remote` until either side finishes.
pub async fn pump(client: WebSocket, remote: RemoteSocket) -> PumpEnd {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut remote_tx, mut remote_rx) = remote.split();

    let end = {
        let upstream = async {
            while let Some(message) = client_rx.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => return PumpEnd::ClientError(e.to_string()),
                };
                let closing = matches!(message, ClientMessage::Close(_));
                let Some(message) = to_remote(message) else {
                    continue;
                };
                if let Err(e) = remote_tx.send(message).await {
                    return PumpEnd::RemoteError(e.to_string());
                }
                if closing {
                    return PumpEnd::ClientClosed;
                }
            }
            PumpEnd::ClientClosed
        };

        let downstream = async {
            while let Some(message) = remote_rx.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => return PumpEnd::RemoteError(e.to_string()),
                };
                let closing = matches!(message, RemoteMessage::Close(_));
                let Some(message) = to_client(message) else {
                    continue;
                };
                if let Err(e) = client_tx.send(message).await {
                    return PumpEnd::ClientError(e.to_string());
                }
                if closing {
                    return PumpEnd::RemoteClosed;
                }
            }
            PumpEnd::RemoteClosed
        };

        tokio::select! {
            end = upstream => end,
            end = downstream => end,
        }
    };

    let teardown = async {
        if let PumpEnd::RemoteError(reason) = &end {
            let frame = ClientCloseFrame {
                code: CLOSE_INTERNAL_ERROR,
                reason: bounded_reason(&format!("UNKNOWN: {reason}")).into(),
            };
            let _ = client_tx.send(ClientMessage::Close(Some(frame))).await;
        }
        let _ = client_tx.close().await;
        let _ = remote_tx.close().await;
    };
    if tokio::time::timeout(CLOSE_DEADLINE, teardown).await.is_err() {
        tracing::debug!("WebSocket close deadline elapsed");
    }

    end
}

/// Close an accepted client socket with the error's close code and reason.
pub async fn close_with(mut client: WebSocket, err: &BareError) {
    let (code, reason) = err.close_frame();
    let frame = ClientCloseFrame {
        code,
        reason: reason.into(),
    };
    let close = async {
        let _ = client.send(ClientMessage::Close(Some(frame))).await;
        // Drain until the peer acknowledges the close.
        while let Some(Ok(message)) = client.next().await {
            if matches!(message, ClientMessage::Close(_)) {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(CLOSE_DEADLINE, close).await;
}

fn to_remote(message: ClientMessage) -> Option<RemoteMessage> {
    match message {
        ClientMessage::Text(text) => Some(RemoteMessage::Text(text.as_str().into())),
        ClientMessage::Binary(data) => Some(RemoteMessage::Binary(data)),
        ClientMessage::Close(frame) => Some(RemoteMessage::Close(frame.map(|frame| RemoteCloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.as_str().into(),
        }))),
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => None,
    }
}

fn to_client(message: RemoteMessage) -> Option<ClientMessage> {
    match message {
        RemoteMessage::Text(text) => Some(ClientMessage::Text(text.as_str().into())),
        RemoteMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        RemoteMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|frame| ClientCloseFrame {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().into(),
        }))),
        RemoteMessage::Ping(_) | RemoteMessage::Pong(_) | RemoteMessage::Frame(_) => None,
    }
}

fn bounded_reason(reason: &str) -> String {
    let mut end = reason.len().min(123);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_binary_convert_both_ways() {
        let remote = to_remote(ClientMessage::Text("hello".into())).unwrap();
        assert_eq!(remote, RemoteMessage::Text("hello".into()));

        let client = to_client(RemoteMessage::Binary(vec![1u8, 2, 3].into())).unwrap();
        assert_eq!(client, ClientMessage::Binary(vec![1u8, 2, 3].into()));
    }

    #[test]
    fn control_frames_are_not_relayed() {
        assert!(to_remote(ClientMessage::Ping(vec![1u8].into())).is_none());
        assert!(to_client(RemoteMessage::Pong(vec![1u8].into())).is_none());
    }

    #[test]
    fn close_frames_keep_code_and_reason() {
        let frame = ClientCloseFrame {
            code: 4000,
            reason: "bye".into(),
        };
        match to_remote(ClientMessage::Close(Some(frame))).unwrap() {
            RemoteMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4000);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn reasons_are_bounded() {
        assert!(bounded_reason(&"x".repeat(500)).len() <= 123);
    }
}
