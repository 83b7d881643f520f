//! Bare protocol error taxonomy.
//!
//! Every handler threads `Result<_, BareError>`; the error only becomes a
//! wire artifact at the outermost boundary: a JSON envelope for HTTP
//! responses, a close frame for WebSocket sessions.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Maximum length of a WebSocket close reason (125 byte payload minus the code).
const MAX_CLOSE_REASON: usize = 123;

/// WebSocket close code for protocol errors.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// WebSocket close code for policy violations.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// WebSocket close code for unexpected server conditions.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Classification of a Bare error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required Bare header was absent.
    MissingHeader,
    /// A Bare header was malformed (JSON, number, protocol value).
    InvalidHeader,
    /// A client-declared pass/forward list named a forbidden header.
    ForbiddenHeader,
    /// The destination resolves to a disallowed address.
    ForbiddenIp,
    /// DNS failure or no usable address.
    HostNotFound,
    ConnectionRefused,
    ConnectionTimeout,
    /// WebSocket upgrade rejected by the remote.
    RemoteHandshakeFailed,
    Unknown,
}

impl ErrorKind {
    /// Wire code placed in the `code` field of the error envelope.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::MissingHeader => "MISSING_BARE_HEADER",
            ErrorKind::InvalidHeader => "INVALID_BARE_HEADER",
            ErrorKind::ForbiddenHeader => "FORBIDDEN_BARE_HEADER",
            ErrorKind::ForbiddenIp => "FORBIDDEN_IP",
            ErrorKind::HostNotFound => "HOST_NOT_FOUND",
            ErrorKind::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorKind::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorKind::RemoteHandshakeFailed => "REMOTE_HANDSHAKE_FAILED",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// HTTP status of the error envelope.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::MissingHeader | ErrorKind::InvalidHeader | ErrorKind::ForbiddenHeader => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::ForbiddenIp => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// WebSocket close code used when the error ends a tunnel session.
    pub fn close_code(self) -> u16 {
        match self {
            ErrorKind::ForbiddenIp | ErrorKind::HostNotFound => CLOSE_POLICY_VIOLATION,
            ErrorKind::ConnectionTimeout | ErrorKind::Unknown => CLOSE_INTERNAL_ERROR,
            _ => CLOSE_PROTOCOL_ERROR,
        }
    }
}

/// A terminal protocol error for the current request or session.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", .kind.code())]
pub struct BareError {
    kind: ErrorKind,
    id: String,
    message: String,
    remote_status: Option<u16>,
}

/// JSON body of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub code: &'static str,
    pub id: &'a str,
    pub message: &'a str,
}

impl BareError {
    pub fn new(kind: ErrorKind, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            message: message.into(),
            remote_status: None,
        }
    }

    pub fn missing_header(name: &str) -> Self {
        Self::new(
            ErrorKind::MissingHeader,
            format!("request.headers.{name}"),
            format!("Header {name} was not specified."),
        )
    }

    pub fn invalid_header(name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidHeader, format!("request.headers.{name}"), message)
    }

    /// `list` is the header carrying the declaration, `name` the forbidden entry.
    pub fn forbidden_header(list: &str, name: &str) -> Self {
        Self::new(
            ErrorKind::ForbiddenHeader,
            format!("request.headers.{list}"),
            format!("A forbidden header was passed to {list}: {name}"),
        )
    }

    pub fn forbidden_ip(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ForbiddenIp, "request.remote.ip", message)
    }

    pub fn host_not_found(host: &str) -> Self {
        Self::new(
            ErrorKind::HostNotFound,
            "request.remote.host",
            format!("The specified host {host} could not be resolved."),
        )
    }

    pub fn connection_refused() -> Self {
        Self::new(
            ErrorKind::ConnectionRefused,
            "error.remote.connect",
            "The remote rejected the request.",
        )
    }

    pub fn connection_timeout() -> Self {
        Self::new(
            ErrorKind::ConnectionTimeout,
            "error.remote.timeout",
            "The connection timed out.",
        )
    }

    pub fn handshake_failed(status: u16) -> Self {
        let mut err = Self::new(
            ErrorKind::RemoteHandshakeFailed,
            "error.remote.handshake",
            format!("Remote WebSocket handshake failed: {status}"),
        );
        err.remote_status = Some(status);
        err
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, "error.unknown", message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Status returned by the remote when it rejected a WebSocket upgrade.
    pub fn remote_status(&self) -> Option<u16> {
        self.remote_status
    }

    pub fn envelope(&self) -> ErrorEnvelope<'_> {
        ErrorEnvelope {
            code: self.code(),
            id: &self.id,
            message: &self.message,
        }
    }

    /// Close code and reason for ending a WebSocket session with this error.
    pub fn close_frame(&self) -> (u16, String) {
        let mut reason = format!("{}: {}", self.code(), self.message);
        truncate_at_char_boundary(&mut reason, MAX_CLOSE_REASON);
        (self.kind.close_code(), reason)
    }
}

impl IntoResponse for BareError {
    fn into_response(self) -> Response {
        crate::observability::metrics::record_error(self.code());
        (self.status(), Json(self.envelope())).into_response()
    }
}

impl From<reqwest::Error> for BareError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BareError::connection_timeout()
        } else if err.is_connect() {
            BareError::connection_refused()
        } else {
            BareError::unknown(format!("Remote request failed: {err}"))
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BareError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) => BareError::handshake_failed(response.status().as_u16()),
            WsError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => BareError::connection_timeout(),
            WsError::Io(_) => BareError::connection_refused(),
            WsError::Protocol(e) => Self::new(
                ErrorKind::RemoteHandshakeFailed,
                "error.remote.handshake",
                format!("Remote WebSocket handshake failed: {e}"),
            ),
            other => BareError::unknown(format!("Remote WebSocket failed: {other}")),
        }
    }
}

fn truncate_at_char_boundary(value: &mut String, max: usize) {
    if value.len() <= max {
        return;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_kind() {
        assert_eq!(BareError::missing_header("x-bare-host").status(), StatusCode::BAD_REQUEST);
        assert_eq!(BareError::forbidden_ip("no").status(), StatusCode::FORBIDDEN);
        assert_eq!(
            BareError::host_not_found("nowhere.invalid").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(BareError::connection_timeout().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_header_envelope() {
        let err = BareError::missing_header("x-bare-host");
        let body = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(body["code"], "MISSING_BARE_HEADER");
        assert_eq!(body["id"], "request.headers.x-bare-host");
        assert_eq!(body["message"], "Header x-bare-host was not specified.");
    }

    #[test]
    fn close_codes() {
        assert_eq!(BareError::forbidden_ip("no").close_frame().0, CLOSE_POLICY_VIOLATION);
        assert_eq!(BareError::host_not_found("x").close_frame().0, CLOSE_POLICY_VIOLATION);
        assert_eq!(BareError::handshake_failed(404).close_frame().0, CLOSE_PROTOCOL_ERROR);
        assert_eq!(BareError::connection_refused().close_frame().0, CLOSE_PROTOCOL_ERROR);
        assert_eq!(BareError::unknown("boom").close_frame().0, CLOSE_INTERNAL_ERROR);
    }

    #[test]
    fn close_reason_is_bounded() {
        let err = BareError::unknown("é".repeat(200));
        let (_, reason) = err.close_frame();
        assert!(reason.len() <= MAX_CLOSE_REASON);
        assert!(reason.starts_with("UNKNOWN: "));
    }

    #[test]
    fn websocket_errors_are_classified() {
        use tokio_tungstenite::tungstenite::Error as WsError;
        let refused: BareError =
            WsError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)).into();
        assert_eq!(refused.kind(), ErrorKind::ConnectionRefused);

        let timeout: BareError = WsError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).into();
        assert_eq!(timeout.kind(), ErrorKind::ConnectionTimeout);
    }

    #[test]
    fn handshake_failure_keeps_remote_status() {
        let err = BareError::handshake_failed(403);
        assert_eq!(err.remote_status(), Some(403));
        assert_eq!(err.code(), "REMOTE_HANDSHAKE_FAILED");
    }
}
