//! Remote destination of a tunnel.

use std::fmt;

use url::Url;

use crate::bare::headers::{X_BARE_PORT, X_BARE_PROTOCOL, X_BARE_URL};
use crate::bare::BareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    /// Parse a Bare protocol value (`http:`, `https:`, `ws:`, `wss:`).
    pub fn from_protocol(raw: &str) -> Option<Self> {
        raw.strip_suffix(':').and_then(Self::parse)
    }

    /// Parse a bare scheme name as produced by `Url::scheme`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss)
    }

    fn http(self) -> &'static str {
        if self.is_secure() {
            "https"
        } else {
            "http"
        }
    }

    fn ws(self) -> &'static str {
        if self.is_secure() {
            "wss"
        } else {
            "ws"
        }
    }

    pub fn default_port(self) -> u16 {
        if self.is_secure() {
            443
        } else {
            80
        }
    }
}

/// `{scheme, host, port, path, query}` of the remote.
///
/// `host` is kept without IPv6 brackets; URLs re-add them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: Option<String>,
}

impl RemoteTarget {
    /// Build from discrete `x-bare-*` values (v1/v2 headers, v1 subprotocol meta).
    pub fn from_parts(protocol: &str, host: &str, port: u16, path: &str) -> Result<Self, BareError> {
        let scheme = Scheme::from_protocol(protocol).ok_or_else(|| {
            BareError::invalid_header(
                X_BARE_PROTOCOL,
                format!("Header {X_BARE_PROTOCOL} was invalid: {protocol}"),
            )
        })?;
        Self::with_scheme(scheme, host, port, path)
    }

    fn with_scheme(scheme: Scheme, host: &str, port: u16, path: &str) -> Result<Self, BareError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(BareError::invalid_header(
                crate::bare::headers::X_BARE_HOST,
                "Remote host was empty",
            ));
        }

        let path = if path.is_empty() { "/" } else { path };
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path, None),
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
            query,
        })
    }

    /// Build from a full URL (`x-bare-url`, v3 connect packet).
    pub fn from_url(raw: &str) -> Result<Self, BareError> {
        let invalid = || BareError::invalid_header(X_BARE_URL, format!("Invalid remote URL: {raw}"));
        let url = Url::parse(raw).map_err(|_| invalid())?;
        let scheme = Scheme::parse(url.scheme()).ok_or_else(invalid)?;
        let host = url.host_str().ok_or_else(invalid)?;
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let mut target = Self::with_scheme(scheme, host, port, url.path())?;
        target.query = url.query().map(str::to_string);
        Ok(target)
    }

    /// Append the bare endpoint's own query string.
    pub fn append_query(&mut self, extra: &str) {
        if extra.is_empty() {
            return;
        }
        self.query = Some(match self.query.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
            _ => extra.to_string(),
        });
    }

    fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// URL for an outbound HTTP request (`ws` maps to `http`, `wss` to `https`).
    pub fn http_url(&self) -> String {
        format!("{}://{}{}", self.scheme.http(), self.authority(), self.path_and_query())
    }

    /// URL for an outbound WebSocket handshake.
    pub fn ws_url(&self) -> String {
        format!("{}://{}{}", self.scheme.ws(), self.authority(), self.path_and_query())
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.authority(), self.path_and_query())
    }
}

/// Parse `x-bare-port`.
pub fn parse_port(raw: &str) -> Result<u16, BareError> {
    raw.trim().parse::<u16>().map_err(|_| {
        BareError::invalid_header(X_BARE_PORT, format!("Header {X_BARE_PORT} was not a valid port: {raw}"))
    })
}
