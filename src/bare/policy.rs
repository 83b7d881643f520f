//! Per-version behaviour of the tunnel endpoints.

use std::fmt;

/// Bare wire protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 3] = [ProtocolVersion::V1, ProtocolVersion::V2, ProtocolVersion::V3];

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "v1",
            ProtocolVersion::V2 => "v2",
            ProtocolVersion::V3 => "v3",
        }
    }

    pub fn policy(self) -> &'static VersionPolicy {
        match self {
            ProtocolVersion::V1 => &V1_POLICY,
            ProtocolVersion::V2 => &V2_POLICY,
            ProtocolVersion::V3 => &V3_POLICY,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a remote response is mapped back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Always 200; the remote status and headers travel in `x-bare-*`.
    Envelope,
    /// Declared statuses and headers bypass the envelope.
    SelectivePass,
}

/// Static knobs that distinguish the three HTTP tunnel variants.
#[derive(Debug)]
pub struct VersionPolicy {
    pub version: ProtocolVersion,
    pub mode: ResponseMode,
    /// `access-control-allow-methods` on every response.
    pub allow_methods: &'static str,
    pub default_pass_headers: &'static [&'static str],
    pub default_forward_headers: &'static [&'static str],
}

/// Additions applied when the bare endpoint is called with `?cache`.
pub const CACHE_PASS_HEADERS: &[&str] = &["cache-control", "etag"];
pub const CACHE_PASS_STATUS: &[u16] = &[304];
pub const CACHE_FORWARD_HEADERS: &[&str] = &["if-modified-since", "if-none-match", "cache-control"];

/// Headers copied verbatim from the remote in envelope mode.
pub const ENVELOPE_PASS_HEADERS: &[&str] = &["content-type", "content-length", "content-encoding"];

/// Remote statuses for which no body is streamed in selective-pass mode.
pub const EMPTY_BODY_STATUSES: &[u16] = &[101, 204, 205, 304];

const V1_METHODS: &str = "GET, HEAD, POST, PUT, DELETE, PATCH, OPTIONS";

pub static V1_POLICY: VersionPolicy = VersionPolicy {
    version: ProtocolVersion::V1,
    mode: ResponseMode::Envelope,
    allow_methods: V1_METHODS,
    default_pass_headers: &[],
    default_forward_headers: &[],
};

pub static V2_POLICY: VersionPolicy = VersionPolicy {
    version: ProtocolVersion::V2,
    mode: ResponseMode::SelectivePass,
    allow_methods: "*",
    default_pass_headers: &["content-encoding", "content-length", "last-modified"],
    default_forward_headers: &[
        "accept-encoding",
        "accept-language",
        "sec-websocket-extensions",
        "sec-websocket-key",
        "sec-websocket-version",
    ],
};

pub static V3_POLICY: VersionPolicy = VersionPolicy {
    version: ProtocolVersion::V3,
    mode: ResponseMode::SelectivePass,
    allow_methods: "*",
    default_pass_headers: &["content-encoding", "content-length", "last-modified"],
    default_forward_headers: &["accept-encoding", "accept-language"],
};

pub fn is_empty_body_status(status: u16) -> bool {
    EMPTY_BODY_STATUSES.contains(&status)
}
