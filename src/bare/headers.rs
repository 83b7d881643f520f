//! Header codec for the `x-bare-*` family.
//!
//! # Responsibilities
//! - Decode the JSON header blob carried in `x-bare-headers`
//! - Rejoin blobs split across `x-bare-headers-{N}` on ingress
//! - Split oversized blobs on egress
//! - Enforce the per-direction forbidden header sets
//!
//! # Design Decisions
//! - Split/join operate on raw header bytes so a chunk boundary may fall
//!   inside a multi-byte character without corrupting the rejoined value
//! - Names are compared lower-cased; the send set keeps the client's casing

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::bare::BareError;

pub const X_BARE_HEADERS: &str = "x-bare-headers";
pub const X_BARE_STATUS: &str = "x-bare-status";
pub const X_BARE_STATUS_TEXT: &str = "x-bare-status-text";
pub const X_BARE_HOST: &str = "x-bare-host";
pub const X_BARE_PORT: &str = "x-bare-port";
pub const X_BARE_PROTOCOL: &str = "x-bare-protocol";
pub const X_BARE_PATH: &str = "x-bare-path";
pub const X_BARE_URL: &str = "x-bare-url";
pub const X_BARE_ID: &str = "x-bare-id";
pub const X_BARE_FORWARD_HEADERS: &str = "x-bare-forward-headers";
pub const X_BARE_PASS_HEADERS: &str = "x-bare-pass-headers";
pub const X_BARE_PASS_STATUS: &str = "x-bare-pass-status";

/// Largest `x-bare-headers` value emitted in a single header.
pub const MAX_HEADER_VALUE: usize = 3072;

/// Headers the client may never have sent to the remote.
pub const FORBIDDEN_SEND_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding", "host"];

/// Headers the client may never forward from its own request.
pub const FORBIDDEN_FORWARD_HEADERS: &[&str] = &[
    "connection",
    "transfer-encoding",
    "origin",
    "referer",
    "host",
    "cookie",
];

/// Remote response headers the client may never have passed through.
pub const FORBIDDEN_PASS_HEADERS: &[&str] = &[
    "vary",
    "connection",
    "transfer-encoding",
    "access-control-allow-headers",
    "access-control-allow-methods",
    "access-control-expose-headers",
    "access-control-max-age",
    "access-control-request-headers",
    "access-control-request-method",
    X_BARE_STATUS,
    X_BARE_STATUS_TEXT,
    X_BARE_HEADERS,
];

/// One header's value(s) as carried in Bare JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderEntry {
    One(String),
    Many(Vec<String>),
}

impl HeaderEntry {
    pub fn values(&self) -> &[String] {
        match self {
            HeaderEntry::One(value) => std::slice::from_ref(value),
            HeaderEntry::Many(values) => values,
        }
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderEntry::One(first) => {
                *self = HeaderEntry::Many(vec![std::mem::take(first), value]);
            }
            HeaderEntry::Many(values) => values.push(value),
        }
    }
}

/// Ordered header name → value(s) mapping, serialized as the Bare JSON blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderSet(BTreeMap<String, HeaderEntry>);

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `x-bare-headers` JSON object.
    pub fn from_json(raw: &str) -> Result<Self, BareError> {
        serde_json::from_str(raw).map_err(|e| {
            BareError::invalid_header(
                X_BARE_HEADERS,
                format!("Header {X_BARE_HEADERS} contained invalid JSON: {e}"),
            )
        })
    }

    /// Collect a header map, collapsing repeated names into arrays.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut set = Self::new();
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            match set.0.get_mut(name.as_str()) {
                Some(entry) => entry.push(value),
                None => {
                    set.0.insert(name.as_str().to_string(), HeaderEntry::One(value));
                }
            }
        }
        set
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Set a header, replacing any entry whose name matches case-insensitively.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.0.insert(name, HeaderEntry::One(value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    }

    /// Silently drop every header in `forbidden`.
    pub fn strip(&mut self, forbidden: &[&str]) {
        self.0.retain(|name, _| !is_listed(name, forbidden));
    }

    /// All values for `name`, compared case-insensitively.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .flat_map(|(_, entry)| entry.values().iter().map(String::as_str))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.keys().any(|existing| existing.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderEntry)> {
        self.0.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Copy the values of `names` from the client's own request.
    pub fn forward_from(&mut self, client: &HeaderMap, names: &[String]) {
        for name in names {
            if let Some(value) = client.get(name.as_str()) {
                self.insert(name.clone(), String::from_utf8_lossy(value.as_bytes()).into_owned());
            }
        }
    }

    /// Build an outbound header map.
    pub fn to_header_map(&self) -> Result<HeaderMap, BareError> {
        let mut headers = HeaderMap::new();
        for (name, entry) in &self.0 {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                BareError::invalid_header(X_BARE_HEADERS, format!("Invalid header name: {name}"))
            })?;
            for value in entry.values() {
                let header_value = HeaderValue::from_bytes(value.as_bytes()).map_err(|_| {
                    BareError::invalid_header(
                        X_BARE_HEADERS,
                        format!("Invalid value for header {name}"),
                    )
                })?;
                headers.append(header_name.clone(), header_value);
            }
        }
        Ok(headers)
    }
}

impl FromIterator<(String, String)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

pub fn is_listed(name: &str, list: &[&str]) -> bool {
    list.iter().any(|entry| entry.eq_ignore_ascii_case(name))
}

/// Reassemble `x-bare-headers-{0..}` into a single `x-bare-headers`.
///
/// A fragment missing its leading `;` marks the sequence as malformed and
/// the headers are returned unreconstructed.
pub fn join_bare_headers(headers: &HeaderMap) -> HeaderMap {
    let first = format!("{X_BARE_HEADERS}-0");
    if !headers.contains_key(first.as_str()) {
        return headers.clone();
    }

    let mut joined = headers.clone();
    let mut value = Vec::new();
    for index in 0.. {
        let name = format!("{X_BARE_HEADERS}-{index}");
        let Some(part) = headers.get(name.as_str()) else {
            break;
        };
        let Some(part) = part.as_bytes().strip_prefix(b";") else {
            tracing::warn!(header = %name, "Split header part did not begin with ';'");
            return headers.clone();
        };
        value.extend_from_slice(part);
        joined.remove(name.as_str());
    }

    match HeaderValue::from_bytes(&value) {
        Ok(value) => {
            joined.insert(X_BARE_HEADERS, value);
            joined
        }
        Err(_) => headers.clone(),
    }
}

/// Partition an oversized `x-bare-headers` into `;`-prefixed fragments.
pub fn split_bare_headers(headers: &mut HeaderMap) {
    let oversized = headers
        .get(X_BARE_HEADERS)
        .is_some_and(|value| value.len() > MAX_HEADER_VALUE);
    if !oversized {
        return;
    }
    let Some(value) = headers.remove(X_BARE_HEADERS) else {
        return;
    };

    for (index, chunk) in value.as_bytes().chunks(MAX_HEADER_VALUE).enumerate() {
        let mut part = Vec::with_capacity(chunk.len() + 1);
        part.push(b';');
        part.extend_from_slice(chunk);
        let name = HeaderName::try_from(format!("{X_BARE_HEADERS}-{index}"));
        if let (Ok(name), Ok(part)) = (name, HeaderValue::from_bytes(&part)) {
            headers.insert(name, part);
        }
    }
}

/// Parse a JSON array of header names (v1 list headers).
pub fn parse_json_list(header: &str, raw: &str) -> Result<Vec<String>, BareError> {
    serde_json::from_str::<Vec<String>>(raw).map_err(|e| {
        BareError::invalid_header(header, format!("Header {header} must be a JSON array of strings: {e}"))
    })
}

/// Parse a comma separated list of header names (v2/v3 list headers).
pub fn parse_csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Parse `x-bare-pass-status`.
pub fn parse_status_list(raw: &str) -> Result<Vec<u16>, BareError> {
    raw.split(',')
        .map(str::trim)
        .filter(|status| !status.is_empty())
        .map(|status| {
            status.parse::<u16>().map_err(|_| {
                BareError::invalid_header(
                    X_BARE_PASS_STATUS,
                    format!("Invalid number in {X_BARE_PASS_STATUS}: {status}"),
                )
            })
        })
        .collect()
}

/// Merge `names` into `into`, rejecting any entry of `forbidden`.
pub fn merge_names(
    list_header: &str,
    names: Vec<String>,
    forbidden: &[&str],
    into: &mut Vec<String>,
) -> Result<(), BareError> {
    for name in names {
        let name = name.to_ascii_lowercase();
        if is_listed(&name, forbidden) {
            return Err(BareError::forbidden_header(list_header, &name));
        }
        if !into.contains(&name) {
            into.push(name);
        }
    }
    Ok(())
}
