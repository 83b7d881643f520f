//! Decoding of a tunnel request from its `x-bare-*` headers.
//!
//! # Data Flow
//! ```text
//! client headers
//!     → join_bare_headers (x-bare-headers-N → x-bare-headers)
//!     → target (v1/v2: host/port/protocol/path, v3: url)
//!     → send headers (JSON, forbidden send set dropped)
//!     → pass/forward/status lists (version defaults, ?cache additions)
//!     → TunnelRequest
//! ```

use axum::http::HeaderMap;

use crate::bare::headers::{
    join_bare_headers, merge_names, parse_csv_list, parse_json_list, parse_status_list,
    HeaderSet, FORBIDDEN_FORWARD_HEADERS, FORBIDDEN_PASS_HEADERS, FORBIDDEN_SEND_HEADERS,
    X_BARE_FORWARD_HEADERS, X_BARE_HEADERS, X_BARE_HOST, X_BARE_PASS_HEADERS, X_BARE_PASS_STATUS,
    X_BARE_PATH, X_BARE_PORT, X_BARE_PROTOCOL, X_BARE_URL,
};
use crate::bare::policy::{
    ProtocolVersion, CACHE_FORWARD_HEADERS, CACHE_PASS_HEADERS, CACHE_PASS_STATUS,
};
use crate::bare::target::{parse_port, RemoteTarget};
use crate::bare::BareError;

/// A fully decoded tunnel request, independent of the version that produced it.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    pub target: RemoteTarget,
    pub send_headers: HeaderSet,
    pub forward_headers: Vec<String>,
    pub pass_headers: Vec<String>,
    pub pass_status: Vec<u16>,
}

impl TunnelRequest {
    /// Decode the request headers for `version`.
    ///
    /// `query` is the bare endpoint's own query string: v1 forwards it to the
    /// remote, v2/v3 only look for the `cache` flag.
    pub fn parse(
        version: ProtocolVersion,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<Self, BareError> {
        let headers = join_bare_headers(headers);
        match version {
            ProtocolVersion::V1 => Self::parse_v1(&headers, query),
            ProtocolVersion::V2 => {
                let target = target_from_headers(&headers)?;
                Self::parse_lists(version, target, &headers, query)
            }
            ProtocolVersion::V3 => {
                let url = required(&headers, X_BARE_URL)?;
                let target = RemoteTarget::from_url(&url)?;
                Self::parse_lists(version, target, &headers, query)
            }
        }
    }

    fn parse_v1(headers: &HeaderMap, query: Option<&str>) -> Result<Self, BareError> {
        let mut target = target_from_headers(headers)?;
        if let Some(query) = query {
            target.append_query(query);
        }

        let send_headers = send_headers(headers)?;
        let raw = required(headers, X_BARE_FORWARD_HEADERS)?;
        let mut forward_headers = Vec::new();
        merge_names(
            X_BARE_FORWARD_HEADERS,
            parse_json_list(X_BARE_FORWARD_HEADERS, &raw)?,
            FORBIDDEN_FORWARD_HEADERS,
            &mut forward_headers,
        )?;

        Ok(Self {
            target,
            send_headers,
            forward_headers,
            pass_headers: Vec::new(),
            pass_status: Vec::new(),
        })
    }

    fn parse_lists(
        version: ProtocolVersion,
        target: RemoteTarget,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<Self, BareError> {
        let policy = version.policy();
        let cache = query.is_some_and(has_cache_flag);
        let send_headers = send_headers(headers)?;

        let mut pass_headers = to_owned(policy.default_pass_headers);
        let mut forward_headers = to_owned(policy.default_forward_headers);
        let mut pass_status = Vec::new();
        if cache {
            pass_headers.extend(to_owned(CACHE_PASS_HEADERS));
            forward_headers.extend(to_owned(CACHE_FORWARD_HEADERS));
            pass_status.extend_from_slice(CACHE_PASS_STATUS);
        }

        if let Some(raw) = optional(headers, X_BARE_PASS_HEADERS) {
            merge_names(
                X_BARE_PASS_HEADERS,
                parse_csv_list(&raw),
                FORBIDDEN_PASS_HEADERS,
                &mut pass_headers,
            )?;
        }
        if let Some(raw) = optional(headers, X_BARE_PASS_STATUS) {
            for status in parse_status_list(&raw)? {
                if !pass_status.contains(&status) {
                    pass_status.push(status);
                }
            }
        }
        if let Some(raw) = optional(headers, X_BARE_FORWARD_HEADERS) {
            merge_names(
                X_BARE_FORWARD_HEADERS,
                parse_csv_list(&raw),
                FORBIDDEN_FORWARD_HEADERS,
                &mut forward_headers,
            )?;
        }

        Ok(Self {
            target,
            send_headers,
            forward_headers,
            pass_headers,
            pass_status,
        })
    }

    /// Copy the client's values for every forward-header name into the send set.
    pub fn apply_forwarded(&mut self, client: &HeaderMap) {
        self.send_headers.forward_from(client, &self.forward_headers);
    }
}

fn target_from_headers(headers: &HeaderMap) -> Result<RemoteTarget, BareError> {
    let host = required(headers, X_BARE_HOST)?;
    let port = parse_port(&required(headers, X_BARE_PORT)?)?;
    let protocol = required(headers, X_BARE_PROTOCOL)?;
    let path = optional(headers, X_BARE_PATH).unwrap_or_else(|| "/".to_string());
    RemoteTarget::from_parts(&protocol, &host, port, &path)
}

fn send_headers(headers: &HeaderMap) -> Result<HeaderSet, BareError> {
    let mut set = HeaderSet::from_json(&required(headers, X_BARE_HEADERS)?)?;
    set.strip(FORBIDDEN_SEND_HEADERS);
    Ok(set)
}

fn required(headers: &HeaderMap, name: &str) -> Result<String, BareError> {
    let value = headers.get(name).ok_or_else(|| BareError::missing_header(name))?;
    value
        .to_str()
        .map(str::to_string)
        .map_err(|_| BareError::invalid_header(name, format!("Header {name} was not valid text")))
}

fn optional(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

fn to_owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Whether the bare endpoint was called with a `cache` query parameter.
pub fn has_cache_flag(query: &str) -> bool {
    url::form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == "cache")
}
