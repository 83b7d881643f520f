//! Outbound HTTP tunnel.
//!
//! # Responsibilities
//! - Authorize the remote host before any socket is opened
//! - Issue the request with redirects disabled and a response deadline
//! - Map the remote response to the client per response mode
//!
//! # Design Decisions
//! - The deadline covers connect and response headers, not the body stream
//! - Bodies stream in both directions; nothing is buffered

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};

use crate::bare::headers::HeaderSet;
use crate::bare::policy::{is_empty_body_status, ResponseMode, VersionPolicy, ENVELOPE_PASS_HEADERS};
use crate::bare::request::TunnelRequest;
use crate::bare::BareError;
use crate::http::response::write_envelope;
use crate::observability::metrics;
use crate::security::SsrfGuard;

/// Executes HTTP tunnel requests against remotes.
#[derive(Debug, Clone)]
pub struct HttpTunnel {
    client: reqwest::Client,
    guard: SsrfGuard,
    timeout: Duration,
}

impl HttpTunnel {
    pub fn new(guard: SsrfGuard, timeout: Duration) -> Result<Self, BareError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BareError::unknown(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            guard,
            timeout,
        })
    }

    pub fn guard(&self) -> &SsrfGuard {
        &self.guard
    }

    pub async fn execute(
        &self,
        method: Method,
        request: &TunnelRequest,
        body: Body,
        policy: &VersionPolicy,
    ) -> Result<Response, BareError> {
        let start = Instant::now();
        self.guard.authorize(&request.target.host).await?;

        let url = request.target.http_url();
        let mut outbound = self
            .client
            .request(method.clone(), &url)
            .headers(request.send_headers.to_header_map()?);
        if method != Method::GET && method != Method::HEAD {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let remote = match tokio::time::timeout(self.timeout, outbound.send()).await {
            Ok(result) => result.map_err(|e| {
                tracing::debug!(remote = %url, error = %e, "Remote request failed");
                BareError::from(e)
            })?,
            Err(_) => return Err(BareError::connection_timeout()),
        };

        let status = remote.status().as_u16();
        tracing::info!(
            version = %policy.version,
            method = %method,
            remote = %url,
            status,
            "Tunneled HTTP request"
        );
        metrics::record_request(policy.version.as_str(), status, start);

        Ok(map_response(remote, request, policy))
    }
}

/// Translate the remote response for the client.
pub fn map_response(remote: reqwest::Response, request: &TunnelRequest, policy: &VersionPolicy) -> Response {
    let status = remote.status();
    let remote_headers = remote.headers();
    let mut headers = HeaderMap::new();

    let selective = policy.mode == ResponseMode::SelectivePass;
    let client_status = if selective && request.pass_status.contains(&status.as_u16()) {
        copy_named(remote_headers, &mut headers, request.pass_headers.iter().map(String::as_str));
        status
    } else {
        if selective {
            copy_named(remote_headers, &mut headers, request.pass_headers.iter().map(String::as_str));
        } else {
            copy_named(remote_headers, &mut headers, ENVELOPE_PASS_HEADERS.iter().copied());
        }
        write_envelope(
            &mut headers,
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            &HeaderSet::from_header_map(remote_headers),
        );
        StatusCode::OK
    };

    let body = if selective && is_empty_body_status(status.as_u16()) {
        Body::empty()
    } else {
        Body::from_stream(remote.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = client_status;
    *response.headers_mut() = headers;
    response
}

fn copy_named<'a>(from: &HeaderMap, to: &mut HeaderMap, names: impl Iterator<Item = &'a str>) {
    for name in names {
        for value in from.get_all(name) {
            if let Ok(name) = axum::http::HeaderName::from_bytes(name.as_bytes()) {
                to.append(name, value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bare::headers::{X_BARE_HEADERS, X_BARE_STATUS, X_BARE_STATUS_TEXT};
    use crate::bare::policy::ProtocolVersion;

    fn remote(status: u16, headers: &[(&'static str, &'static str)], body: &'static str) -> reqwest::Response {
        let mut builder = axum::http::Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        reqwest::Response::from(builder.body(body).unwrap())
    }

    fn request(version: ProtocolVersion, pass_status: Vec<u16>) -> TunnelRequest {
        let policy = version.policy();
        TunnelRequest {
            target: crate::bare::target::RemoteTarget::from_url("https://example.com/").unwrap(),
            send_headers: HeaderSet::new(),
            forward_headers: Vec::new(),
            pass_headers: policy.default_pass_headers.iter().map(|h| h.to_string()).collect(),
            pass_status,
        }
    }

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn envelope_mode_wraps_status_and_headers() {
        let remote = remote(404, &[("content-type", "text/plain"), ("x-custom", "1")], "missing");
        let policy = ProtocolVersion::V1.policy();
        let response = map_response(remote, &request(ProtocolVersion::V1, Vec::new()), policy);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(X_BARE_STATUS).unwrap(), "404");
        assert_eq!(response.headers().get(X_BARE_STATUS_TEXT).unwrap(), "Not Found");
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
        assert!(response.headers().get("x-custom").is_none());

        let json = response.headers().get(X_BARE_HEADERS).unwrap().to_str().unwrap();
        let set = HeaderSet::from_json(json).unwrap();
        assert_eq!(set.get_all("x-custom"), vec!["1"]);
        assert_eq!(body_of(response).await, b"missing");
    }

    #[tokio::test]
    async fn selective_mode_passes_declared_status() {
        let remote = remote(304, &[("etag", "\"abc\""), ("last-modified", "yesterday")], "");
        let policy = ProtocolVersion::V3.policy();
        let mut request = request(ProtocolVersion::V3, vec![304]);
        request.pass_headers.push("etag".into());

        let response = map_response(remote, &request, policy);
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers().get("etag").unwrap(), "\"abc\"");
        assert_eq!(response.headers().get("last-modified").unwrap(), "yesterday");
        assert!(response.headers().get(X_BARE_STATUS).is_none());
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn selective_mode_wraps_undeclared_status() {
        let remote = remote(200, &[("content-type", "text/html"), ("last-modified", "today")], "<p>");
        let policy = ProtocolVersion::V2.policy();
        let response = map_response(remote, &request(ProtocolVersion::V2, Vec::new()), policy);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(X_BARE_STATUS).unwrap(), "200");
        assert_eq!(response.headers().get("last-modified").unwrap(), "today");
        assert!(response.headers().get("content-type").is_none());
        assert_eq!(body_of(response).await, b"<p>");
    }

    #[tokio::test]
    async fn selective_mode_drops_body_for_empty_statuses() {
        let remote = remote(204, &[], "");
        let policy = ProtocolVersion::V3.policy();
        let response = map_response(remote, &request(ProtocolVersion::V3, Vec::new()), policy);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(X_BARE_STATUS).unwrap(), "204");
        assert!(body_of(response).await.is_empty());
    }
}
