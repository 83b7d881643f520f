//! Response construction shared by the tunnel endpoints.
//!
//! # Responsibilities
//! - Write the `x-bare-status` / `x-bare-status-text` / `x-bare-headers` envelope
//! - Split oversized envelopes across `x-bare-headers-N`
//! - Plain-text and JSON bodies for the metadata endpoints

use axum::{
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::bare::headers::{split_bare_headers, HeaderSet, X_BARE_HEADERS, X_BARE_STATUS, X_BARE_STATUS_TEXT};

/// Write the remote status and header set into Bare envelope headers.
pub fn write_envelope(headers: &mut HeaderMap, status: u16, status_text: &str, remote: &HeaderSet) {
    headers.insert(X_BARE_STATUS, HeaderValue::from(status));
    if let Ok(text) = HeaderValue::from_bytes(status_text.as_bytes()) {
        headers.insert(X_BARE_STATUS_TEXT, text);
    }
    if let Ok(value) = HeaderValue::from_bytes(remote.to_json().as_bytes()) {
        headers.insert(X_BARE_HEADERS, value);
    }
    split_bare_headers(headers);
}

/// `200 text/plain` response.
pub fn plain_text(body: String) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bare::headers::join_bare_headers;

    #[test]
    fn small_envelope_stays_whole() {
        let mut remote = HeaderSet::new();
        remote.insert("content-type", "text/html");
        let mut headers = HeaderMap::new();
        write_envelope(&mut headers, 404, "Not Found", &remote);

        assert_eq!(headers.get(X_BARE_STATUS).unwrap(), "404");
        assert_eq!(headers.get(X_BARE_STATUS_TEXT).unwrap(), "Not Found");
        assert_eq!(headers.get(X_BARE_HEADERS).unwrap(), r#"{"content-type":"text/html"}"#);
    }

    #[test]
    fn oversized_envelope_is_split() {
        let big = "a".repeat(5000);
        let mut remote = HeaderSet::new();
        remote.insert("x-big", big.clone());
        let mut headers = HeaderMap::new();
        write_envelope(&mut headers, 200, "OK", &remote);

        assert!(headers.get(X_BARE_HEADERS).is_none());
        assert!(headers.get("x-bare-headers-0").is_some());
        assert!(headers.get("x-bare-headers-1").is_some());

        let joined = join_bare_headers(&headers);
        let set = HeaderSet::from_json(joined.get(X_BARE_HEADERS).unwrap().to_str().unwrap()).unwrap();
        assert_eq!(set.get_all("x-big"), vec![big.as_str()]);
    }
}
