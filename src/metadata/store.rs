//! Expiring metadata records for WebSocket tunnels.
//!
//! # Responsibilities
//! - Mint random record IDs
//! - Hold the parameters a v2 client registered before its upgrade
//! - Hold the remote handshake outcome until the client reads it once
//! - Purge records nobody read within the TTL
//!
//! # Design Decisions
//! - DashMap shards the table so distinct IDs do not contend
//! - `consume_once` is a single `remove_if`; concurrent readers cannot
//!   both win
//! - Expired records are invisible even before the sweeper runs

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::bare::headers::{HeaderSet, X_BARE_ID};
use crate::bare::policy::ProtocolVersion;
use crate::bare::target::RemoteTarget;
use crate::bare::{BareError, ErrorKind};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unregistered or expired id")]
    NotFound,
    #[error("remote handshake has not completed")]
    NotReady,
}

impl From<StoreError> for BareError {
    fn from(err: StoreError) -> Self {
        let message = match err {
            StoreError::NotFound => "Unregistered ID",
            StoreError::NotReady => "Metadata for this ID is not ready",
        };
        BareError::invalid_header(X_BARE_ID, message)
    }
}

/// Connection parameters registered through a v2 `ws-new-meta` call.
#[derive(Debug, Clone)]
pub struct StoredRequest {
    pub target: RemoteTarget,
    pub send_headers: HeaderSet,
    pub forward_headers: Vec<String>,
}

/// Outcome of the remote WebSocket handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderSet,
}

impl MetaResponse {
    /// Synthetic outcome recorded when the remote connection failed.
    pub fn failure(err: &BareError) -> Self {
        let (status, status_text) = match (err.kind(), err.remote_status()) {
            (ErrorKind::RemoteHandshakeFailed, Some(status)) => (status, reason_phrase(status)),
            (ErrorKind::ConnectionRefused, _) => (503, "Connection Refused".to_string()),
            (ErrorKind::ForbiddenIp, _) => (403, err.code().to_string()),
            _ => (500, err.code().to_string()),
        };
        Self {
            status,
            status_text,
            headers: HeaderSet::new(),
        }
    }
}

fn reason_phrase(status: u16) -> String {
    axum::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}

#[derive(Debug)]
struct MetaRecord {
    version: ProtocolVersion,
    created: Instant,
    request: Option<StoredRequest>,
    response: Option<MetaResponse>,
}

/// Process-wide table of WebSocket metadata records.
#[derive(Debug)]
pub struct MetadataStore {
    records: DashMap<String, MetaRecord>,
    ttl: Duration,
}

impl MetadataStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }

    /// Register a record and return its ID.
    pub fn create(&self, version: ProtocolVersion, request: Option<StoredRequest>) -> String {
        let id = new_id();
        self.records.insert(
            id.clone(),
            MetaRecord {
                version,
                created: Instant::now(),
                request,
                response: None,
            },
        );
        metrics::set_metadata_entries(self.records.len());
        tracing::debug!(id = %id, version = %version, "Metadata record created");
        id
    }

    /// Whether `id` names a live, not yet populated record of `version`.
    pub fn is_pending(&self, id: &str, version: ProtocolVersion) -> bool {
        self.records.get(id).is_some_and(|record| {
            record.version == version && record.response.is_none() && !self.expired(&record)
        })
    }

    /// Registered connection parameters of a live record.
    pub fn request(&self, id: &str, version: ProtocolVersion) -> Result<StoredRequest, StoreError> {
        let record = self.records.get(id).ok_or(StoreError::NotFound)?;
        if record.version != version || self.expired(&record) {
            return Err(StoreError::NotFound);
        }
        record.request.clone().ok_or(StoreError::NotFound)
    }

    /// Record the handshake outcome. A record may only be populated once.
    pub fn populate(&self, id: &str, response: MetaResponse) -> Result<(), StoreError> {
        let mut record = self.records.get_mut(id).ok_or(StoreError::NotFound)?;
        if self.expired(&record) || record.response.is_some() {
            return Err(StoreError::NotFound);
        }
        record.response = Some(response);
        Ok(())
    }

    /// Remove and return the handshake outcome.
    pub fn consume_once(&self, id: &str, version: ProtocolVersion) -> Result<MetaResponse, StoreError> {
        let removed = self.records.remove_if(id, |_, record| {
            record.version == version && record.response.is_some() && !self.expired(record)
        });

        match removed {
            Some((_, record)) => {
                metrics::set_metadata_entries(self.records.len());
                record.response.ok_or(StoreError::NotFound)
            }
            None if self.is_pending(id, version) => Err(StoreError::NotReady),
            None => Err(StoreError::NotFound),
        }
    }

    /// Drop every record older than the TTL. Returns how many were purged.
    pub fn sweep(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !self.expired(record));
        let remaining = self.records.len();
        metrics::set_metadata_entries(remaining);
        before.saturating_sub(remaining)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn expired(&self, record: &MetaRecord) -> bool {
        record.created.elapsed() >= self.ttl
    }
}

/// Background task purging expired records.
pub struct MetaSweeper {
    store: Arc<MetadataStore>,
    interval: Duration,
}

impl MetaSweeper {
    pub fn new(store: Arc<MetadataStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Metadata sweeper starting");

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.store.sweep();
                    if purged > 0 {
                        tracing::debug!(purged, "Expired metadata records removed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Metadata sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn new_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> MetaResponse {
        MetaResponse {
            status: 101,
            status_text: "Switching Protocols".into(),
            headers: HeaderSet::new(),
        }
    }

    #[test]
    fn ids_are_random_hex() {
        let store = MetadataStore::new(Duration::from_secs(30));
        let a = store.create(ProtocolVersion::V1, None);
        let b = store.create(ProtocolVersion::V1, None);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn consume_exactly_once() {
        let store = MetadataStore::new(Duration::from_secs(30));
        let id = store.create(ProtocolVersion::V1, None);

        assert_eq!(store.consume_once(&id, ProtocolVersion::V1), Err(StoreError::NotReady));
        store.populate(&id, response()).unwrap();
        assert_eq!(store.consume_once(&id, ProtocolVersion::V1).unwrap().status, 101);
        assert_eq!(store.consume_once(&id, ProtocolVersion::V1), Err(StoreError::NotFound));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn versions_do_not_mix() {
        let store = MetadataStore::new(Duration::from_secs(30));
        let id = store.create(ProtocolVersion::V1, None);
        store.populate(&id, response()).unwrap();
        assert_eq!(store.consume_once(&id, ProtocolVersion::V2), Err(StoreError::NotFound));
        assert!(!store.is_pending(&id, ProtocolVersion::V2));
        assert!(store.consume_once(&id, ProtocolVersion::V1).is_ok());
    }

    #[tokio::test]
    async fn populate_only_once() {
        let store = MetadataStore::new(Duration::from_secs(30));
        let id = store.create(ProtocolVersion::V1, None);
        assert!(store.is_pending(&id, ProtocolVersion::V1));
        store.populate(&id, response()).unwrap();
        assert!(!store.is_pending(&id, ProtocolVersion::V1));
        assert_eq!(store.populate(&id, response()), Err(StoreError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire_after_ttl() {
        let store = MetadataStore::new(Duration::from_secs(30));
        let stale = store.create(ProtocolVersion::V1, None);
        store.populate(&stale, response()).unwrap();

        time::advance(Duration::from_secs(20)).await;
        let fresh = store.create(ProtocolVersion::V1, None);

        time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.consume_once(&stale, ProtocolVersion::V1), Err(StoreError::NotFound));
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.is_pending(&fresh, ProtocolVersion::V1));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_and_stops_on_shutdown() {
        let store = Arc::new(MetadataStore::new(Duration::from_secs(30)));
        store.create(ProtocolVersion::V2, None);

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(MetaSweeper::new(store.clone(), Duration::from_secs(5)).run(rx));

        time::sleep(Duration::from_secs(36)).await;
        assert!(store.is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn failure_outcomes() {
        let refused = MetaResponse::failure(&BareError::connection_refused());
        assert_eq!((refused.status, refused.status_text.as_str()), (503, "Connection Refused"));

        let rejected = MetaResponse::failure(&BareError::handshake_failed(404));
        assert_eq!((rejected.status, rejected.status_text.as_str()), (404, "Not Found"));

        let forbidden = MetaResponse::failure(&BareError::forbidden_ip("no"));
        assert_eq!((forbidden.status, forbidden.status_text.as_str()), (403, "FORBIDDEN_IP"));

        let timeout = MetaResponse::failure(&BareError::connection_timeout());
        assert_eq!(timeout.status, 500);
    }

    #[test]
    fn store_errors_map_to_invalid_header() {
        let err: BareError = StoreError::NotFound.into();
        assert_eq!(err.code(), "INVALID_BARE_HEADER");
        assert_eq!(err.id(), "request.headers.x-bare-id");
    }
}
