//! WebSocket metadata subsystem.
//!
//! # Data Flow
//! ```text
//! POST ws-new-meta   → store.create()        → id
//! WS upgrade (id)    → store.request()       → remote connect
//!                    → store.populate()      ← handshake outcome
//! GET ws-meta (id)   → store.consume_once()  → outcome, record deleted
//!
//! MetaSweeper (interval) → store.sweep() → expired records dropped
//! ```
//!
//! # Design Decisions
//! - One store per process, injected through application state
//! - Records live at most the configured TTL whether read or not

pub mod store;

pub use store::{MetaResponse, MetaSweeper, MetadataStore, StoreError, StoredRequest};
