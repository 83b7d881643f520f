//! Bare tunnel protocol.
//!
//! # Data Flow
//! ```text
//! {prefix}                 → manifest.rs
//! {prefix}v1/ (+ ws-meta)  → v1.rs ─┐
//! {prefix}v2/ (+ ws-meta)  → v2.rs ─┼→ endpoint.rs → request.rs → tunnel::{http, websocket}
//! {prefix}v3/              → v3.rs ─┘
//! ```
//!
//! `headers.rs` holds the wire names and the split/join codec, `policy.rs`
//! what differs between versions, `error.rs` the error taxonomy shared by
//! every path.

pub mod endpoint;
pub mod error;
pub mod headers;
pub mod manifest;
pub mod policy;
pub mod request;
pub mod target;
pub mod v1;
pub mod v2;
pub mod v3;

pub use error::{BareError, ErrorKind};
pub use manifest::Manifest;
pub use policy::{ProtocolVersion, VersionPolicy};
pub use request::TunnelRequest;
