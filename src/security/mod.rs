//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Tunnel request (HTTP or WebSocket):
//!     → ssrf.rs (resolve remote host, reject local/reserved addresses)
//!     → outbound connection
//!
//! Every response of a version's endpoints:
//!     → cors.rs (permissive CORS + x-robots-tag)
//! ```
//!
//! # Design Decisions
//! - Fail closed: one forbidden address rejects the whole host
//! - The guard runs before any outbound socket is opened
//! - No trust in client input

pub mod cors;
pub mod ssrf;

pub use ssrf::{is_forbidden_ip, Resolve, SsrfGuard, SystemResolver};
