//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake, via axum-server)
//!     → Hand off to HTTP layer
//!
//! Upgraded tunnel session
//!     → connection.rs (session id, active-session gauge)
//! ```

pub mod connection;
pub mod tls;

pub use connection::{SessionGuard, SessionId, SessionTracker};
