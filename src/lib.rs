//! Bare protocol tunnel server library.
//!
//! Lets a sandboxed client ask this server to open HTTP and WebSocket
//! connections to arbitrary remotes on its behalf, over the v1/v2/v3 Bare
//! wire encodings.

// Protocol core
pub mod bare;
pub mod metadata;
pub mod tunnel;

// Server plumbing
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use bare::{BareError, ErrorKind};
pub use config::schema::BareConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
