//! HTTP front end.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (router, request ID, trace span, CORS per version)
//!     → bare::{v1,v2,v3} handlers
//!     → tunnel executors
//!     → response.rs (Bare envelope headers)
//!     → client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
