//! Outbound connections to remotes.
//!
//! # Data Flow
//! ```text
//! TunnelRequest ──→ http.rs ──→ SsrfGuard ──→ reqwest ──→ remote
//!                                                  │
//! client  ←── map_response (envelope / pass) ←─────┘
//!
//! RemoteTarget ──→ websocket.rs ──→ SsrfGuard ──→ tungstenite handshake
//!                                                  │
//! client WebSocket ←──────── pump ←────────────────┘
//! ```

pub mod http;
pub mod websocket;

pub use http::HttpTunnel;
pub use websocket::{close_with, pump, PumpEnd, RemoteHandshake, RemoteSocket, WsConnector};
