//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the Bare server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BareConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Protocol endpoint settings.
    pub bare: BareSettings,

    /// Outbound connection policy.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Information served by the manifest endpoint.
    pub manifest: ManifestConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Protocol endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BareSettings {
    /// Path under which the manifest and `v1/`, `v2/`, `v3/` are mounted.
    pub prefix: String,

    /// Lifetime of an unconsumed WebSocket metadata record.
    pub meta_ttl_secs: u64,

    /// How often expired metadata records are purged.
    pub meta_sweep_interval_secs: u64,

    /// Deadline for the remote to answer an HTTP tunnel request.
    pub remote_timeout_secs: u64,

    /// How long a v3 WebSocket may stay silent before its connect packet.
    pub connect_packet_timeout_secs: u64,
}

impl Default for BareSettings {
    fn default() -> Self {
        Self {
            prefix: "/ca/".to_string(),
            meta_ttl_secs: 30,
            meta_sweep_interval_secs: 5,
            remote_timeout_secs: 60,
            connect_packet_timeout_secs: 10,
        }
    }
}

/// Outbound connection policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Reject remotes resolving to private, loopback and other local ranges.
    pub block_local: bool,

    /// DNS resolution deadline in seconds.
    pub dns_timeout_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            block_local: true,
            dns_timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Manifest contents.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub maintainer: Option<MaintainerInfo>,
    pub project: ProjectInfo,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MaintainerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectInfo {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub version: String,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            description: "Bare protocol tunnel server".to_string(),
            email: None,
            website: None,
            repository: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
