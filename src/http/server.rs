//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared application state (tunnels, metadata store, sessions)
//! - Create the Axum router: manifest plus one endpoint family per version
//! - Wire up middleware (request ID, tracing, CORS per version)
//! - Serve plain or TLS listeners with graceful shutdown
//! - Run the metadata sweeper for the server's lifetime

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::bare::policy::{V1_POLICY, V2_POLICY, V3_POLICY};
use crate::bare::{v1, v2, v3, BareError, Manifest};
use crate::config::BareConfig;
use crate::http::request::{make_request_span, propagate_request_id_layer, set_request_id_layer};
use crate::metadata::{MetaSweeper, MetadataStore};
use crate::net::connection::SessionTracker;
use crate::security::cors::{cors_middleware, preflight};
use crate::security::SsrfGuard;
use crate::tunnel::{HttpTunnel, WsConnector};

/// Time in-flight requests get to finish once shutdown starts (TLS listener).
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<BareConfig>,
    pub http: HttpTunnel,
    pub ws: WsConnector,
    pub store: Arc<MetadataStore>,
    pub sessions: SessionTracker,
    pub manifest: Arc<Manifest>,
}

impl AppState {
    pub fn new(config: BareConfig) -> Result<Self, BareError> {
        let guard = SsrfGuard::new(&config.security);
        Self::with_guard(config, guard)
    }

    /// State whose outbound connections go through `guard`.
    pub fn with_guard(config: BareConfig, guard: SsrfGuard) -> Result<Self, BareError> {
        let remote_timeout = Duration::from_secs(config.bare.remote_timeout_secs);
        Ok(Self {
            http: HttpTunnel::new(guard.clone(), remote_timeout)?,
            ws: WsConnector::new(guard, remote_timeout),
            store: Arc::new(MetadataStore::new(Duration::from_secs(config.bare.meta_ttl_secs))),
            sessions: SessionTracker::new(),
            manifest: Arc::new(Manifest::from_config(&config.manifest)),
            config: Arc::new(config),
        })
    }
}

/// HTTP server for the Bare endpoints.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: BareConfig) -> Result<Self, BareError> {
        Ok(Self::from_state(AppState::new(config)?))
    }

    pub fn from_state(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let prefix = state.config.bare.prefix.clone();

        let v1 = Router::new()
            .route(&format!("{prefix}v1/"), any(v1::endpoint))
            .route(&format!("{prefix}v1/ws-new-meta"), post(v1::new_meta).options(preflight))
            .route(&format!("{prefix}v1/ws-meta"), get(v1::ws_meta).options(preflight))
            .layer(from_fn_with_state(&V1_POLICY, cors_middleware));

        let v2 = Router::new()
            .route(&format!("{prefix}v2/"), any(v2::endpoint))
            .route(&format!("{prefix}v2/ws-new-meta"), post(v2::new_meta).options(preflight))
            .route(&format!("{prefix}v2/ws-meta"), get(v2::ws_meta).options(preflight))
            .layer(from_fn_with_state(&V2_POLICY, cors_middleware));

        let v3 = Router::new()
            .route(&format!("{prefix}v3/"), any(v3::endpoint))
            .layer(from_fn_with_state(&V3_POLICY, cors_middleware));

        Router::new()
            .route(&prefix, get(manifest))
            .merge(v1)
            .merge(v2)
            .merge(v3)
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
            .layer(set_request_id_layer())
    }

    /// The configured router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, prefix = %self.state.config.bare.prefix, "HTTP server starting");

        self.spawn_sweeper(shutdown.resubscribe());

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server behind TLS on `addr`.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, prefix = %self.state.config.bare.prefix, "HTTPS server starting");

        self.spawn_sweeper(shutdown.resubscribe());

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTPS server draining");
            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    fn spawn_sweeper(&self, shutdown: broadcast::Receiver<()>) {
        let sweeper = MetaSweeper::new(
            self.state.store.clone(),
            Duration::from_secs(self.state.config.bare.meta_sweep_interval_secs),
        );
        tokio::spawn(sweeper.run(shutdown));
    }
}

async fn manifest(State(state): State<AppState>) -> Response {
    Json(state.manifest.as_ref().clone()).into_response()
}
