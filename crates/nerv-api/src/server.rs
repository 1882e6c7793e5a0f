//! Server assembly and lifecycle.
//!
//! Builds the axum router from a [`NervConfig`], binds the listener and runs
//! the server on a background task until [`ServerHandle::shutdown`] is called.

use crate::routes;
use crate::ws::{self, IpAllowList};
use axum::extract::{ConnectInfo, Request};
use axum::routing::get;
use axum::Router;
use nerv_types::config::NervConfig;
use nerv_types::error::NervResult;
use nerv_wire::{ComputerRegistry, HandshakeGate, KeepAliveMonitor, MessageRouter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

/// Message sent to every computer when the server stops.
pub const SHUTDOWN_MESSAGE: &str = "Server shutting down";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Shared state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: MessageRouter,
    pub keepalive: KeepAliveMonitor,
    pub allow_list: Arc<IpAllowList>,
    /// Timeout for jobs issued by the HTTP API.
    pub job_timeout: Duration,
    pub static_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn from_config(config: &NervConfig) -> Self {
        let registry = ComputerRegistry::new();
        let gate = HandshakeGate::new(config.ws.known_labels.iter().cloned(), registry);
        Self {
            router: MessageRouter::new(gate),
            keepalive: KeepAliveMonitor::new(Duration::from_secs(
                config.ws.keepalive_interval_secs,
            )),
            allow_list: Arc::new(IpAllowList::new(&config.ws.allowed_ips)),
            job_timeout: Duration::from_millis(config.jobs.default_timeout_ms),
            static_dir: Arc::new(PathBuf::from(&config.server.static_dir)),
        }
    }

    pub fn registry(&self) -> &ComputerRegistry {
        self.router.registry()
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState, config: &NervConfig) -> Router {
    let trace = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            let ip = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
                .unwrap_or_default();
            tracing::info_span!(
                "http",
                method = %request.method(),
                path = %request.uri().path(),
                ip = %ip
            )
        })
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/computers", get(routes::computers))
        .route("/api/me/status", get(routes::me_status))
        .route("/api/me/list", get(routes::me_list))
        .route("/api/me/listItems", get(routes::me_list_items))
        .route("/api/me/listFluid", get(routes::me_list_fluid))
        .route("/api/me/listGas", get(routes::me_list_gas))
        .route("/api/battery/status", get(routes::battery_status))
        .route("/list", get(routes::legacy_list))
        .nest_service("/lua", ServeDir::new(&config.server.lua_dir))
        .fallback(routes::static_files)
        .layer(trace)
        .with_state(state)
}

/// Handle to the running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: ComputerRegistry,
    shutdown_tx: watch::Sender<bool>,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &ComputerRegistry {
        &self.registry
    }

    /// Disconnect every computer, stop accepting requests and wait for the
    /// server task to finish.
    pub async fn shutdown(self) {
        let disconnected = self.registry.disconnect_all(SHUTDOWN_MESSAGE);
        info!(disconnected, "Shutting down server");

        // Give sessions a moment to flush the notice and unregister.
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while !self.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(remaining = ?self.registry.labels(), "Computers still connected at shutdown");
        }

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.server.await {
            error!("Server task failed: {e}");
        }
        info!("Server stopped");
    }
}

/// Bind `config.server.listen_addr` and start serving in the background.
pub async fn start(config: &NervConfig) -> NervResult<ServerHandle> {
    config.validate()?;
    start_with_state(config, AppState::from_config(config)).await
}

/// Like [`start`], but serving a prepared [`AppState`].
pub async fn start_with_state(
    config: &NervConfig,
    state: AppState,
) -> NervResult<ServerHandle> {
    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    let local_addr = listener.local_addr()?;

    let registry = state.registry().clone();

    info!(
        allowed_ips = ?state.allow_list.entries(),
        "Accepting connections from listed IPs"
    );
    info!(known_labels = ?config.ws.known_labels, "Accepting listed computers");

    let app = build_router(state, config);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let server = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        });
        if let Err(e) = serve.await {
            error!("Server error: {e}");
        }
    });

    info!(listen_addr = %local_addr, "Listening");

    Ok(ServerHandle {
        local_addr,
        registry,
        shutdown_tx,
        server,
    })
}
