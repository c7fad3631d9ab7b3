//! HTTP and WebSocket surface of the daemon.
//!
//! # Routes
//!
//! ```text
//! GET  /health                 service liveness
//! GET  /api/camera/status      {connected, fps, width, height, mode}
//! GET  /api/camera/snapshot    image/jpeg, 204 if no frame yet
//! GET  /api/camera/stream      multipart/x-mixed-replace MJPEG
//! GET  /api/camera/mode        {mode}
//! POST /api/camera/mode        {mode: "rgb" | "ir"}
//! POST /api/camera/start       {running}
//! POST /api/camera/stop        {running}
//! GET  /api/arm/status         {connected, joints}
//! GET  /api/arm/calibration    {follower: {<joint>: {min, max}}}
//! POST /api/arm/move           {joints, speed?} -> {ok, error?}
//! POST /api/arm/home           {ok, error?}
//! POST /api/arm/stop           {ok}
//! GET  /ws/telemetry           telemetry snapshots, one text frame per tick
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Handler failures map to HTTP status codes, never to a crashed task

mod routes;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lumo_core::ArmState;

use crate::capture::CaptureSource;
use crate::command::CommandGate;
use crate::stream::SessionManager;
use crate::telemetry::ListenerRegistry;

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "lumo-dashboard";

/// Shared handler state.
pub struct AppState {
    pub camera: CaptureSource,
    pub sessions: SessionManager,
    pub gate: CommandGate,
    pub arm_state: watch::Receiver<ArmState>,
    pub listeners: ListenerRegistry,
    pub write_timeout: Duration,
}

/// Builds the router for all routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/camera/status", get(routes::camera_status))
        .route("/api/camera/snapshot", get(routes::camera_snapshot))
        .route("/api/camera/stream", get(routes::camera_stream))
        .route(
            "/api/camera/mode",
            get(routes::get_camera_mode).post(routes::set_camera_mode),
        )
        .route("/api/camera/start", post(routes::camera_start))
        .route("/api/camera/stop", post(routes::camera_stop))
        .route("/api/arm/status", get(routes::arm_status))
        .route("/api/arm/calibration", get(routes::arm_calibration))
        .route("/api/arm/move", post(routes::arm_move))
        .route("/api/arm/home", post(routes::arm_home))
        .route("/api/arm/stop", post(routes::arm_stop))
        .route("/ws/telemetry", get(ws::telemetry_endpoint))
        .with_state(state)
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Server error: {0}")]
    Serve(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// HTTP server bound to a listen address.
pub struct DashboardServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    cancel_token: CancellationToken,
}

impl DashboardServer {
    /// Binds the listen socket.
    pub async fn bind(
        addr: SocketAddr,
        state: Arc<AppState>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })?;

        Ok(Self {
            listener,
            local_addr,
            router: router(state),
            cancel_token,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until the cancellation token is triggered.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Dashboard server listening");

        let cancel_token = self.cancel_token.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("Server shutdown requested");
            })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("Server shutdown complete");
        Ok(())
    }
}
