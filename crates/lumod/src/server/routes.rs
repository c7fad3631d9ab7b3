use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use lumo_core::CameraMode;
use lumo_protocol::{
    content_type, ArmCalibration, CameraRunning, CameraStatus, CommandOutcome, ErrorBody,
    ModeRequest, ModeResponse, MoveRequest, ServiceHealth,
};

use super::{AppState, SERVICE_NAME};
use crate::stream::Snapshot;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

pub(super) async fn health() -> Json<ServiceHealth> {
    Json(ServiceHealth::ok(SERVICE_NAME))
}

// ============================================================================
// Camera
// ============================================================================

pub(super) async fn camera_status(State(state): State<Arc<AppState>>) -> Response {
    Json(CameraStatus {
        state: state.camera.status(),
        mode: state.camera.mode(),
    })
    .into_response()
}

pub(super) async fn camera_snapshot(State(state): State<Arc<AppState>>) -> Response {
    match state.sessions.snapshot().await {
        Snapshot::Available(frame) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, NO_CACHE),
            ],
            frame.jpeg,
        )
            .into_response(),
        Snapshot::Unavailable => StatusCode::NO_CONTENT.into_response(),
    }
}

pub(super) async fn camera_stream(State(state): State<Arc<AppState>>) -> Response {
    let session = state.sessions.open_stream();
    let body = Body::from_stream(session.into_stream());
    (
        [
            (header::CONTENT_TYPE, content_type()),
            (header::CACHE_CONTROL, NO_CACHE.to_string()),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "0".to_string()),
            (HeaderName::from_static("x-accel-buffering"), "no".to_string()),
        ],
        body,
    )
        .into_response()
}

pub(super) async fn get_camera_mode(State(state): State<Arc<AppState>>) -> Json<ModeResponse> {
    Json(ModeResponse {
        mode: state.camera.mode(),
    })
}

pub(super) async fn set_camera_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModeRequest>,
) -> Response {
    match CameraMode::from_str(&request.mode) {
        Ok(mode) => {
            state.camera.set_mode(mode);
            Json(ModeResponse { mode }).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(ErrorBody::new(e.to_string()))).into_response(),
    }
}

pub(super) async fn camera_start(State(state): State<Arc<AppState>>) -> Response {
    let camera = state.camera.clone();
    match tokio::task::spawn_blocking(move || camera.start()).await {
        Ok(Ok(())) => Json(CameraRunning {
            running: state.camera.is_running(),
        })
        .into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "Failed to start camera");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(e.to_string())),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Camera start task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(super) async fn camera_stop(State(state): State<Arc<AppState>>) -> Response {
    let camera = state.camera.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || camera.stop()).await {
        warn!(error = %e, "Camera stop task failed");
    }
    Json(CameraRunning {
        running: state.camera.is_running(),
    })
    .into_response()
}

// ============================================================================
// Arm
// ============================================================================

pub(super) async fn arm_status(State(state): State<Arc<AppState>>) -> Response {
    let arm = state.arm_state.borrow().clone();
    Json(arm).into_response()
}

pub(super) async fn arm_calibration(
    State(state): State<Arc<AppState>>,
) -> Json<ArmCalibration> {
    Json(ArmCalibration {
        follower: state.gate.limits().clone(),
    })
}

pub(super) async fn arm_move(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MoveRequest>,
) -> Json<CommandOutcome> {
    Json(state.gate.dispatch_move(request).await)
}

pub(super) async fn arm_home(State(state): State<Arc<AppState>>) -> Json<CommandOutcome> {
    Json(state.gate.dispatch_home().await)
}

pub(super) async fn arm_stop(State(state): State<Arc<AppState>>) -> Json<CommandOutcome> {
    Json(state.gate.dispatch_stop().await)
}
