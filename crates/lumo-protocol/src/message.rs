//! JSON message types for the HTTP and WebSocket surfaces.

use lumo_core::{CameraMode, CameraState, JointLimits, JointMap, TelemetrySnapshot};
use serde::{Deserialize, Serialize};

/// Error text returned for every mutating arm command while the arm is offline.
pub const NOT_CONNECTED: &str = "Arm not connected";

/// Speed used when a move request does not specify one.
pub const DEFAULT_MOVE_SPEED: u8 = 50;

/// Errors produced while encoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Failed to serialize {what}: {reason}")]
    Serialize { what: &'static str, reason: String },
}

/// Serializes a telemetry snapshot into the text frame sent to listeners.
pub fn encode_telemetry(snapshot: &TelemetrySnapshot) -> Result<String, ProtocolError> {
    serde_json::to_string(snapshot).map_err(|e| ProtocolError::Serialize {
        what: "telemetry snapshot",
        reason: e.to_string(),
    })
}

// ============================================================================
// Commands
// ============================================================================

/// Body of a move command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Target positions keyed by joint name
    #[serde(default)]
    pub joints: JointMap,

    /// Speed as a percentage of the servo maximum. Any integer is
    /// accepted; see [`MoveRequest::normalized_speed`].
    #[serde(default = "default_speed")]
    pub speed: i64,
}

fn default_speed() -> i64 {
    i64::from(DEFAULT_MOVE_SPEED)
}

impl MoveRequest {
    pub fn new(joints: JointMap, speed: i64) -> Self {
        Self { joints, speed }
    }

    /// Speed clamped to `1..=100`.
    pub fn normalized_speed(&self) -> u8 {
        u8::try_from(self.speed.clamp(1, 100)).unwrap_or(DEFAULT_MOVE_SPEED)
    }
}

/// Result of a hardware-mutating command: `{ok, error?, message?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandOutcome {
    /// Creates a successful outcome.
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            message: None,
        }
    }

    /// Creates a successful outcome carrying an informational message.
    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            error: None,
            message: Some(message.into()),
        }
    }

    /// Creates a failed outcome.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            message: None,
        }
    }

    /// Creates the outcome returned while the arm is offline.
    pub fn not_connected() -> Self {
        Self::failed(NOT_CONNECTED)
    }
}

/// Calibrated joint limits of the follower arm, keyed by joint name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmCalibration {
    pub follower: JointLimits,
}

// ============================================================================
// Camera
// ============================================================================

/// Body of a camera mode change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

/// Current camera mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeResponse {
    pub mode: CameraMode,
}

/// Camera status as served over HTTP: the telemetry camera block plus the
/// active rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    #[serde(flatten)]
    pub state: CameraState,
    pub mode: CameraMode,
}

/// Camera lifecycle acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraRunning {
    pub running: bool,
}

// ============================================================================
// Misc
// ============================================================================

/// Liveness response for the service itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    pub service: String,
}

impl ServiceHealth {
    pub fn ok(service: &str) -> Self {
        Self {
            status: "ok".to_string(),
            service: service.to_string(),
        }
    }
}

/// Error body for rejected requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lumo_core::{ArmState, CameraState, SystemMetrics};

    #[test]
    fn test_outcome_ok_serialization() {
        let json = serde_json::to_string(&CommandOutcome::ok()).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
    }

    #[test]
    fn test_outcome_not_connected_serialization() {
        let json = serde_json::to_string(&CommandOutcome::not_connected()).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"Arm not connected"}"#);
    }

    #[test]
    fn test_move_request_defaults() {
        let req: MoveRequest = serde_json::from_str("{}").unwrap();
        assert!(req.joints.is_empty());
        assert_eq!(req.normalized_speed(), DEFAULT_MOVE_SPEED);
    }

    #[test]
    fn test_move_request_speed_clamped() {
        let req: MoveRequest =
            serde_json::from_str(r#"{"joints":{"gripper":10.0},"speed":250}"#).unwrap();
        assert_eq!(req.normalized_speed(), 100);
        assert_eq!(MoveRequest::new(JointMap::new(), 0).normalized_speed(), 1);
    }

    #[test]
    fn test_move_request_speed_out_of_byte_range() {
        let fast: MoveRequest = serde_json::from_str(r#"{"joints":{},"speed":300}"#).unwrap();
        assert_eq!(fast.normalized_speed(), 100);

        let negative: MoveRequest = serde_json::from_str(r#"{"joints":{},"speed":-5}"#).unwrap();
        assert_eq!(negative.normalized_speed(), 1);

        let huge = MoveRequest::new(JointMap::new(), i64::MAX);
        assert_eq!(huge.normalized_speed(), 100);
    }

    #[test]
    fn test_encode_telemetry() {
        let snap = TelemetrySnapshot::new(
            Utc::now(),
            ArmState::disconnected(),
            CameraState::disconnected(),
            SystemMetrics::default(),
        );
        let text = encode_telemetry(&snap).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["arm"]["connected"], false);
        assert_eq!(value["camera"]["connected"], false);
    }

    #[test]
    fn test_calibration_serialization() {
        let json = serde_json::to_value(ArmCalibration {
            follower: JointLimits::factory(),
        })
        .unwrap();
        assert_eq!(json["follower"]["gripper"]["min"], 0.0);
        assert_eq!(json["follower"]["gripper"]["max"], 100.0);
        assert_eq!(json["follower"].as_object().unwrap().len(), 6);
    }

    #[test]
    fn test_camera_status_is_flat() {
        let status = CameraStatus {
            state: CameraState {
                connected: true,
                fps: 9.5,
                width: 640,
                height: 480,
            },
            mode: CameraMode::Ir,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["connected"], true);
        assert_eq!(json["width"], 640);
        assert_eq!(json["mode"], "ir");
    }

    #[test]
    fn test_mode_response_serialization() {
        let json = serde_json::to_string(&ModeResponse {
            mode: CameraMode::Ir,
        })
        .unwrap();
        assert_eq!(json, r#"{"mode":"ir"}"#);
    }
}
