//! Lumo Protocol - Wire formats for the dashboard's network surfaces
//!
//! This crate provides the serialized shapes exchanged with viewers:
//! - `message` - telemetry frames, command requests and outcomes
//! - `mjpeg` - multipart framing for the continuous camera stream

pub mod message;
pub mod mjpeg;

pub use message::{
    encode_telemetry, ArmCalibration, CameraRunning, CameraStatus, CommandOutcome, ErrorBody,
    ModeRequest, ModeResponse, MoveRequest, ProtocolError, ServiceHealth, DEFAULT_MOVE_SPEED,
    NOT_CONNECTED,
};
pub use mjpeg::{content_type, decode_part, encode_part, MjpegPart, BOUNDARY};
