//! Lumo Core - Shared types for camera and arm monitoring
//!
//! This crate provides the domain types shared between the daemon
//! (lumod) and the wire protocol (lumo-protocol).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod connectivity;
pub mod error;
pub mod frame;
pub mod joint;
pub mod telemetry;

// Re-exports for convenience
pub use connectivity::{ConnectivityState, Debouncer, Device, Transition};
pub use error::{DomainError, DomainResult};
pub use frame::{is_jpeg, CameraMode, CapturedImage, Frame, PixelFormat, JPEG_SOI};
pub use joint::{JointLimit, JointLimits, JointMap, JOINT_NAMES, SERVO_MAX_TICKS};
pub use telemetry::{ArmState, CameraState, SystemMetrics, TelemetrySnapshot};
