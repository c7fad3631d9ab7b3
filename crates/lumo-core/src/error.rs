//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Pixel buffer length does not match the declared geometry
    #[error("Invalid frame: expected {expected} bytes for {width}x{height}, got {actual}")]
    FrameSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// Frame with no pixels
    #[error("Invalid frame: empty payload")]
    EmptyFrame,

    /// Joint name outside the arm's joint set
    #[error("Unknown joint: {name}")]
    UnknownJoint { name: String },

    /// Joint target that is not a finite number
    #[error("Invalid target for {name}: {value}")]
    InvalidJointTarget { name: String, value: f64 },

    /// Camera mode outside the supported set
    #[error("Invalid camera mode: {mode} (expected 'rgb' or 'ir')")]
    InvalidMode { mode: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
