//! Frame source abstraction.
//!
//! A source wraps one piece of acquisition hardware (or a stand-in). All
//! methods are blocking and run on the dedicated acquisition thread.

use std::sync::Arc;

use lumo_core::{CapturedImage, DomainError};

/// Errors raised by capture sources and the capture lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Frame acquisition failed: {0}")]
    Acquire(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] DomainError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JPEG encoding failed: {0}")]
    Encode(String),

    #[error("Failed to spawn acquisition thread: {0}")]
    Spawn(String),
}

/// Forcibly releases a source's resources from another thread.
///
/// Invoked by `stop()` when the acquisition thread does not exit within
/// the stop timeout.
pub type TeardownHook = Box<dyn Fn() + Send + Sync>;

/// Builds a fresh source for each `start()`.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

/// Blocking frame acquisition.
pub trait FrameSource: Send + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Acquires the underlying resources. Called before the first frame and
    /// again after repeated failures.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Blocks until the next frame is available.
    fn acquire_next_frame(&mut self) -> Result<CapturedImage, CaptureError>;

    /// Releases the underlying resources. Must be safe to call when not open.
    fn close(&mut self);

    /// Hook that can abort a blocked `acquire_next_frame` from outside.
    fn teardown_hook(&self) -> Option<TeardownHook> {
        None
    }
}
