//! Snapshot and continuous-stream delivery.
//!
//! Each viewer gets its own [`StreamSession`] that pulls the newest frame
//! from the capture source on its own cadence. A slow viewer only slows
//! its own session: there is no shared queue and no publisher-side fan-out.
//!
//! Cadence is `max(1 / max_stream_fps, 1 / measured_fps)`. A session never
//! emits the same sequence twice, and while no frame is available it holds
//! the connection open, polling every [`IDLE_POLL`].
//!
//! Sessions end when the viewer disconnects (the body stream is dropped)
//! or when the daemon shuts down.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lumo_protocol::encode_part;

use crate::capture::{lock, CaptureSource, EncodedFrame};

/// Poll interval while the camera has no frame.
pub const IDLE_POLL: Duration = Duration::from_millis(250);

/// Identifier of one viewer's stream session.
pub type SessionId = u64;

/// Result of a one-shot snapshot request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Available(EncodedFrame),
    /// No frame has been captured since the camera started
    Unavailable,
}

/// Stream delivery settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub stream_quality: u8,
    pub max_fps: f64,
    pub idle_poll: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stream_quality: 75,
            max_fps: 15.0,
            idle_poll: IDLE_POLL,
        }
    }
}

/// Creates stream sessions and tracks the active ones.
#[derive(Clone)]
pub struct SessionManager {
    camera: CaptureSource,
    settings: StreamSettings,
    active: Arc<Mutex<HashSet<SessionId>>>,
    next_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(camera: CaptureSource, settings: StreamSettings, shutdown: CancellationToken) -> Self {
        Self {
            camera,
            settings,
            active: Arc::new(Mutex::new(HashSet::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            shutdown,
        }
    }

    /// Encodes the newest frame at snapshot quality.
    pub async fn snapshot(&self) -> Snapshot {
        let camera = self.camera.clone();
        match tokio::task::spawn_blocking(move || camera.latest_jpeg()).await {
            Ok(Some(frame)) => Snapshot::Available(frame),
            Ok(None) => Snapshot::Unavailable,
            Err(e) => {
                warn!(error = %e, "Snapshot encoding task failed");
                Snapshot::Unavailable
            }
        }
    }

    /// Opens a new stream session for one viewer.
    pub fn open_stream(&self) -> StreamSession {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = {
            let mut sessions = lock(&self.active);
            sessions.insert(id);
            sessions.len()
        };
        info!(session_id = id, active_sessions = active, "Stream session opened");

        StreamSession {
            id,
            camera: self.camera.clone(),
            settings: self.settings.clone(),
            last_sequence: None,
            next_due: None,
            frames_sent: 0,
            shutdown: self.shutdown.clone(),
            _guard: SessionGuard {
                id,
                active: Arc::clone(&self.active),
            },
        }
    }

    /// Number of open stream sessions.
    pub fn active_sessions(&self) -> usize {
        lock(&self.active).len()
    }
}

/// Removes the session from the active set when the session is dropped,
/// whichever way the viewer went away.
struct SessionGuard {
    id: SessionId,
    active: Arc<Mutex<HashSet<SessionId>>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let remaining = {
            let mut sessions = lock(&self.active);
            sessions.remove(&self.id);
            sessions.len()
        };
        info!(session_id = self.id, active_sessions = remaining, "Stream session closed");
    }
}

/// One viewer's delivery context.
pub struct StreamSession {
    id: SessionId,
    camera: CaptureSource,
    settings: StreamSettings,
    last_sequence: Option<u64>,
    next_due: Option<Instant>,
    frames_sent: u64,
    shutdown: CancellationToken,
    _guard: SessionGuard,
}

impl StreamSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Waits for the next new frame and returns it as a multipart chunk.
    pub async fn next_chunk(&mut self) -> Bytes {
        loop {
            if let Some(due) = self.next_due {
                sleep_until(due).await;
            }

            let camera = self.camera.clone();
            let quality = self.settings.stream_quality;
            let latest = match tokio::task::spawn_blocking(move || camera.encode_latest(quality)).await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(session_id = self.id, error = %e, "Stream encoding task failed");
                    None
                }
            };

            let now = Instant::now();
            match latest {
                Some(frame) if Some(frame.sequence) != self.last_sequence => {
                    self.next_due = Some(now + self.cadence());
                    self.last_sequence = Some(frame.sequence);
                    self.frames_sent += 1;
                    return encode_part(frame.sequence, &frame.jpeg);
                }
                Some(_) => {
                    self.next_due = Some(now + self.cadence());
                }
                None => {
                    self.next_due = Some(now + self.settings.idle_poll);
                }
            }
        }
    }

    /// Interval between pulls for this session.
    pub fn cadence(&self) -> Duration {
        cadence(self.settings.max_fps, self.camera.status().fps)
    }

    /// Converts the session into a body stream that ends on shutdown.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::unfold(self, |mut session| async move {
            let shutdown = session.shutdown.clone();
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(session_id = session.id, "Stream session ended by shutdown");
                    None
                }

                chunk = session.next_chunk() => Some((Ok(chunk), session)),
            }
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        debug!(session_id = self.id, frames_sent = self.frames_sent, "Stream session dropped");
    }
}

/// `max(1 / max_fps, 1 / measured_fps)`; falls back to the cap when the
/// measured rate is unknown.
pub fn cadence(max_fps: f64, measured_fps: f64) -> Duration {
    let floor = if max_fps > 0.0 { 1.0 / max_fps } else { 0.0 };
    let measured = if measured_fps > 0.0 { 1.0 / measured_fps } else { 0.0 };
    Duration::from_secs_f64(floor.max(measured))
}
