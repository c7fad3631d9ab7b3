//! Camera capture lifecycle.
//!
//! [`CaptureSource`] owns a dedicated acquisition thread that pulls frames
//! from a [`FrameSource`] as fast as the hardware delivers them and
//! publishes each one into a single-slot [`FrameBuffer`]. Readers never
//! wait on acquisition: they take whatever frame is newest.
//!
//! # Lifecycle
//!
//! ```text
//!            start()                      stop()
//! Stopped ────────────▶ Running ─────────────────────▶ Stopped
//!                         │  ▲                          (buffer cleared,
//!        N failures /     │  │ next frame                connectivity false)
//!        stale frame      ▼  │
//!                      Disconnected (loop keeps retrying with backoff)
//! ```
//!
//! `start()` and `stop()` are idempotent. `stop()` blocks for at most the
//! configured stop timeout; a loop that does not exit in time is torn down
//! through the source's teardown hook and abandoned.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A panic inside a source is caught on the acquisition thread, logged,
//!   and the source is reopened from a clean state
//! - Poisoned locks are recovered rather than propagated

mod buffer;
mod encode;
mod pattern;
mod pipe;
mod rate;
mod source;

pub use buffer::FrameBuffer;
pub use encode::{encode_frame, equalize, EncodedFrame, JpegCache};
pub use pattern::TestPatternSource;
pub use pipe::PipeSource;
pub use rate::{FpsMeter, FPS_WINDOW};
pub use source::{CaptureError, FrameSource, SourceFactory, TeardownHook};

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lumo_core::{CameraMode, CameraState, ConnectivityState, Debouncer, Device, Frame, Transition};

use crate::config::{CameraConfig, SourceKind};

/// First retry delay after a failed acquisition.
const MIN_BACKOFF: Duration = Duration::from_millis(100);

/// Retry delay ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tunables for a [`CaptureSource`].
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub failure_threshold: u32,
    pub stale_after: Duration,
    pub stop_timeout: Duration,
    pub snapshot_quality: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from(&CameraConfig::default())
    }
}

impl From<&CameraConfig> for CaptureSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            stale_after: config.stale_after(),
            stop_timeout: config.stop_timeout(),
            snapshot_quality: config.snapshot_quality,
        }
    }
}

/// Builds the source factory selected by configuration.
pub fn source_factory(config: &CameraConfig) -> SourceFactory {
    let config = config.clone();
    match config.source {
        SourceKind::TestPattern => Arc::new(move || {
            Box::new(TestPatternSource::new(
                config.width,
                config.height,
                config.nominal_fps,
            )) as Box<dyn FrameSource>
        }),
        SourceKind::Pipe => Arc::new(move || {
            Box::new(PipeSource::new(
                config.command.clone(),
                config.args.clone(),
                config.width,
                config.height,
            )) as Box<dyn FrameSource>
        }),
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// Camera connectivity tagged with the generation that wrote it.
#[derive(Debug, Clone)]
struct LinkSlot {
    generation: u64,
    state: ConnectivityState,
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
    teardown: Arc<Mutex<Option<TeardownHook>>>,
}

struct Shared {
    settings: CaptureSettings,
    factory: SourceFactory,
    buffer: FrameBuffer,
    link: watch::Sender<LinkSlot>,
    meter: Mutex<FpsMeter>,
    mode: RwLock<CameraMode>,
    cache: JpegCache,
    worker: Mutex<Option<Worker>>,
}

impl Shared {
    /// Publishes camera connectivity if `generation` is still current.
    fn set_link(&self, generation: u64, state: ConnectivityState) {
        self.link.send_if_modified(|slot| {
            if slot.generation != generation {
                return false;
            }
            slot.state = state;
            true
        });
    }
}

// ============================================================================
// CaptureSource
// ============================================================================

/// Clonable handle to the camera capture pipeline.
#[derive(Clone)]
pub struct CaptureSource {
    shared: Arc<Shared>,
}

impl CaptureSource {
    pub fn new(factory: SourceFactory, settings: CaptureSettings) -> Self {
        let (link, _rx) = watch::channel(LinkSlot {
            generation: 0,
            state: ConnectivityState::disconnected(Utc::now()),
        });
        Self {
            shared: Arc::new(Shared {
                settings,
                factory,
                buffer: FrameBuffer::new(),
                link,
                meter: Mutex::new(FpsMeter::new()),
                mode: RwLock::new(CameraMode::default()),
                cache: JpegCache::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Creates a capture source from the camera configuration section.
    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(source_factory(config), CaptureSettings::from(config))
    }

    /// Starts the acquisition loop. No-op if already running.
    ///
    /// Connectivity stays false until the first frame lands.
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut worker = lock(&self.shared.worker);

        if let Some(existing) = worker.as_ref() {
            if !existing.thread.is_finished() {
                debug!("Capture already running");
                return Ok(());
            }
            // reap a loop that exited on its own
            if let Some(old) = worker.take() {
                let _ = old.thread.join();
            }
        }

        let generation = self.shared.buffer.generation();
        let source = (self.shared.factory)();
        let name = source.name().to_string();

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let teardown = Arc::new(Mutex::new(None));

        let shared = Arc::clone(&self.shared);
        let loop_teardown = Arc::clone(&teardown);
        let thread = thread::Builder::new()
            .name("lumo-capture".to_string())
            .spawn(move || {
                acquisition_loop(shared, source, generation, stop_rx, loop_teardown);
                let _ = done_tx.send(());
            })
            .map_err(|e| CaptureError::Spawn(e.to_string()))?;

        *worker = Some(Worker {
            stop_tx,
            done_rx,
            thread,
            teardown,
        });

        info!(source = %name, generation, "Capture started");
        Ok(())
    }

    /// Stops the acquisition loop and clears the frame buffer. No-op if
    /// not running.
    ///
    /// Blocks for at most the configured stop timeout. Call from a
    /// blocking context.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.shared.worker).take() else {
            debug!("Capture already stopped");
            return;
        };

        let _ = worker.stop_tx.send(());
        match worker.done_rx.recv_timeout(self.shared.settings.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.thread.join().is_err() {
                    error!("Acquisition thread panicked during shutdown");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.shared.settings.stop_timeout.as_millis() as u64,
                    "Acquisition loop did not stop in time, forcing teardown"
                );
                if let Some(hook) = lock(&worker.teardown).take() {
                    hook();
                }
                // thread is abandoned; its generation is retired below
            }
        }

        let generation = self.shared.buffer.reset();
        self.shared.link.send_modify(|slot| {
            slot.generation = generation;
            slot.state = ConnectivityState::disconnected(Utc::now());
        });
        lock(&self.shared.meter).clear();
        self.shared.cache.clear();

        info!(generation, "Capture stopped");
    }

    /// Whether an acquisition loop is currently running.
    pub fn is_running(&self) -> bool {
        lock(&self.shared.worker)
            .as_ref()
            .is_some_and(|w| !w.thread.is_finished())
    }

    /// Newest frame, or `None` if no frame has arrived since start.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.shared.buffer.latest()
    }

    /// Newest frame encoded at snapshot quality.
    pub fn latest_jpeg(&self) -> Option<EncodedFrame> {
        self.encode_latest(self.shared.settings.snapshot_quality)
    }

    /// Newest frame encoded at `quality` in the current mode.
    ///
    /// Encoding failures are logged and reported as `None`.
    pub fn encode_latest(&self, quality: u8) -> Option<EncodedFrame> {
        let frame = self.latest_frame()?;
        let mode = self.mode();
        let sequence = frame.sequence();

        let jpeg = match self.shared.cache.get(sequence, mode, quality) {
            Some(jpeg) => jpeg,
            None => match encode_frame(&frame, mode, quality) {
                Ok(jpeg) => {
                    self.shared.cache.insert(sequence, mode, quality, jpeg.clone());
                    jpeg
                }
                Err(e) => {
                    warn!(sequence, error = %e, "Failed to encode frame");
                    return None;
                }
            },
        };

        Some(EncodedFrame {
            sequence,
            width: frame.width(),
            height: frame.height(),
            jpeg,
        })
    }

    /// Current camera status. All zero if never started.
    pub fn status(&self) -> CameraState {
        let linked = self.shared.link.borrow().state.connected;
        let latest = self.latest_frame();

        let fresh = latest.as_ref().is_some_and(|frame| {
            let age = Utc::now().signed_duration_since(frame.captured_at());
            age.to_std().map_or(true, |age| age <= self.shared.settings.stale_after)
        });
        let connected = linked && fresh;

        let fps = if connected {
            lock(&self.shared.meter).fps(Instant::now())
        } else {
            0.0
        };
        let (width, height) = latest
            .map(|frame| (frame.width(), frame.height()))
            .unwrap_or((0, 0));

        CameraState {
            connected,
            fps,
            width,
            height,
        }
    }

    /// Debounced camera connectivity, ignoring frame staleness.
    pub fn connectivity(&self) -> ConnectivityState {
        self.shared.link.borrow().state
    }

    pub fn mode(&self) -> CameraMode {
        *self
            .shared
            .mode
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: CameraMode) {
        let mut current = self
            .shared
            .mode
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != mode {
            info!(from = %*current, to = %mode, "Camera mode changed");
            *current = mode;
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.shared.settings
    }
}

// ============================================================================
// Acquisition loop
// ============================================================================

/// Doubling retry delay.
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: MIN_BACKOFF,
        }
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = MIN_BACKOFF;
    }
}

fn stop_requested(stop_rx: &mpsc::Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
}

/// Sleeps for `delay` unless a stop arrives first. Returns true on stop.
fn wait_or_stop(stop_rx: &mpsc::Receiver<()>, delay: Duration) -> bool {
    !matches!(stop_rx.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
}

fn acquisition_loop(
    shared: Arc<Shared>,
    mut source: Box<dyn FrameSource>,
    generation: u64,
    stop_rx: mpsc::Receiver<()>,
    teardown: Arc<Mutex<Option<TeardownHook>>>,
) {
    let threshold = shared.settings.failure_threshold;
    let mut debouncer = Debouncer::new(threshold, Utc::now());
    let mut backoff = Backoff::new();
    let mut open = false;

    debug!(source = source.name(), generation, "Acquisition loop started");

    loop {
        if stop_requested(&stop_rx) {
            break;
        }

        if !open {
            match source.open() {
                Ok(()) => {
                    open = true;
                    *lock(&teardown) = source.teardown_hook();
                    debug!(source = source.name(), "Frame source opened");
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Failed to open frame source");
                    report(&shared, generation, debouncer.record_failure(Utc::now()), &debouncer);
                    if wait_or_stop(&stop_rx, backoff.next()) {
                        break;
                    }
                    continue;
                }
            }
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| source.acquire_next_frame()));
        let now = Utc::now();

        match result {
            Ok(Ok(image)) => {
                if stop_requested(&stop_rx) {
                    break;
                }
                let Some(sequence) = shared.buffer.publish(generation, image, now) else {
                    debug!(generation, "Capture generation retired, exiting loop");
                    break;
                };
                lock(&shared.meter).record(Instant::now());
                report(&shared, generation, debouncer.record_success(now), &debouncer);
                backoff.reset();

                if sequence == 1 || sequence % 1000 == 0 {
                    debug!(sequence, "Frame published");
                }
            }
            Ok(Err(e)) => {
                debug!(
                    error = %e,
                    consecutive_failures = debouncer.consecutive_failures() + 1,
                    "Frame acquisition failed"
                );
                report(&shared, generation, debouncer.record_failure(now), &debouncer);

                if debouncer.consecutive_failures() >= threshold {
                    source.close();
                    open = false;
                }
                if wait_or_stop(&stop_rx, backoff.next()) {
                    break;
                }
            }
            Err(_) => {
                error!(source = source.name(), "Frame source panicked, reopening");
                report(&shared, generation, debouncer.record_failure(now), &debouncer);
                source.close();
                open = false;
                if wait_or_stop(&stop_rx, backoff.next()) {
                    break;
                }
            }
        }
    }

    source.close();
    lock(&teardown).take();
    debug!(generation, "Acquisition loop exited");
}

fn report(shared: &Shared, generation: u64, transition: Option<Transition>, debouncer: &Debouncer) {
    let Some(transition) = transition else {
        return;
    };
    shared.set_link(generation, debouncer.state());
    match transition {
        Transition::Connected => info!(device = %Device::Camera, "Device connected"),
        Transition::Disconnected => warn!(
            device = %Device::Camera,
            consecutive_failures = debouncer.consecutive_failures(),
            "Device disconnected"
        ),
    }
}
