//! Health sampling for the arm, camera and host.
//!
//! [`HealthSampler::sample`] runs the arm and system probes concurrently,
//! each bounded by its own timeout, and reads camera status directly from
//! the capture source. A probe that times out or fails contributes its
//! last-known (system) or debounced (arm) value, so a sample is always
//! produced on time.
//!
//! Blocking probes run on the blocking pool. A probe still running from a
//! previous tick is not started again; the tick uses the fallback instead.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A panicking probe is reported as a failed observation

mod arm;
mod system;

pub use arm::ArmProbe;
pub use system::{HostMetrics, SystemProbe, SystemSampler};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use lumo_core::{ArmState, CameraState, SystemMetrics, TelemetrySnapshot};

use crate::capture::CaptureSource;

/// Errors from a single probe observation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("Previous probe still running")]
    Busy,

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Probe panicked")]
    Panicked,

    #[error("Probe failed: {0}")]
    Failed(String),
}

/// One observation of every monitored subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSample {
    pub arm: ArmState,
    pub camera: CameraState,
    pub system: SystemMetrics,
}

impl HealthSample {
    pub fn into_snapshot(self, ts: DateTime<Utc>) -> TelemetrySnapshot {
        TelemetrySnapshot::new(ts, self.arm, self.camera, self.system)
    }
}

/// Samples all subsystems for the telemetry broadcaster.
pub struct HealthSampler {
    arm: ArmProbe,
    camera: CaptureSource,
    system: SystemSampler,
}

impl HealthSampler {
    pub fn new(arm: ArmProbe, camera: CaptureSource, system: SystemSampler) -> Self {
        Self {
            arm,
            camera,
            system,
        }
    }

    /// Takes one sample. Completes within the larger of the probe timeouts.
    pub async fn sample(&mut self) -> HealthSample {
        let (arm, system) = tokio::join!(self.arm.probe(), self.system.probe());
        HealthSample {
            arm,
            camera: self.camera.status(),
            system,
        }
    }

    pub fn arm(&self) -> &ArmProbe {
        &self.arm
    }
}

/// Clears the in-flight flag when the blocking closure finishes, even by
/// unwinding.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs a blocking probe on the blocking pool, bounded by `timeout`.
///
/// At most one call per `in_flight` flag runs at a time; a timed-out call
/// keeps the flag set until it actually finishes.
pub(crate) async fn run_bounded<T, F>(
    in_flight: &Arc<AtomicBool>,
    timeout: Duration,
    probe: F,
) -> Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if in_flight.swap(true, Ordering::AcqRel) {
        return Err(ProbeError::Busy);
    }
    let guard = InFlightGuard(Arc::clone(in_flight));
    let task = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        probe()
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(ProbeError::Panicked),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_bounded_returns_value() {
        let flag = Arc::new(AtomicBool::new(false));
        let value = run_bounded(&flag, Duration::from_secs(1), || 42).await;
        assert_eq!(value, Ok(42));
        assert!(!flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_run_bounded_times_out_and_stays_busy() {
        let flag = Arc::new(AtomicBool::new(false));
        let slow = run_bounded(&flag, Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
        })
        .await;
        assert_eq!(slow, Err(ProbeError::Timeout(Duration::from_millis(20))));

        let again = run_bounded(&flag, Duration::from_millis(20), || ()).await;
        assert_eq!(again, Err(ProbeError::Busy));

        tokio::time::sleep(Duration::from_millis(400)).await;
        let after = run_bounded(&flag, Duration::from_secs(1), || ()).await;
        assert_eq!(after, Ok(()));
    }

    #[tokio::test]
    async fn test_run_bounded_reports_panic() {
        let flag = Arc::new(AtomicBool::new(false));
        let result: Result<(), _> =
            run_bounded(&flag, Duration::from_secs(1), || panic!("probe blew up")).await;
        assert_eq!(result, Err(ProbeError::Panicked));
        assert!(!flag.load(Ordering::Acquire));
    }
}
