//! Telemetry snapshot value objects.
//!
//! A [`TelemetrySnapshot`] is assembled once per broadcast tick and never
//! mutated afterwards. Its serialized form is the telemetry wire shape:
//!
//! ```text
//! { ts, arm: {connected, joints}, camera: {connected, fps, width, height},
//!   system: {cpu_pct, gpu_pct, cpu_temp, gpu_temp, mem_pct} }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::joint::JointMap;

/// Arm state as seen by the health sampler.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArmState {
    pub connected: bool,
    pub joints: JointMap,
}

impl ArmState {
    /// Offline arm: no joints reported.
    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// Camera state: connectivity plus measured geometry and rate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraState {
    pub connected: bool,
    /// Measured frame arrival rate, not the configured nominal rate
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraState {
    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// Host load and thermal readings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_pct: f32,
    pub gpu_pct: f32,
    pub cpu_temp: f32,
    pub gpu_temp: f32,
    pub mem_pct: f32,
}

/// Immutable aggregate of all monitored subsystems at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    ts: DateTime<Utc>,
    arm: ArmState,
    camera: CameraState,
    system: SystemMetrics,
}

impl TelemetrySnapshot {
    /// Assembles a snapshot. An arm reported as disconnected never carries
    /// joint data.
    pub fn new(
        ts: DateTime<Utc>,
        arm: ArmState,
        camera: CameraState,
        system: SystemMetrics,
    ) -> Self {
        let arm = if arm.connected {
            arm
        } else {
            ArmState::disconnected()
        };
        Self {
            ts,
            arm,
            camera,
            system,
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        self.ts
    }

    pub fn arm(&self) -> &ArmState {
        &self.arm
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn system(&self) -> &SystemMetrics {
        &self.system
    }
}
