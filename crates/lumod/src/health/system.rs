//! Host load and thermal metrics.
//!
//! CPU and memory come from `sysinfo`. Temperatures come from the kernel
//! thermal zones (millidegrees Celsius) and GPU load from the Jetson sysfs
//! node (permille). A missing sysfs file reads as zero: the same binary
//! runs on development machines without those nodes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sysinfo::System;
use tracing::debug;

use lumo_core::SystemMetrics;

use super::{run_bounded, ProbeError};
use crate::capture::lock;
use crate::config::SystemConfig;

/// Reads host metrics. Blocking.
pub trait SystemProbe: Send + 'static {
    fn read(&mut self) -> Result<SystemMetrics, ProbeError>;
}

/// Host metrics from sysinfo plus sysfs.
pub struct HostMetrics {
    system: System,
    cpu_temp_path: PathBuf,
    gpu_temp_path: PathBuf,
    gpu_load_path: PathBuf,
}

impl HostMetrics {
    pub fn new(config: &SystemConfig) -> Self {
        Self::with_paths(
            thermal_zone(config.cpu_thermal_zone),
            thermal_zone(config.gpu_thermal_zone),
            config.gpu_load_path.clone(),
        )
    }

    pub fn with_paths(
        cpu_temp_path: impl Into<PathBuf>,
        gpu_temp_path: impl Into<PathBuf>,
        gpu_load_path: impl Into<PathBuf>,
    ) -> Self {
        let mut system = System::new();
        // baseline for the first CPU usage delta
        system.refresh_cpu_usage();
        Self {
            system,
            cpu_temp_path: cpu_temp_path.into(),
            gpu_temp_path: gpu_temp_path.into(),
            gpu_load_path: gpu_load_path.into(),
        }
    }
}

fn thermal_zone(zone: u32) -> PathBuf {
    PathBuf::from(format!("/sys/class/thermal/thermal_zone{zone}/temp"))
}

/// Reads an integer sysfs node and divides it by `scale`. Zero if the node
/// is missing or unparsable.
fn read_scaled(path: &Path, scale: f32) -> f32 {
    match fs::read_to_string(path) {
        Ok(text) => text.trim().parse::<f32>().map(|v| v / scale).unwrap_or(0.0),
        Err(_) => 0.0,
    }
}

impl SystemProbe for HostMetrics {
    fn read(&mut self) -> Result<SystemMetrics, ProbeError> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let mem_pct = if total > 0 {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };

        Ok(SystemMetrics {
            cpu_pct: self.system.global_cpu_usage(),
            gpu_pct: read_scaled(&self.gpu_load_path, 10.0),
            cpu_temp: read_scaled(&self.cpu_temp_path, 1000.0),
            gpu_temp: read_scaled(&self.gpu_temp_path, 1000.0),
            mem_pct,
        })
    }
}

/// Runs a [`SystemProbe`] with a timeout, keeping the last good reading.
pub struct SystemSampler {
    probe: Arc<Mutex<Box<dyn SystemProbe>>>,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
    last: SystemMetrics,
}

impl SystemSampler {
    pub fn new(probe: Box<dyn SystemProbe>, timeout: Duration) -> Self {
        Self {
            probe: Arc::new(Mutex::new(probe)),
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
            last: SystemMetrics::default(),
        }
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(Box::new(HostMetrics::new(config)), config.probe_timeout())
    }

    /// Reads metrics, falling back to the last good reading.
    pub async fn probe(&mut self) -> SystemMetrics {
        let probe = Arc::clone(&self.probe);
        let result = run_bounded(&self.in_flight, self.timeout, move || lock(&probe).read()).await;

        match result {
            Ok(Ok(metrics)) => self.last = metrics,
            Ok(Err(e)) | Err(e) => debug!(error = %e, "System probe failed, using last reading"),
        }
        self.last
    }
}
