//! TOML configuration for the daemon.
//!
//! Lookup order for the configuration file:
//! 1. Explicit path (`lumod start --config <path>`)
//! 2. `$LUMO_CONFIG`
//! 3. `<config_dir>/lumo/config.toml`
//! 4. Built-in defaults
//!
//! Every field has a default, so a partial file is valid. `$LUMO_BIND`
//! overrides `server.bind` after loading.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "LUMO_CONFIG";

/// Environment variable overriding the listen address.
pub const BIND_ENV: &str = "LUMO_BIND";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LumoConfig {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub arm: ArmConfig,
    pub telemetry: TelemetryConfig,
    pub system: SystemConfig,
}

impl LumoConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration following the lookup order, then applies
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .or_else(|| Self::default_path().filter(|p| p.exists())),
        };

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                    path: path.clone(),
                    error: e.to_string(),
                })?;
                info!(path = %path.display(), "Loaded configuration");
                Self::from_toml(&text)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        if let Ok(bind) = env::var(BIND_ENV) {
            config.server.bind = bind;
        }
        config.validate()?;
        Ok(config)
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lumo").join("config.toml"))
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind_addr()?;
        if self.camera.source == SourceKind::Pipe && self.camera.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "camera.command is required when camera.source = \"pipe\"".to_string(),
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(
                "camera.width and camera.height must be non-zero".to_string(),
            ));
        }
        for (name, quality) in [
            ("snapshot_quality", self.camera.snapshot_quality),
            ("stream_quality", self.camera.stream_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::Invalid(format!(
                    "camera.{name} must be within 1..=100 (got {quality})"
                )));
            }
        }
        if self.camera.max_stream_fps <= 0.0 {
            return Err(ConfigError::Invalid(
                "camera.max_stream_fps must be positive".to_string(),
            ));
        }
        if self.telemetry.period_ms == 0 {
            return Err(ConfigError::Invalid(
                "telemetry.period_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub bind: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("server.bind is not an address: {}", self.bind)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

// ============================================================================
// Camera
// ============================================================================

/// Which frame source backs the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Synthetic animated frames, no hardware required
    #[default]
    TestPattern,
    /// Raw RGB24 frames read from a child process's stdout
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub source: SourceKind,
    /// Program for the pipe source
    pub command: String,
    /// Arguments for the pipe source
    pub args: Vec<String>,
    pub width: u32,
    pub height: u32,
    /// Rate the test pattern is generated at
    pub nominal_fps: f64,
    pub snapshot_quality: u8,
    pub stream_quality: u8,
    /// Upper bound on the per-viewer stream cadence
    pub max_stream_fps: f64,
    /// Consecutive failed acquisitions before the camera reports disconnected
    pub failure_threshold: u32,
    /// Frame age after which the camera reports disconnected
    pub stale_after_ms: u64,
    /// Bound on `stop()` before forced teardown
    pub stop_timeout_ms: u64,
    pub autostart: bool,
}

impl CameraConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::TestPattern,
            command: String::new(),
            args: Vec::new(),
            width: 1280,
            height: 720,
            nominal_fps: 10.0,
            snapshot_quality: 85,
            stream_quality: 75,
            max_stream_fps: 15.0,
            failure_threshold: 3,
            stale_after_ms: 2_000,
            stop_timeout_ms: 2_000,
            autostart: true,
        }
    }
}

// ============================================================================
// Arm
// ============================================================================

/// Which arm link implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmDriver {
    /// No arm attached; every probe reports disconnected
    #[default]
    Offline,
    /// In-memory arm that accepts every command
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub driver: ArmDriver,
    pub failure_threshold: u32,
    pub probe_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl ArmConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            driver: ArmDriver::Offline,
            failure_threshold: 2,
            probe_timeout_ms: 50,
            command_timeout_ms: 1_000,
        }
    }
}

// ============================================================================
// Telemetry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub period_ms: u64,
    pub max_listeners: usize,
    /// Snapshots queued per listener before ticks are skipped for it
    pub listener_buffer: usize,
    pub write_timeout_ms: u64,
}

impl TelemetryConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            period_ms: 100,
            max_listeners: 32,
            listener_buffer: 4,
            write_timeout_ms: 1_000,
        }
    }
}

// ============================================================================
// System
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub cpu_thermal_zone: u32,
    pub gpu_thermal_zone: u32,
    /// GPU load in permille (Jetson exposes it under sysfs)
    pub gpu_load_path: PathBuf,
    pub probe_timeout_ms: u64,
}

impl SystemConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            cpu_thermal_zone: 0,
            gpu_thermal_zone: 1,
            gpu_load_path: PathBuf::from("/sys/devices/gpu.0/load"),
            probe_timeout_ms: 50,
        }
    }
}
