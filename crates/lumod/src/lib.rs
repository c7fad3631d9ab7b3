//! Lumo Daemon - Hardware-to-network delivery bridge
//!
//! This crate provides the core infrastructure for the lumo daemon:
//! - `arm` - Arm link abstraction and drivers
//! - `capture` - Capture source, single-slot frame buffer and JPEG encoding
//! - `stream` - Snapshot and per-viewer MJPEG stream sessions
//! - `health` - Debounced arm/camera/system health sampling
//! - `telemetry` - Fixed-cadence telemetry broadcast to listeners
//! - `command` - Connectivity gate in front of arm commands
//! - `server` - HTTP/WebSocket wiring
//! - `config` - TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  publish   ┌─────────────┐  pull on cadence  ┌────────────────┐
//! │ Acquisition  │──────────▶│ FrameBuffer │◀──────────────────│ StreamSession  │
//! │ loop (thread)│            │ (one slot)  │◀── snapshot ──┐   │  (per viewer)  │
//! └──────┬───────┘            └─────────────┘               │   └────────────────┘
//!        │ camera connectivity                              │
//!        ▼                                                  │
//! ┌──────────────┐   sample   ┌─────────────────────┐  try_send  ┌──────────────┐
//! │HealthSampler │◀──────────│ TelemetryBroadcaster │──────────▶│  Listeners   │
//! │ arm/cam/sys  │            │     (10 Hz tick)     │            │ (WebSocket)  │
//! └──────┬───────┘            └─────────────────────┘            └──────────────┘
//!        │ arm connectivity (watch)
//!        ▼
//! ┌──────────────┐
//! │ CommandGate  │
//! └──────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod arm;
pub mod capture;
pub mod command;
pub mod config;
pub mod dashboard;
pub mod health;
pub mod server;
pub mod stream;
pub mod telemetry;

pub use dashboard::{Dashboard, RunningDashboard};
