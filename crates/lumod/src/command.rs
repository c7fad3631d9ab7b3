//! Arm command gate.
//!
//! Every hardware-mutating arm command passes through [`CommandGate`]. The
//! gate reads the arm connectivity published by the health sampler; it
//! never probes the hardware itself. Commands for an offline arm are
//! rejected without touching the link.
//!
//! Emergency stop is the exception: it is always acknowledged. If the arm
//! is offline there is nothing in motion to stop.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Link calls run on the blocking pool under a timeout; a stalled or
//!   panicking call becomes a failed outcome

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use lumo_core::{ConnectivityState, JointLimits};
use lumo_protocol::{CommandOutcome, MoveRequest};

use crate::arm::{ArmError, ArmLink};

/// Acknowledgement text for a stop issued while the arm is offline.
pub const STOP_OFFLINE_MESSAGE: &str = "Stop acknowledged (arm offline)";

/// Connectivity-gated dispatcher for arm commands.
#[derive(Clone)]
pub struct CommandGate {
    link: Arc<dyn ArmLink>,
    connectivity: watch::Receiver<ConnectivityState>,
    limits: Arc<JointLimits>,
    timeout: Duration,
}

impl CommandGate {
    pub fn new(
        link: Arc<dyn ArmLink>,
        connectivity: watch::Receiver<ConnectivityState>,
        limits: JointLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            link,
            connectivity,
            limits: Arc::new(limits),
            timeout,
        }
    }

    /// Current gate input.
    pub fn is_arm_connected(&self) -> bool {
        self.connectivity.borrow().connected
    }

    /// Moves joints to the requested targets, clamped to joint limits.
    pub async fn dispatch_move(&self, request: MoveRequest) -> CommandOutcome {
        if !self.is_arm_connected() {
            return CommandOutcome::not_connected();
        }
        if request.joints.is_empty() {
            return CommandOutcome::failed("No joint targets given");
        }

        let targets = match self.limits.clamp_all(&request.joints) {
            Ok(targets) => targets,
            Err(e) => return CommandOutcome::failed(e.to_string()),
        };
        let speed = request.normalized_speed();

        info!(joints = ?targets, speed, "Dispatching arm move");
        let link = Arc::clone(&self.link);
        self.run("move", move || link.move_joints(&targets, speed)).await
    }

    /// Moves every joint to its home position.
    pub async fn dispatch_home(&self) -> CommandOutcome {
        if !self.is_arm_connected() {
            return CommandOutcome::not_connected();
        }

        info!("Dispatching arm home");
        let link = Arc::clone(&self.link);
        self.run("home", move || link.home()).await
    }

    /// Emergency stop. Always acknowledged.
    pub async fn dispatch_stop(&self) -> CommandOutcome {
        if !self.is_arm_connected() {
            info!("Stop requested while arm offline");
            return CommandOutcome::ok_with_message(STOP_OFFLINE_MESSAGE);
        }

        warn!("Dispatching arm emergency stop");
        let link = Arc::clone(&self.link);
        let outcome = self.run("stop", move || link.stop()).await;
        if let Some(error) = outcome.error {
            warn!(error = %error, "Arm stop failed");
        }
        CommandOutcome::ok()
    }

    async fn run<F>(&self, command: &'static str, call: F) -> CommandOutcome
    where
        F: FnOnce() -> Result<(), ArmError> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(call);
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(()))) => CommandOutcome::ok(),
            Ok(Ok(Err(ArmError::NotConnected))) => CommandOutcome::not_connected(),
            Ok(Ok(Err(e))) => {
                warn!(command, error = %e, "Arm command failed");
                CommandOutcome::failed(e.to_string())
            }
            Ok(Err(_)) => {
                warn!(command, "Arm command panicked");
                CommandOutcome::failed(format!("Arm {command} failed"))
            }
            Err(_) => {
                warn!(command, timeout_ms = self.timeout.as_millis() as u64, "Arm command timed out");
                CommandOutcome::failed(format!("Arm {command} timed out"))
            }
        }
    }

    pub fn limits(&self) -> &JointLimits {
        &self.limits
    }
}
