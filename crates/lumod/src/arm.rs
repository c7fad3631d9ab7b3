//! Robotic arm link.
//!
//! [`ArmLink`] is the seam between the daemon and the servo bus. Calls are
//! blocking and may stall on a wedged bus; callers run them on the blocking
//! pool with a timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use lumo_core::{JointMap, JOINT_NAMES};

use crate::capture::lock;
use crate::config::{ArmConfig, ArmDriver};

/// Errors raised by an arm link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArmError {
    #[error("Arm not connected")]
    NotConnected,

    #[error("Servo bus error: {0}")]
    Bus(String),
}

/// Blocking access to the arm hardware.
pub trait ArmLink: Send + Sync + 'static {
    /// Whether the arm answers on the bus.
    fn is_connected(&self) -> Result<bool, ArmError>;

    /// Current joint positions.
    fn read_joints(&self) -> Result<JointMap, ArmError>;

    /// Moves the given joints to (already clamped) targets.
    fn move_joints(&self, targets: &JointMap, speed: u8) -> Result<(), ArmError>;

    /// Moves every joint to its home position.
    fn home(&self) -> Result<(), ArmError>;

    /// Halts all motion.
    fn stop(&self) -> Result<(), ArmError>;
}

/// Builds the arm link selected by configuration.
pub fn arm_link(config: &ArmConfig) -> Arc<dyn ArmLink> {
    match config.driver {
        ArmDriver::Offline => Arc::new(OfflineArm),
        ArmDriver::Simulated => Arc::new(SimulatedArm::new()),
    }
}

/// No arm attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineArm;

impl ArmLink for OfflineArm {
    fn is_connected(&self) -> Result<bool, ArmError> {
        Ok(false)
    }

    fn read_joints(&self) -> Result<JointMap, ArmError> {
        Err(ArmError::NotConnected)
    }

    fn move_joints(&self, _targets: &JointMap, _speed: u8) -> Result<(), ArmError> {
        Err(ArmError::NotConnected)
    }

    fn home(&self) -> Result<(), ArmError> {
        Err(ArmError::NotConnected)
    }

    fn stop(&self) -> Result<(), ArmError> {
        Err(ArmError::NotConnected)
    }
}

/// In-memory arm. Moves complete instantly.
#[derive(Debug)]
pub struct SimulatedArm {
    connected: AtomicBool,
    joints: Mutex<JointMap>,
}

impl SimulatedArm {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            joints: Mutex::new(home_position()),
        }
    }

    /// Simulates plugging or unplugging the arm.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), ArmError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ArmError::NotConnected)
        }
    }
}

impl Default for SimulatedArm {
    fn default() -> Self {
        Self::new()
    }
}

fn home_position() -> JointMap {
    JOINT_NAMES
        .iter()
        .map(|name| (name.to_string(), 0.0))
        .collect()
}

impl ArmLink for SimulatedArm {
    fn is_connected(&self) -> Result<bool, ArmError> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    fn read_joints(&self) -> Result<JointMap, ArmError> {
        self.ensure_connected()?;
        Ok(lock(&self.joints).clone())
    }

    fn move_joints(&self, targets: &JointMap, speed: u8) -> Result<(), ArmError> {
        self.ensure_connected()?;
        let mut joints = lock(&self.joints);
        for (name, value) in targets {
            joints.insert(name.clone(), *value);
        }
        debug!(joints = targets.len(), speed, "Simulated move");
        Ok(())
    }

    fn home(&self) -> Result<(), ArmError> {
        self.ensure_connected()?;
        *lock(&self.joints) = home_position();
        Ok(())
    }

    fn stop(&self) -> Result<(), ArmError> {
        self.ensure_connected()
    }
}
