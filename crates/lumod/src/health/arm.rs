use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lumo_core::{ArmState, ConnectivityState, Debouncer, Device, JointMap, Transition};

use super::{run_bounded, ProbeError};
use crate::arm::{ArmError, ArmLink};

/// Raw outcome of one arm observation.
enum Reading {
    Connected(JointMap),
    /// The link explicitly reported the arm as absent
    Absent,
    Failed(ProbeError),
}

/// Probes the arm and owns its connectivity.
///
/// This is the single writer of arm connectivity. The command gate and the
/// arm status endpoint observe it through watch receivers.
pub struct ArmProbe {
    link: Arc<dyn ArmLink>,
    debouncer: Debouncer,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
    last_joints: JointMap,
    connectivity: watch::Sender<ConnectivityState>,
    state: watch::Sender<ArmState>,
}

impl ArmProbe {
    pub fn new(link: Arc<dyn ArmLink>, failure_threshold: u32, timeout: Duration) -> Self {
        let now = Utc::now();
        let (connectivity, _) = watch::channel(ConnectivityState::disconnected(now));
        let (state, _) = watch::channel(ArmState::disconnected());
        Self {
            link,
            debouncer: Debouncer::new(failure_threshold, now),
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
            last_joints: JointMap::new(),
            connectivity,
            state,
        }
    }

    /// Debounced arm connectivity.
    pub fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity.subscribe()
    }

    /// Last published arm state.
    pub fn state(&self) -> watch::Receiver<ArmState> {
        self.state.subscribe()
    }

    pub fn link(&self) -> Arc<dyn ArmLink> {
        Arc::clone(&self.link)
    }

    /// Observes the arm once and returns the debounced state.
    pub async fn probe(&mut self) -> ArmState {
        let reading = self.read().await;
        let now = Utc::now();

        let transition = match reading {
            Reading::Connected(joints) => {
                self.last_joints = joints;
                self.debouncer.record_success(now)
            }
            Reading::Absent => self.debouncer.force_disconnect(now),
            Reading::Failed(e) => {
                debug!(error = %e, "Arm probe failed");
                self.debouncer.record_failure(now)
            }
        };

        if let Some(transition) = transition {
            self.connectivity.send_replace(self.debouncer.state());
            match transition {
                Transition::Connected => info!(device = %Device::Arm, "Device connected"),
                Transition::Disconnected => warn!(device = %Device::Arm, "Device disconnected"),
            }
        }

        let state = if self.debouncer.is_connected() {
            ArmState {
                connected: true,
                joints: self.last_joints.clone(),
            }
        } else {
            self.last_joints.clear();
            ArmState::disconnected()
        };
        self.state.send_replace(state.clone());
        state
    }

    async fn read(&self) -> Reading {
        let link = Arc::clone(&self.link);
        let result = run_bounded(&self.in_flight, self.timeout, move || -> Result<_, ArmError> {
            if !link.is_connected()? {
                return Ok(None);
            }
            link.read_joints().map(Some)
        })
        .await;

        match result {
            Ok(Ok(Some(joints))) => Reading::Connected(joints),
            Ok(Ok(None)) | Ok(Err(ArmError::NotConnected)) => Reading::Absent,
            Ok(Err(e)) => Reading::Failed(ProbeError::Failed(e.to_string())),
            Err(e) => Reading::Failed(e),
        }
    }
}
