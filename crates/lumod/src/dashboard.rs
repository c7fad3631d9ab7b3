//! Assembles the daemon components from configuration.
//!
//! ```text
//! LumoConfig ──▶ Dashboard::from_config ──▶ start() ──▶ RunningDashboard::run()
//!                (capture, arm probe,        (camera      (serve until cancelled,
//!                 gate, sessions, ...)        autostart,   then stop broadcaster
//!                                             broadcaster) and camera)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lumo_core::JointLimits;

use crate::arm::{arm_link, ArmLink};
use crate::capture::{source_factory, CaptureSettings, CaptureSource, SourceFactory};
use crate::command::CommandGate;
use crate::config::LumoConfig;
use crate::health::{ArmProbe, HealthSampler, HostMetrics, SystemProbe, SystemSampler};
use crate::server::{AppState, DashboardServer, ServerError};
use crate::stream::{SessionManager, StreamSettings, IDLE_POLL};
use crate::telemetry::{ListenerRegistry, TelemetryBroadcaster};

/// All daemon components, wired but not yet running.
pub struct Dashboard {
    config: LumoConfig,
    state: Arc<AppState>,
    broadcaster: TelemetryBroadcaster,
    cancel_token: CancellationToken,
}

impl Dashboard {
    /// Builds the components selected by configuration.
    pub fn from_config(config: LumoConfig, cancel_token: CancellationToken) -> Self {
        let factory = source_factory(&config.camera);
        let link = arm_link(&config.arm);
        let system = Box::new(HostMetrics::new(&config.system));
        Self::with_parts(config, factory, link, system, cancel_token)
    }

    /// Builds the daemon around explicit hardware implementations.
    pub fn with_parts(
        config: LumoConfig,
        factory: SourceFactory,
        link: Arc<dyn ArmLink>,
        system: Box<dyn SystemProbe>,
        cancel_token: CancellationToken,
    ) -> Self {
        let camera = CaptureSource::new(factory, CaptureSettings::from(&config.camera));

        let arm_probe = ArmProbe::new(
            Arc::clone(&link),
            config.arm.failure_threshold,
            config.arm.probe_timeout(),
        );
        let gate = CommandGate::new(
            link,
            arm_probe.connectivity(),
            JointLimits::factory(),
            config.arm.command_timeout(),
        );
        let arm_state = arm_probe.state();

        let sessions = SessionManager::new(
            camera.clone(),
            StreamSettings {
                stream_quality: config.camera.stream_quality,
                max_fps: config.camera.max_stream_fps,
                idle_poll: IDLE_POLL,
            },
            cancel_token.clone(),
        );

        let listeners = ListenerRegistry::new(
            config.telemetry.max_listeners,
            config.telemetry.listener_buffer,
        );
        let sampler = HealthSampler::new(
            arm_probe,
            camera.clone(),
            SystemSampler::new(system, config.system.probe_timeout()),
        );
        let broadcaster =
            TelemetryBroadcaster::new(sampler, listeners.clone(), config.telemetry.period());

        let state = Arc::new(AppState {
            camera,
            sessions,
            gate,
            arm_state,
            listeners,
            write_timeout: config.telemetry.write_timeout(),
        });

        Self {
            config,
            state,
            broadcaster,
            cancel_token,
        }
    }

    /// Shared handler state.
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Binds the server, autostarts the camera and starts the broadcaster.
    pub async fn start(self) -> Result<RunningDashboard, ServerError> {
        let addr = self.config.server.bind_addr()?;
        let server = DashboardServer::bind(addr, self.state(), self.cancel_token.clone()).await?;

        if self.config.camera.autostart {
            let camera = self.state.camera.clone();
            match tokio::task::spawn_blocking(move || camera.start()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Camera autostart failed"),
                Err(e) => warn!(error = %e, "Camera autostart task failed"),
            }
        }

        let broadcaster = self.broadcaster.spawn(self.cancel_token.clone());

        info!(
            addr = %server.local_addr(),
            camera_source = ?self.config.camera.source,
            arm_driver = ?self.config.arm.driver,
            "Dashboard started"
        );

        Ok(RunningDashboard {
            server,
            state: self.state,
            broadcaster,
            cancel_token: self.cancel_token,
        })
    }
}

/// A started daemon.
pub struct RunningDashboard {
    server: DashboardServer,
    state: Arc<AppState>,
    broadcaster: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl RunningDashboard {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serves until cancelled, then shuts down the broadcaster and camera.
    pub async fn run(self) -> Result<(), ServerError> {
        let result = self.server.run().await;
        if let Err(ref e) = result {
            error!(error = %e, "Server error");
        }

        // Server may have exited on its own
        self.cancel_token.cancel();

        if let Err(e) = self.broadcaster.await {
            warn!(error = %e, "Telemetry broadcaster task failed");
        }

        let camera = self.state.camera.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || camera.stop()).await {
            warn!(error = %e, "Camera shutdown task failed");
        }

        info!("Dashboard stopped");
        result
    }
}
