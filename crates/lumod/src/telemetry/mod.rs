//! Fixed-cadence telemetry broadcast.
//!
//! Once per period the broadcaster samples health, serializes one snapshot
//! and queues it for every listener. Ticks are emitted whether or not any
//! device is connected; a disconnected device is reported as such.
//!
//! Missed ticks are skipped rather than bursted, so a stalled tick never
//! produces a backlog of stale snapshots.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Serialization failures are logged and the tick is dropped

mod registry;

pub use registry::{
    BroadcastReport, ListenerId, ListenerRegistry, ListenerState, PendingListener, TelemetryError,
    TelemetrySubscription, LISTENER_BUFFER, MAX_LISTENERS,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use lumo_protocol::encode_telemetry;

use crate::health::HealthSampler;

/// Default broadcast period (10 Hz).
pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(100);

/// Samples health and broadcasts it to listeners on a fixed period.
pub struct TelemetryBroadcaster {
    sampler: HealthSampler,
    registry: ListenerRegistry,
    period: Duration,
    ticks: u64,
}

impl TelemetryBroadcaster {
    pub fn new(sampler: HealthSampler, registry: ListenerRegistry, period: Duration) -> Self {
        Self {
            sampler,
            registry,
            period,
            ticks: 0,
        }
    }

    /// Samples, serializes and broadcasts one snapshot.
    ///
    /// Returns `None` if the snapshot could not be serialized.
    pub async fn tick(&mut self) -> Option<BroadcastReport> {
        let sample = self.sampler.sample().await;
        let snapshot = sample.into_snapshot(Utc::now());

        let payload: Arc<str> = match encode_telemetry(&snapshot) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!(error = %e, "Failed to serialize telemetry snapshot");
                return None;
            }
        };

        let report = self.registry.broadcast(payload).await;
        self.ticks += 1;
        if report.removed > 0 {
            debug!(removed = report.removed, "Pruned telemetry listeners");
        }
        Some(report)
    }

    /// Runs until cancelled.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period_ms = self.period.as_millis() as u64, "Telemetry broadcaster started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Telemetry broadcaster shutting down");
                    break;
                }

                _ = tick.tick() => {
                    self.tick().await;
                }
            }
        }

        self.registry.clear().await;
        debug!(ticks = self.ticks, "Telemetry broadcaster task completed");
    }

    /// Spawns [`run`](Self::run) on the runtime.
    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel_token))
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
