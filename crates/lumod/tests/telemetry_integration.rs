//! Integration tests for health sampling and telemetry broadcast.
//!
//! These tests wire a broadcaster the way the dashboard does and observe
//! it through listener subscriptions, covering disconnected devices, arm
//! reconnection, stalled probes and slow listeners.
//!
//! Tests may use `.unwrap()` and `.expect()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lumo_core::{SystemMetrics, TelemetrySnapshot};
use lumod::arm::{ArmLink, OfflineArm, SimulatedArm};
use lumod::capture::{
    CaptureSettings, CaptureSource, FrameSource, SourceFactory, TestPatternSource,
};
use lumod::health::{ArmProbe, HealthSampler, ProbeError, SystemProbe, SystemSampler};
use lumod::telemetry::{ListenerRegistry, TelemetryBroadcaster};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const PERIOD: Duration = Duration::from_millis(20);
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Helpers
// ============================================================================

/// Fixed readings, optionally stalling far past the probe timeout.
struct FixedSystem {
    metrics: SystemMetrics,
    stall: Arc<AtomicBool>,
}

impl SystemProbe for FixedSystem {
    fn read(&mut self) -> Result<SystemMetrics, ProbeError> {
        if self.stall.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(1));
        }
        Ok(self.metrics)
    }
}

fn fixed_metrics() -> SystemMetrics {
    SystemMetrics {
        cpu_pct: 12.5,
        gpu_pct: 40.0,
        cpu_temp: 45.5,
        gpu_temp: 44.0,
        mem_pct: 33.0,
    }
}

fn idle_camera() -> CaptureSource {
    let factory: SourceFactory =
        Arc::new(|| Box::new(TestPatternSource::new(16, 16, 30.0)) as Box<dyn FrameSource>);
    CaptureSource::new(factory, CaptureSettings::default())
}

fn broadcaster(
    link: Arc<dyn ArmLink>,
    stall: Arc<AtomicBool>,
    registry: ListenerRegistry,
) -> TelemetryBroadcaster {
    let arm = ArmProbe::new(link, 2, PROBE_TIMEOUT);
    let system = SystemSampler::new(
        Box::new(FixedSystem {
            metrics: fixed_metrics(),
            stall,
        }),
        PROBE_TIMEOUT,
    );
    let sampler = HealthSampler::new(arm, idle_camera(), system);
    TelemetryBroadcaster::new(sampler, registry, PERIOD)
}

fn parse(payload: &str) -> TelemetrySnapshot {
    serde_json::from_str(payload).expect("valid telemetry json")
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ticks_emitted_while_everything_disconnected() {
    let registry = ListenerRegistry::new(4, 4);
    let mut listener = registry.subscribe().await.unwrap();

    let cancel = CancellationToken::new();
    let handle = broadcaster(
        Arc::new(OfflineArm),
        Arc::new(AtomicBool::new(false)),
        registry.clone(),
    )
    .spawn(cancel.clone());

    let mut last_ts = None;
    for _ in 0..3 {
        let payload = timeout(RECV_TIMEOUT, listener.recv())
            .await
            .expect("tick within timeout")
            .expect("listener open");
        let snapshot = parse(&payload);

        assert!(!snapshot.arm().connected);
        assert!(snapshot.arm().joints.is_empty());
        assert!(!snapshot.camera().connected);
        assert_eq!(snapshot.camera().fps, 0.0);
        assert_eq!(*snapshot.system(), fixed_metrics());

        if let Some(prev) = last_ts {
            assert!(snapshot.ts() >= prev);
        }
        last_ts = Some(snapshot.ts());
    }

    cancel.cancel();
    handle.await.unwrap();

    // broadcaster clears listeners on shutdown; drain what was queued
    let drained = timeout(RECV_TIMEOUT, async {
        while listener.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok());
    assert_eq!(registry.len().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_arm_reconnect_shows_joints() {
    let arm = Arc::new(SimulatedArm::new());
    arm.set_connected(false);

    let registry = ListenerRegistry::new(4, 4);
    let mut listener = registry.subscribe().await.unwrap();

    let cancel = CancellationToken::new();
    let handle = broadcaster(
        Arc::clone(&arm) as Arc<dyn ArmLink>,
        Arc::new(AtomicBool::new(false)),
        registry.clone(),
    )
    .spawn(cancel.clone());

    let first = parse(&timeout(RECV_TIMEOUT, listener.recv()).await.unwrap().unwrap());
    assert!(!first.arm().connected);

    arm.set_connected(true);

    let mut connected = None;
    for _ in 0..20 {
        let snapshot = parse(&timeout(RECV_TIMEOUT, listener.recv()).await.unwrap().unwrap());
        if snapshot.arm().connected {
            connected = Some(snapshot);
            break;
        }
    }
    let snapshot = connected.expect("arm reported connected");
    assert_eq!(snapshot.arm().joints.len(), 6);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_system_probe_does_not_delay_ticks() {
    let stall = Arc::new(AtomicBool::new(false));
    let registry = ListenerRegistry::new(4, 8);
    let mut listener = registry.subscribe().await.unwrap();

    let mut broadcaster = broadcaster(Arc::new(OfflineArm), Arc::clone(&stall), registry.clone());

    // one good reading to fall back on
    broadcaster.tick().await.unwrap();
    let good = parse(&listener.recv().await.unwrap());
    assert_eq!(*good.system(), fixed_metrics());

    stall.store(true, Ordering::SeqCst);
    let started = std::time::Instant::now();
    broadcaster.tick().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(600),
        "tick took {:?}",
        started.elapsed()
    );

    let fallback = parse(&listener.recv().await.unwrap());
    assert_eq!(*fallback.system(), fixed_metrics());
    assert_eq!(broadcaster.ticks(), 2);
}

// ============================================================================
// Listeners
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_listener_does_not_block_others() {
    let registry = ListenerRegistry::new(4, 2);
    let _slow = registry.subscribe().await.unwrap();
    let mut fast = registry.subscribe().await.unwrap();

    let mut broadcaster = broadcaster(
        Arc::new(OfflineArm),
        Arc::new(AtomicBool::new(false)),
        registry.clone(),
    );

    for _ in 0..5 {
        let report = timeout(RECV_TIMEOUT, broadcaster.tick())
            .await
            .expect("tick never waits on a listener")
            .unwrap();
        assert_eq!(report.delivered + report.skipped, 2);
        // fast listener keeps up
        assert!(fast.recv().await.is_some());
    }

    assert_eq!(registry.len().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_departed_listener_is_pruned() {
    let registry = ListenerRegistry::new(4, 4);
    let gone = registry.subscribe().await.unwrap();
    let mut stays = registry.subscribe().await.unwrap();
    drop(gone);

    let mut broadcaster = broadcaster(
        Arc::new(OfflineArm),
        Arc::new(AtomicBool::new(false)),
        registry.clone(),
    );

    let report = broadcaster.tick().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(registry.len().await, 1);
    assert!(stays.recv().await.is_some());
}

#[tokio::test]
async fn test_listener_cap_enforced() {
    let registry = ListenerRegistry::new(2, 4);
    let first = registry.subscribe().await.unwrap();
    let _second = registry.subscribe().await.unwrap();

    assert!(registry.subscribe().await.is_err());

    first.close().await;
    assert!(registry.subscribe().await.is_ok());
}
