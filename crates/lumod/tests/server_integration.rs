//! Integration tests for the HTTP surface.
//!
//! These tests start a complete dashboard on an ephemeral port with a test
//! pattern camera and a simulated arm, and talk to it over plain TCP.
//!
//! Tests may use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lumo_core::{is_jpeg, ArmState, CameraState, SystemMetrics, JPEG_SOI};
use lumo_protocol::{
    ArmCalibration, CameraRunning, CameraStatus, CommandOutcome, ModeResponse, ServiceHealth,
    NOT_CONNECTED,
};
use lumod::arm::{ArmLink, OfflineArm, SimulatedArm};
use lumod::capture::{FrameSource, SourceFactory, TestPatternSource};
use lumod::command::STOP_OFFLINE_MESSAGE;
use lumod::config::LumoConfig;
use lumod::health::{ProbeError, SystemProbe};
use lumod::Dashboard;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for a request or a state change
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Test Helpers
// ============================================================================

struct ZeroSystem;

impl SystemProbe for ZeroSystem {
    fn read(&mut self) -> Result<SystemMetrics, ProbeError> {
        Ok(SystemMetrics::default())
    }
}

/// A running dashboard plus what is needed to shut it down.
struct TestDashboard {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestDashboard {
    async fn spawn(link: Arc<dyn ArmLink>, autostart: bool) -> Self {
        let mut config = LumoConfig::default();
        config.server.bind = "127.0.0.1:0".to_string();
        config.camera.autostart = autostart;
        config.telemetry.period_ms = 20;

        let factory: SourceFactory =
            Arc::new(|| Box::new(TestPatternSource::new(64, 48, 30.0)) as Box<dyn FrameSource>);
        let cancel_token = CancellationToken::new();

        let dashboard = Dashboard::with_parts(
            config,
            factory,
            link,
            Box::new(ZeroSystem),
            cancel_token.clone(),
        );
        let running = dashboard.start().await.expect("dashboard starts");
        let addr = running.local_addr();

        let handle = tokio::spawn(async move {
            let _ = running.run().await;
        });

        Self {
            addr,
            cancel_token,
            handle,
        }
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(REQUEST_TIMEOUT, self.handle)
            .await
            .expect("dashboard stops")
            .expect("dashboard task");
    }
}

/// Raw HTTP/1.1 exchange.
struct HttpResponse {
    status: u16,
    head: String,
    body: Vec<u8>,
}

impl HttpResponse {
    fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("json body")
    }

    fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with(&prefix))
            .map(|line| line[prefix.len()..].trim().to_string())
    }
}

async fn request(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> HttpResponse {
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    let body = body.unwrap_or("");
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(req.as_bytes()).await.expect("write request");

    let mut raw = Vec::new();
    timeout(REQUEST_TIMEOUT, stream.read_to_end(&mut raw))
        .await
        .expect("response within timeout")
        .expect("read response");

    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> HttpResponse {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("complete head");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");

    HttpResponse {
        status,
        head,
        body: raw[split + 4..].to_vec(),
    }
}

async fn get(addr: SocketAddr, path: &str) -> HttpResponse {
    request(addr, "GET", path, None).await
}

async fn post(addr: SocketAddr, path: &str, body: &str) -> HttpResponse {
    request(addr, "POST", path, Some(body)).await
}

/// Polls `path` until `accept` returns true for its JSON body.
async fn wait_for_json<T: DeserializeOwned>(
    addr: SocketAddr,
    path: &str,
    accept: impl Fn(&T) -> bool,
) -> T {
    let deadline = tokio::time::Instant::now() + REQUEST_TIMEOUT;
    loop {
        let value: T = get(addr, path).await.json();
        if accept(&value) {
            return value;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition on {path} not met in time"
        );
        sleep(POLL_INTERVAL).await;
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ============================================================================
// Service
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_endpoint() {
    let dashboard = TestDashboard::spawn(Arc::new(OfflineArm), false).await;

    let response = get(dashboard.addr, "/health").await;
    assert_eq!(response.status, 200);
    let health: ServiceHealth = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.service, "lumo-dashboard");

    assert_eq!(get(dashboard.addr, "/no/such/route").await.status, 404);

    dashboard.shutdown().await;
}

// ============================================================================
// Camera
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_camera_lifecycle_over_http() {
    let dashboard = TestDashboard::spawn(Arc::new(OfflineArm), false).await;
    let addr = dashboard.addr;

    let status: CameraStatus = get(addr, "/api/camera/status").await.json();
    assert_eq!(status.state, CameraState::disconnected());
    assert_eq!(status.mode.as_str(), "rgb");
    assert_eq!(get(addr, "/api/camera/snapshot").await.status, 204);

    let started: CameraRunning = post(addr, "/api/camera/start", "").await.json();
    assert!(started.running);

    let status: CameraStatus = wait_for_json(addr, "/api/camera/status", |s: &CameraStatus| {
        s.state.connected
    })
    .await;
    assert_eq!((status.state.width, status.state.height), (64, 48));

    let snapshot = get(addr, "/api/camera/snapshot").await;
    assert_eq!(snapshot.status, 200);
    assert_eq!(snapshot.header("content-type").as_deref(), Some("image/jpeg"));
    assert!(is_jpeg(&snapshot.body));

    let stopped: CameraRunning = post(addr, "/api/camera/stop", "").await.json();
    assert!(!stopped.running);
    let status: CameraStatus = get(addr, "/api/camera/status").await.json();
    assert!(!status.state.connected);
    assert_eq!(get(addr, "/api/camera/snapshot").await.status, 204);

    dashboard.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_camera_mode_switch() {
    let dashboard = TestDashboard::spawn(Arc::new(OfflineArm), true).await;
    let addr = dashboard.addr;

    let mode: ModeResponse = get(addr, "/api/camera/mode").await.json();
    assert_eq!(mode.mode.as_str(), "rgb");

    let response = post(addr, "/api/camera/mode", r#"{"mode":"ir"}"#).await;
    assert_eq!(response.status, 200);
    let mode: ModeResponse = response.json();
    assert_eq!(mode.mode.as_str(), "ir");

    let rejected = post(addr, "/api/camera/mode", r#"{"mode":"thermal"}"#).await;
    assert_eq!(rejected.status, 400);

    // rejected request leaves the mode unchanged
    let mode: ModeResponse = get(addr, "/api/camera/mode").await.json();
    assert_eq!(mode.mode.as_str(), "ir");

    let status: CameraStatus = get(addr, "/api/camera/status").await.json();
    assert_eq!(status.mode.as_str(), "ir");

    dashboard.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_delivers_multipart_jpeg() {
    let dashboard = TestDashboard::spawn(Arc::new(OfflineArm), true).await;
    let addr = dashboard.addr;

    wait_for_json(addr, "/api/camera/status", |s: &CameraStatus| s.state.connected).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/camera/stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    let read = timeout(REQUEST_TIMEOUT, async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed early");
            raw.extend_from_slice(&buf[..n]);
            if raw.windows(9).filter(|w| w == b"--frame\r\n").count() >= 2 {
                break;
            }
        }
    })
    .await;
    assert!(read.is_ok(), "did not receive two parts");

    let response = parse_response(&raw);
    assert_eq!(response.status, 200);
    assert_eq!(
        response.header("content-type").as_deref(),
        Some("multipart/x-mixed-replace; boundary=frame")
    );
    assert!(response
        .header("cache-control")
        .is_some_and(|v| v.contains("no-cache")));
    assert!(contains(&response.body, b"Content-Type: image/jpeg"));
    assert!(contains(&response.body, &JPEG_SOI));

    drop(stream);
    dashboard.shutdown().await;
}

// ============================================================================
// Arm
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_arm_commands_rejected_while_offline() {
    let dashboard = TestDashboard::spawn(Arc::new(OfflineArm), false).await;
    let addr = dashboard.addr;

    let arm: ArmState = get(addr, "/api/arm/status").await.json();
    assert_eq!(arm, ArmState::disconnected());

    let moved: CommandOutcome = post(addr, "/api/arm/move", r#"{"joints":{"gripper":50}}"#)
        .await
        .json();
    assert!(!moved.ok);
    assert_eq!(moved.error.as_deref(), Some(NOT_CONNECTED));

    let homed: CommandOutcome = post(addr, "/api/arm/home", "").await.json();
    assert!(!homed.ok);
    assert_eq!(homed.error.as_deref(), Some(NOT_CONNECTED));

    let stopped: CommandOutcome = post(addr, "/api/arm/stop", "").await.json();
    assert!(stopped.ok);
    assert_eq!(stopped.message.as_deref(), Some(STOP_OFFLINE_MESSAGE));

    dashboard.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_arm_calibration_endpoint() {
    let dashboard = TestDashboard::spawn(Arc::new(OfflineArm), false).await;

    let response = get(dashboard.addr, "/api/arm/calibration").await;
    assert_eq!(response.status, 200);
    let calibration: ArmCalibration = response.json();

    let expected = [
        ("shoulder_pan", 105.2),
        ("shoulder_lift", 109.5),
        ("elbow_flex", 96.3),
        ("wrist_flex", 113.0),
        ("wrist_roll", 180.0),
    ];
    for (name, half) in expected {
        let limit = calibration.follower.get(name).expect("joint present");
        assert!((limit.min + half).abs() < 0.2, "{name} min {}", limit.min);
        assert!((limit.max - half).abs() < 0.2, "{name} max {}", limit.max);
    }
    let gripper = calibration.follower.get("gripper").unwrap();
    assert_eq!((gripper.min, gripper.max), (0.0, 100.0));

    dashboard.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_arm_move_clamps_to_limits() {
    let arm = Arc::new(SimulatedArm::new());
    let dashboard = TestDashboard::spawn(Arc::clone(&arm) as Arc<dyn ArmLink>, false).await;
    let addr = dashboard.addr;

    wait_for_json(addr, "/api/arm/status", |s: &ArmState| s.connected).await;

    let moved: CommandOutcome = post(
        addr,
        "/api/arm/move",
        r#"{"joints":{"gripper":250,"elbow_flex":-10},"speed":80}"#,
    )
    .await
    .json();
    assert!(moved.ok, "move failed: {:?}", moved.error);

    let joints = arm.read_joints().unwrap();
    assert_eq!(joints.get("gripper"), Some(&100.0));
    assert_eq!(joints.get("elbow_flex"), Some(&-10.0));

    // calibrated window is symmetric about zero
    let moved: CommandOutcome = post(addr, "/api/arm/move", r#"{"joints":{"shoulder_pan":112}}"#)
        .await
        .json();
    assert!(moved.ok);
    let pan = arm.read_joints().unwrap()["shoulder_pan"];
    assert!((pan - 105.2).abs() < 0.2, "shoulder_pan sent {pan}");

    // speed outside a byte is clamped, not rejected
    for speed in ["300", "-5"] {
        let response = post(
            addr,
            "/api/arm/move",
            &format!(r#"{{"joints":{{"gripper":20}},"speed":{speed}}}"#),
        )
        .await;
        assert_eq!(response.status, 200);
        let outcome: CommandOutcome = response.json();
        assert!(outcome.ok, "speed {speed}: {:?}", outcome.error);
    }

    let unknown: CommandOutcome = post(addr, "/api/arm/move", r#"{"joints":{"tail":1}}"#)
        .await
        .json();
    assert!(!unknown.ok);

    let homed: CommandOutcome = post(addr, "/api/arm/home", "").await.json();
    assert!(homed.ok);
    assert_eq!(arm.read_joints().unwrap().get("gripper"), Some(&0.0));

    // unplugging the arm closes the gate once the sampler notices
    arm.set_connected(false);
    wait_for_json(addr, "/api/arm/status", |s: &ArmState| !s.connected).await;
    let moved: CommandOutcome = post(addr, "/api/arm/move", r#"{"joints":{"gripper":10}}"#)
        .await
        .json();
    assert_eq!(moved.error.as_deref(), Some(NOT_CONNECTED));

    dashboard.shutdown().await;
}
