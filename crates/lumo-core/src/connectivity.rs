//! Per-device connectivity state with debounced transitions.
//!
//! Each device has exactly one writer (its probe) which owns a [`Debouncer`].
//! Readers only ever see the resulting [`ConnectivityState`] value.
//!
//! Rules:
//! - `false -> true` on the first successful observation
//! - `true -> false` after `failure_threshold` consecutive failed observations,
//!   or immediately on an explicit disconnect

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Monitored hardware device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Arm,
    Camera,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arm => "arm",
            Self::Camera => "camera",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported connectivity of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    /// Whether the device is currently considered connected
    pub connected: bool,

    /// When `connected` last changed value
    pub since: DateTime<Utc>,
}

impl ConnectivityState {
    /// Initial state: disconnected as of `now`.
    pub fn disconnected(now: DateTime<Utc>) -> Self {
        Self {
            connected: false,
            since: now,
        }
    }
}

/// A state change produced by a [`Debouncer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Disconnected,
}

/// Debounces raw probe outcomes into a stable [`ConnectivityState`].
#[derive(Debug, Clone)]
pub struct Debouncer {
    state: ConnectivityState,
    consecutive_failures: u32,
    failure_threshold: u32,
}

impl Debouncer {
    /// Creates a debouncer starting disconnected.
    ///
    /// A threshold of 0 is treated as 1.
    pub fn new(failure_threshold: u32, now: DateTime<Utc>) -> Self {
        Self {
            state: ConnectivityState::disconnected(now),
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Records a successful observation.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        self.consecutive_failures = 0;
        if self.state.connected {
            return None;
        }
        self.state = ConnectivityState {
            connected: true,
            since: now,
        };
        Some(Transition::Connected)
    }

    /// Records a failed observation.
    ///
    /// Only flips to disconnected once the threshold of consecutive failures
    /// has been reached.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.state.connected {
            return None;
        }
        if self.consecutive_failures < self.failure_threshold {
            debug!(
                failures = self.consecutive_failures,
                threshold = self.failure_threshold,
                "Probe failure absorbed by debounce"
            );
            return None;
        }
        self.state = ConnectivityState {
            connected: false,
            since: now,
        };
        Some(Transition::Disconnected)
    }

    /// Records an explicit disconnect event, bypassing the debounce window.
    pub fn force_disconnect(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        self.consecutive_failures = self.failure_threshold;
        if !self.state.connected {
            return None;
        }
        self.state = ConnectivityState {
            connected: false,
            since: now,
        };
        Some(Transition::Disconnected)
    }

    /// Resets to disconnected as part of a lifecycle reset.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        if self.state.connected {
            self.state = ConnectivityState::disconnected(now);
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }
}
