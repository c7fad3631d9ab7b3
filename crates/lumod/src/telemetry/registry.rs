//! Telemetry listener registry.
//!
//! Every listener owns a small bounded queue. The broadcaster never awaits
//! a listener: a full queue means that listener skips this tick, a closed
//! queue means the listener is gone and is removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Identifier of a telemetry listener.
pub type ListenerId = u64;

/// Default cap on concurrent listeners.
pub const MAX_LISTENERS: usize = 32;

/// Default per-listener queue depth.
pub const LISTENER_BUFFER: usize = 4;

/// Errors that can occur while registering listeners.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("Too many telemetry listeners (max: {max})")]
    TooManyListeners { max: usize },
}

/// Listener lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Transport accepted, not yet registered
    Connecting,
    /// Registered and receiving snapshots
    Open,
    Closed,
}

struct Listener {
    tx: mpsc::Sender<Arc<str>>,
}

type ListenersMap = Arc<RwLock<HashMap<ListenerId, Listener>>>;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Listeners whose queue was full
    pub skipped: usize,
    /// Listeners removed because they went away
    pub removed: usize,
}

/// Registry of telemetry listeners.
#[derive(Clone)]
pub struct ListenerRegistry {
    listeners: ListenersMap,
    next_id: Arc<AtomicU64>,
    max_listeners: usize,
    buffer: usize,
}

impl ListenerRegistry {
    pub fn new(max_listeners: usize, buffer: usize) -> Self {
        Self {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            max_listeners,
            buffer: buffer.max(1),
        }
    }

    /// Starts a listener in the `Connecting` state. It receives nothing
    /// until [`PendingListener::open`] registers it.
    pub fn accept(&self) -> PendingListener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(listener_id = id, "Telemetry listener connecting");
        PendingListener {
            id,
            registry: self.clone(),
        }
    }

    /// Registers a listener.
    pub async fn subscribe(&self) -> Result<TelemetrySubscription, TelemetryError> {
        self.accept().open().await
    }

    async fn register(&self, id: ListenerId) -> Result<TelemetrySubscription, TelemetryError> {
        let mut listeners = self.listeners.write().await;
        if listeners.len() >= self.max_listeners {
            return Err(TelemetryError::TooManyListeners {
                max: self.max_listeners,
            });
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        listeners.insert(id, Listener { tx });
        info!(listener_id = id, listeners = listeners.len(), "Telemetry listener added");

        Ok(TelemetrySubscription {
            id,
            rx,
            state: ListenerState::Open,
            registry: self.clone(),
        })
    }

    /// Removes a listener. No-op if already gone.
    pub async fn unsubscribe(&self, id: ListenerId) {
        let mut listeners = self.listeners.write().await;
        if listeners.remove(&id).is_some() {
            info!(listener_id = id, listeners = listeners.len(), "Telemetry listener removed");
        }
    }

    /// Number of registered listeners.
    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Queues `payload` for every listener without waiting on any of them.
    pub async fn broadcast(&self, payload: Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let listeners = self.listeners.read().await;
        let mut gone = Vec::new();

        for (id, listener) in listeners.iter() {
            match listener.tx.try_send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(listener_id = id, "Telemetry listener behind, skipping tick");
                    report.skipped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        // Remove gone listeners (need to drop read lock first)
        drop(listeners);

        if !gone.is_empty() {
            let mut listeners = self.listeners.write().await;
            for id in gone {
                if listeners.remove(&id).is_some() {
                    report.removed += 1;
                    debug!(listener_id = id, "Removed closed telemetry listener");
                }
            }
        }

        report
    }

    /// Drops every listener. Their receivers observe end-of-stream.
    pub async fn clear(&self) {
        self.listeners.write().await.clear();
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(MAX_LISTENERS, LISTENER_BUFFER)
    }
}

/// Listener whose transport is up but which is not yet registered.
pub struct PendingListener {
    id: ListenerId,
    registry: ListenerRegistry,
}

impl PendingListener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn state(&self) -> ListenerState {
        ListenerState::Connecting
    }

    /// Registers the listener, moving it to `Open`. Fails when the registry
    /// is at capacity; the listener never opens in that case.
    pub async fn open(self) -> Result<TelemetrySubscription, TelemetryError> {
        self.registry.register(self.id).await
    }
}

/// Receiving end of one listener's queue.
pub struct TelemetrySubscription {
    id: ListenerId,
    rx: mpsc::Receiver<Arc<str>>,
    state: ListenerState,
    registry: ListenerRegistry,
}

impl TelemetrySubscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Next serialized snapshot, or `None` once the listener is closed.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        if self.state == ListenerState::Closed {
            return None;
        }
        let next = self.rx.recv().await;
        if next.is_none() {
            self.state = ListenerState::Closed;
        }
        next
    }

    /// Unregisters the listener.
    pub async fn close(mut self) {
        self.state = ListenerState::Closed;
        self.rx.close();
        self.registry.unsubscribe(self.id).await;
    }
}
