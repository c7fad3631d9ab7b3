//! Telemetry WebSocket connections.
//!
//! Each connection starts as a connecting listener and opens once the
//! registry has room for it. A writer loop forwards queued
//! snapshots with a per-write timeout; a reader task watches for the peer
//! going away. Whichever ends first tears the connection down and the
//! listener is unregistered.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::AppState;

/// Close code sent when the listener cap is reached ("try again later").
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

pub(super) async fn telemetry_endpoint(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_telemetry_socket(socket, state))
}

async fn handle_telemetry_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let pending = state.listeners.accept();
    let mut subscription = match pending.open().await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Rejecting telemetry listener");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_TRY_AGAIN_LATER,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };
    let listener_id = subscription.id();

    let (mut sender, mut receiver) = socket.split();

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(other) => trace!(?other, "Ignoring client message"),
                Err(e) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            next = subscription.recv() => {
                let Some(payload) = next else {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                match timeout(state.write_timeout, sender.send(Message::Text(payload.to_string()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(listener_id, error = %e, "Telemetry write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(
                            listener_id,
                            timeout_ms = state.write_timeout.as_millis() as u64,
                            "Telemetry write timed out"
                        );
                        break;
                    }
                }
            }

            _ = &mut recv_task => {
                break;
            }
        }
    }

    recv_task.abort();
    subscription.close().await;
    debug!(listener_id, "Telemetry connection closed");
}
