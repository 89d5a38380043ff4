//! Generic long-lived stream worker: connect, authenticate-free message
//! loop, reconnect with backoff, clean shutdown.
//!
//! All three event streams (orders, positions, quotes) share this worker
//! shape. Parsing and business logic live downstream of the raw text
//! channel this module produces; the worker itself only owns the
//! connection lifecycle.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::reconnect::ReconnectPolicy;
use super::types::{StreamConfig, StreamState};

/// A running stream worker: a channel of raw text frames plus the
/// observable connection state.
pub struct StreamHandle {
    /// Raw text frames received from the stream, in order.
    pub messages: mpsc::Receiver<String>,
    /// Current connection state, updated by the background task.
    pub state: Arc<RwLock<StreamState>>,
    /// Timestamp of the most recent successful (re)connect, `None` until
    /// the first connection succeeds.
    pub last_connected: Arc<RwLock<Option<chrono::DateTime<chrono::Utc>>>>,
    /// Fires every time a connection (including a reconnect) is newly
    /// established. Callers that must publish a reconnect barrier
    /// (`spec.md` §4.1) subscribe to this rather than polling `state`.
    pub connected: Arc<tokio::sync::Notify>,
}

/// Spawns a stream worker against `config`, running until `shutdown` is
/// cancelled.
pub fn spawn_stream(config: StreamConfig, shutdown: CancellationToken) -> StreamHandle {
    let (tx, rx) = mpsc::channel(1024);
    let state = Arc::new(RwLock::new(StreamState::Disconnected));
    let last_connected = Arc::new(RwLock::new(None));
    let connected = Arc::new(tokio::sync::Notify::new());

    let task_state = Arc::clone(&state);
    let task_last_connected = Arc::clone(&last_connected);
    let task_connected = Arc::clone(&connected);
    tokio::spawn(run_stream(config, shutdown, tx, task_state, task_last_connected, task_connected));

    StreamHandle {
        messages: rx,
        state,
        last_connected,
        connected,
    }
}

async fn run_stream(
    config: StreamConfig,
    shutdown: CancellationToken,
    tx: mpsc::Sender<String>,
    state: Arc<RwLock<StreamState>>,
    last_connected: Arc<RwLock<Option<chrono::DateTime<chrono::Utc>>>>,
    connected: Arc<tokio::sync::Notify>,
) {
    let mut reconnect = ReconnectPolicy::new();

    while !shutdown.is_cancelled() {
        *state.write().await = StreamState::Connecting;
        match connect_and_run(&config, &tx, &shutdown, &state, &last_connected, &connected, &mut reconnect).await {
            Ok(()) => {
                // Clean shutdown requested from inside the message loop.
                break;
            }
            Err(error) => {
                tracing::warn!(url = %config.url, %error, "stream connection lost, reconnecting");
            }
        }
        *state.write().await = StreamState::Disconnected;

        let backoff = reconnect.next_backoff();
        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            () = shutdown.cancelled() => break,
        }
    }

    *state.write().await = StreamState::Closing;
}

async fn connect_and_run(
    config: &StreamConfig,
    tx: &mpsc::Sender<String>,
    shutdown: &CancellationToken,
    state: &Arc<RwLock<StreamState>>,
    last_connected: &Arc<RwLock<Option<chrono::DateTime<chrono::Utc>>>>,
    connected: &Arc<tokio::sync::Notify>,
    reconnect: &mut ReconnectPolicy,
) -> Result<(), super::types::StreamError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(&config.url)
        .await
        .map_err(|e| super::types::StreamError::ConnectFailed(e.to_string()))?;

    *state.write().await = StreamState::Connected;
    *last_connected.write().await = Some(chrono::Utc::now());
    connected.notify_waiters();
    // A successful connect clears the backoff schedule, so the next
    // disconnect (possibly hours from now) starts from the initial delay
    // again rather than whatever the last outage escalated to.
    reconnect.reset();

    let (mut write, mut read) = ws_stream.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return Err(super::types::StreamError::ConnectionClosed);
                }
            }
            maybe_msg = read.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        if tx.send(text.to_string()).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(super::types::StreamError::ConnectionClosed);
                    }
                    Some(Err(e)) => {
                        return Err(super::types::StreamError::ConnectFailed(e.to_string()));
                    }
                }
            }
            () = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}
