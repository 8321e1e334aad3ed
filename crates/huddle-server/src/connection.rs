use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use huddle_core::ids::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hub::HubEvent;
use crate::transport::ClientRegistry;

/// Per-connection liveness settings.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionOptions {
    /// How often the writer pings the client.
    pub heartbeat_interval: Duration,
    /// A client that sends nothing (not even a pong) for this long is dropped.
    pub client_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
        }
    }
}

/// Drive one WebSocket: a writer task drains the connection's outbound queue
/// and pings, a reader task forwards text frames to the hub. When either
/// side ends the connection is unregistered and the hub is told.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    hub: mpsc::Sender<HubEvent>,
    options: ConnectionOptions,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if hub.send(HubEvent::Connected(connection_id.clone())).await.is_err() {
        registry.unregister(&connection_id);
        return;
    }

    let writer_cid = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(options.heartbeat_interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "Sent ping");
                }
                () = shutdown.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_cid = connection_id.clone();
    let reader_hub = hub.clone();
    let mut reader = tokio::spawn(async move {
        loop {
            let next = match tokio::time::timeout(options.client_timeout, ws_rx.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::info!(connection_id = %reader_cid, "Client timed out");
                    break;
                }
            };
            match next {
                Some(Ok(WsMessage::Text(text))) => {
                    let event = HubEvent::Frame {
                        connection_id: reader_cid.clone(),
                        raw: text.to_string(),
                    };
                    if reader_hub.send(event).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                // Pings are answered by axum; pongs only refresh the timeout.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = reader_hub
                        .send(HubEvent::TransportError {
                            connection_id: reader_cid.clone(),
                            error: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    });

    // The aborted task must be gone before `Disconnected` is queued, or a
    // frame it was still sending could reach the hub afterwards.
    tokio::select! {
        _ = &mut writer => {
            reader.abort();
            let _ = reader.await;
        }
        _ = &mut reader => {
            writer.abort();
            let _ = writer.await;
        }
    }

    registry.unregister(&connection_id);
    let _ = hub.send(HubEvent::Disconnected(connection_id)).await;
}
