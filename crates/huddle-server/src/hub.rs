use huddle_core::ids::ConnectionId;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::relay::{Relay, RelayStatus};
use crate::transport::Transport;

/// Everything the hub reacts to, in arrival order.
#[derive(Debug)]
pub enum HubEvent {
    Connected(ConnectionId),
    Frame {
        connection_id: ConnectionId,
        raw: String,
    },
    Disconnected(ConnectionId),
    TransportError {
        connection_id: ConnectionId,
        error: String,
    },
    Status(oneshot::Sender<RelayStatus>),
}

impl<T: Transport> Relay<T> {
    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected(id) => self.on_connect(id),
            HubEvent::Frame { connection_id, raw } => self.on_frame(&connection_id, &raw),
            HubEvent::Disconnected(id) => self.on_disconnect(&id),
            HubEvent::TransportError {
                connection_id,
                error,
            } => self.on_transport_error(&connection_id, &error),
            HubEvent::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }
}

/// Start the hub task. It is the only owner of relay state and processes one
/// event at a time until the channel closes or `shutdown` fires.
pub fn spawn<T>(
    relay: Relay<T>,
    rx: mpsc::Receiver<HubEvent>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    T: Transport + Send + 'static,
{
    tokio::spawn(run(relay, rx, shutdown))
}

async fn run<T: Transport>(
    mut relay: Relay<T>,
    mut rx: mpsc::Receiver<HubEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => relay.handle(event),
                None => break,
            },
            () = shutdown.cancelled() => break,
        }
    }
    tracing::info!(sessions = relay.registry().len(), "Hub stopped");
}
