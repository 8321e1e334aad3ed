use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use huddle_core::ids::ConnectionId;
use huddle_core::protocol::OutboundEvent;
use tokio::sync::mpsc;

/// Outbound half of the messaging transport, as seen by the relay logic.
///
/// Every method is synchronous and fire-and-forget: delivery is queued and
/// never awaited.
pub trait Transport {
    /// Deliver to a single connection. `false` when the connection is gone
    /// or its send queue is full.
    fn send(&self, to: &ConnectionId, event: &OutboundEvent) -> bool;

    /// Deliver to every open connection, optionally skipping one.
    fn broadcast(&self, event: &OutboundEvent, except: Option<&ConnectionId>);

    /// Deliver to every connection joined to `room`, optionally skipping one.
    /// Returns the number of connections the event was queued for.
    fn send_to_room(&self, room: &str, event: &OutboundEvent, except: Option<&ConnectionId>)
        -> usize;

    /// Add a connection to a named room. Unknown connections are ignored.
    fn join_room(&self, room: &str, connection: &ConnectionId);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, to: &ConnectionId, event: &OutboundEvent) -> bool {
        (**self).send(to, event)
    }

    fn broadcast(&self, event: &OutboundEvent, except: Option<&ConnectionId>) {
        (**self).broadcast(event, except);
    }

    fn send_to_room(
        &self,
        room: &str,
        event: &OutboundEvent,
        except: Option<&ConnectionId>,
    ) -> usize {
        (**self).send_to_room(room, event, except)
    }

    fn join_room(&self, room: &str, connection: &ConnectionId) {
        (**self).join_room(room, connection);
    }
}

/// A connected WebSocket client.
struct Client {
    tx: mpsc::Sender<String>,
    rooms: HashSet<String>,
    connected_at: DateTime<Utc>,
}

/// Registry of all open WebSocket connections and the rooms they joined.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Client>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection and return its ID + outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(
            id.clone(),
            Client {
                tx,
                rooms: HashSet::new(),
                connected_at: Utc::now(),
            },
        );
        (id, rx)
    }

    /// Remove a connection and drop it from every room it joined.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let Some((_, client)) = self.clients.remove(id) else {
            return false;
        };
        for room in &client.rooms {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(id);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        tracing::debug!(
            connection_id = %id,
            connected_for_secs = (Utc::now() - client.connected_at).num_seconds(),
            "Connection unregistered"
        );
        true
    }

    /// Queue a raw text frame. Drops the frame if the queue is full.
    pub fn send_raw(&self, id: &ConnectionId, message: String) -> bool {
        let Some(tx) = self.clients.get(id).map(|c| c.tx.clone()) else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of open connections.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    /// Members of a room, in no particular order.
    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn encode(event: &OutboundEvent) -> Option<String> {
    match event.encode() {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(event = event.name(), error = %e, "Failed to encode event");
            None
        }
    }
}

impl Transport for ClientRegistry {
    fn send(&self, to: &ConnectionId, event: &OutboundEvent) -> bool {
        match encode(event) {
            Some(json) => self.send_raw(to, json),
            None => false,
        }
    }

    fn broadcast(&self, event: &OutboundEvent, except: Option<&ConnectionId>) {
        let Some(json) = encode(event) else {
            return;
        };
        let targets: Vec<ConnectionId> = self
            .clients
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| Some(id) != except)
            .collect();
        for id in &targets {
            self.send_raw(id, json.clone());
        }
        tracing::trace!(event = event.name(), recipients = targets.len(), "Broadcast event");
    }

    fn send_to_room(
        &self,
        room: &str,
        event: &OutboundEvent,
        except: Option<&ConnectionId>,
    ) -> usize {
        let members: Vec<ConnectionId> = self
            .room_members(room)
            .into_iter()
            .filter(|id| Some(id) != except)
            .collect();
        if members.is_empty() {
            return 0;
        }
        let Some(json) = encode(event) else {
            return 0;
        };
        members
            .iter()
            .filter(|id| self.send_raw(id, json.clone()))
            .count()
    }

    fn join_room(&self, room: &str, connection: &ConnectionId) {
        match self.clients.get_mut(connection) {
            Some(mut client) => {
                client.rooms.insert(room.to_string());
            }
            None => return,
        }
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection.clone());
    }
}
