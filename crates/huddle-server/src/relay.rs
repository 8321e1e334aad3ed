//! Connection lifecycle handling: turns transport events into registry,
//! presence, routing, group and signaling operations.

use std::collections::HashSet;

use huddle_core::ids::ConnectionId;
use huddle_core::protocol::{optional_field, routing_str, InboundEvent, OutboundEvent};
use serde::Serialize;
use serde_json::Value;

use crate::groups::GroupDirectory;
use crate::presence::publish_presence;
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use crate::signaling::CallSignaling;
use crate::transport::Transport;

const STATUS_MESSAGE: &str = "Huddle relay server is running";

/// Read-only snapshot served by the status endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub message: String,
    pub connected_users: usize,
    pub active_rooms: usize,
}

/// Owns all relay state. Every handler runs to completion without awaiting,
/// so a single owner needs no locking.
pub struct Relay<T> {
    registry: ConnectionRegistry,
    groups: GroupDirectory,
    open: HashSet<ConnectionId>,
    transport: T,
}

impl<T: Transport> Relay<T> {
    pub fn new(transport: T) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            groups: GroupDirectory::new(),
            open: HashSet::new(),
            transport,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn groups(&self) -> &GroupDirectory {
        &self.groups
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            message: STATUS_MESSAGE.to_string(),
            connected_users: self.registry.len(),
            active_rooms: self.groups.len(),
        }
    }

    /// A new connection. It stays unauthenticated until `authenticate`.
    pub fn on_connect(&mut self, connection_id: ConnectionId) {
        tracing::info!(connection_id = %connection_id, "Client connected");
        self.open.insert(connection_id);
    }

    /// Decode and dispatch one text frame. Undecodable frames are dropped.
    pub fn on_frame(&mut self, connection_id: &ConnectionId, raw: &str) {
        match InboundEvent::decode(raw) {
            Ok(event) => self.on_event(connection_id, event),
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    kind = e.error_kind(),
                    error = %e,
                    "Dropping undecodable frame"
                );
            }
        }
    }

    /// Events from connections that are not open (never connected, or
    /// already disconnected) are dropped.
    pub fn on_event(&mut self, connection_id: &ConnectionId, event: InboundEvent) {
        if !self.open.contains(connection_id) {
            tracing::debug!(
                connection_id = %connection_id,
                event = event.name(),
                "Dropping event from closed connection"
            );
            return;
        }
        tracing::debug!(connection_id = %connection_id, event = event.name(), "Inbound event");
        match event {
            InboundEvent::Authenticate(user_data) => self.authenticate(connection_id, &user_data),
            InboundEvent::JoinRoom(room) => {
                self.transport.join_room(&room, connection_id);
                tracing::info!(connection_id = %connection_id, room = %room, "Joined room");
            }
            InboundEvent::SendMessage(message) => self.send_message(connection_id, message),
            InboundEvent::UserTyping(data) => self.user_typing(connection_id, &data),
            InboundEvent::CreateGroup(group_data) => {
                let router = Router::new(&self.registry, &self.transport);
                self.groups.create_group(connection_id, &group_data, &router);
            }
            InboundEvent::InitiateCall(call) => {
                self.signaling().initiate(connection_id, &call);
            }
            InboundEvent::AcceptCall(call) => {
                self.signaling().accept(connection_id, &call);
            }
            InboundEvent::RejectCall(call) => {
                self.signaling().reject(connection_id, &call);
            }
            InboundEvent::CallEnded(call) => self.signaling().end(connection_id, &call),
            InboundEvent::Offer(data) => {
                self.signaling().offer(connection_id, &data);
            }
            InboundEvent::Answer(data) => {
                self.signaling().answer(connection_id, &data);
            }
            InboundEvent::IceCandidate(data) => {
                self.signaling().ice_candidate(connection_id, &data);
            }
        }
    }

    /// Remove the connection's session and republish presence. Only the
    /// first disconnect of a connection has any effect.
    pub fn on_disconnect(&mut self, connection_id: &ConnectionId) {
        if !self.open.remove(connection_id) {
            return;
        }
        let session = self.registry.remove(connection_id);
        tracing::info!(
            connection_id = %connection_id,
            user_id = session.as_ref().and_then(|s| s.user_id.as_ref()).map(|u| u.as_str()),
            "Client disconnected"
        );
        publish_presence(&self.registry, &self.transport);
    }

    pub fn on_transport_error(&self, connection_id: &ConnectionId, error: &str) {
        tracing::error!(connection_id = %connection_id, error, "Socket error");
    }

    fn signaling(&self) -> CallSignaling<'_, T> {
        CallSignaling::new(Router::new(&self.registry, &self.transport))
    }

    fn authenticate(&mut self, connection_id: &ConnectionId, user_data: &Value) {
        let session = self.registry.register(connection_id.clone(), user_data);
        tracing::info!(
            connection_id = %connection_id,
            user_id = session.user_id.as_ref().map(|u| u.as_str()),
            name = session.display_name.as_deref(),
            "User authenticated"
        );
        publish_presence(&self.registry, &self.transport);
    }

    /// Group messages go to the room, direct messages to the receiver; the
    /// sender always gets a delivery echo, even when nothing was delivered.
    fn send_message(&mut self, connection_id: &ConnectionId, message: Value) {
        let router = Router::new(&self.registry, &self.transport);
        let relayed = OutboundEvent::NewMessage(message.clone());
        if let Some(group_id) = routing_str(&message, "groupId") {
            router.send_to_group(group_id, &relayed, connection_id);
        } else if let Some(receiver_id) = routing_str(&message, "receiverId") {
            router.send_to_user(receiver_id, &relayed, connection_id);
        }
        self.transport
            .send(connection_id, &OutboundEvent::MessageDelivered(message));
    }

    fn user_typing(&self, connection_id: &ConnectionId, data: &Value) {
        let Some(session) = self.registry.get(connection_id) else {
            return;
        };
        let Some(receiver_id) = routing_str(data, "receiverId") else {
            return;
        };
        let router = Router::new(&self.registry, &self.transport);
        router.send_to_user(
            receiver_id,
            &OutboundEvent::UserTyping {
                user_id: session.profile.get("id").cloned(),
                is_typing: optional_field(data, "isTyping"),
            },
            connection_id,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ClientRegistry;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Peer {
        id: ConnectionId,
        rx: mpsc::Receiver<String>,
    }

    impl Peer {
        fn frames(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(serde_json::from_str(&msg).unwrap());
            }
            out
        }

        fn events(&mut self, name: &str) -> Vec<Value> {
            self.frames()
                .into_iter()
                .filter(|f| f["event"] == name)
                .map(|f| f["data"].clone())
                .collect()
        }
    }

    fn setup() -> (Relay<Arc<ClientRegistry>>, Arc<ClientRegistry>) {
        let transport = Arc::new(ClientRegistry::new(64));
        (Relay::new(Arc::clone(&transport)), transport)
    }

    fn connect(relay: &mut Relay<Arc<ClientRegistry>>, transport: &ClientRegistry) -> Peer {
        let (id, rx) = transport.register();
        relay.on_connect(id.clone());
        Peer { id, rx }
    }

    fn disconnect(relay: &mut Relay<Arc<ClientRegistry>>, transport: &ClientRegistry, peer: &Peer) {
        transport.unregister(&peer.id);
        relay.on_disconnect(&peer.id);
    }

    fn auth(relay: &mut Relay<Arc<ClientRegistry>>, peer: &Peer, id: &str, name: &str) {
        relay.on_event(&peer.id, InboundEvent::Authenticate(json!({"id": id, "name": name})));
    }

    #[test]
    fn presence_follows_every_authenticate() {
        let (mut relay, transport) = setup();
        let mut a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        let mut c = connect(&mut relay, &transport);

        auth(&mut relay, &a, "ua", "A");
        for peer in [&mut a, &mut b, &mut c] {
            assert_eq!(peer.events("onlineUsers"), vec![json!(["ua"])]);
        }

        auth(&mut relay, &c, "uc", "C");
        auth(&mut relay, &b, "ub", "B");
        for peer in [&mut a, &mut b, &mut c] {
            assert_eq!(
                peer.events("onlineUsers"),
                vec![json!(["ua", "uc"]), json!(["ua", "uc", "ub"])]
            );
        }
    }

    #[test]
    fn disconnect_removes_only_that_session() {
        let (mut relay, transport) = setup();
        let a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        auth(&mut relay, &a, "ua", "A");
        auth(&mut relay, &b, "ub", "B");
        b.frames();

        disconnect(&mut relay, &transport, &a);
        assert_eq!(relay.registry().len(), 1);
        assert!(relay.registry().find_by_user_id("ub").is_some());
        assert_eq!(b.events("onlineUsers"), vec![json!(["ub"])]);
    }

    #[test]
    fn second_disconnect_is_a_noop() {
        let (mut relay, transport) = setup();
        let a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        auth(&mut relay, &a, "ua", "A");
        b.frames();

        disconnect(&mut relay, &transport, &a);
        assert_eq!(b.events("onlineUsers").len(), 1);

        relay.on_disconnect(&a.id);
        assert!(b.frames().is_empty());
        assert_eq!(relay.registry().len(), 0);
    }

    #[test]
    fn late_frame_after_disconnect_is_ignored() {
        let (mut relay, transport) = setup();
        let a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        auth(&mut relay, &b, "ub", "B");
        b.frames();

        disconnect(&mut relay, &transport, &a);
        b.frames();

        relay.on_frame(
            &a.id,
            r#"{"event":"authenticate","data":{"id":"ghost","name":"Ghost"}}"#,
        );
        assert_eq!(relay.registry().len(), 1);
        assert!(relay.registry().find_by_user_id("ghost").is_none());
        assert!(b.frames().is_empty());

        relay.on_disconnect(&a.id);
        assert_eq!(relay.status().connected_users, 1);
    }

    #[test]
    fn events_from_unknown_connection_are_ignored() {
        let (mut relay, transport) = setup();
        let mut b = connect(&mut relay, &transport);
        let (stray, _rx) = transport.register();

        relay.on_event(&stray, InboundEvent::Authenticate(json!({"id": "stray"})));
        relay.on_event(&stray, InboundEvent::SendMessage(json!({"receiverId": "ub"})));
        assert_eq!(relay.registry().len(), 0);
        assert!(b.frames().is_empty());
    }

    #[test]
    fn unauthenticated_disconnect_still_publishes() {
        let (mut relay, transport) = setup();
        let a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);

        disconnect(&mut relay, &transport, &a);
        assert_eq!(b.events("onlineUsers"), vec![json!([])]);
    }

    #[test]
    fn direct_message_to_online_user() {
        let (mut relay, transport) = setup();
        let mut a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        let mut c = connect(&mut relay, &transport);
        auth(&mut relay, &a, "ua", "A");
        auth(&mut relay, &b, "ub", "B");
        auth(&mut relay, &c, "uc", "C");
        a.frames();
        b.frames();
        c.frames();

        let message = json!({"receiverId": "ub", "text": "hello"});
        relay.on_event(&a.id, InboundEvent::SendMessage(message.clone()));

        assert_eq!(b.events("newMessage"), vec![message.clone()]);
        assert!(c.frames().is_empty());
        let echo = a.frames();
        assert_eq!(echo.len(), 1);
        assert_eq!(echo[0]["event"], "messageDelivered");
        assert_eq!(echo[0]["data"], message);
    }

    #[test]
    fn direct_message_to_offline_user_still_echoes() {
        let (mut relay, transport) = setup();
        let mut a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        auth(&mut relay, &a, "ua", "A");
        auth(&mut relay, &b, "ub", "B");
        a.frames();
        b.frames();

        let message = json!({"receiverId": "ghost", "text": "anyone?"});
        relay.on_event(&a.id, InboundEvent::SendMessage(message.clone()));
        assert!(b.frames().is_empty());
        assert_eq!(a.events("messageDelivered"), vec![message]);
    }

    #[test]
    fn empty_message_is_echoed_verbatim() {
        let (mut relay, transport) = setup();
        let mut a = connect(&mut relay, &transport);
        relay.on_event(&a.id, InboundEvent::SendMessage(json!({})));
        assert_eq!(a.events("messageDelivered"), vec![json!({})]);
    }

    #[test]
    fn group_message_goes_to_room_except_sender() {
        let (mut relay, transport) = setup();
        let mut a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        let mut c = connect(&mut relay, &transport);
        relay.on_event(&a.id, InboundEvent::JoinRoom("room-1".into()));
        relay.on_event(&b.id, InboundEvent::JoinRoom("room-1".into()));

        let message = json!({"groupId": "room-1", "receiverId": "uc", "text": "hey"});
        relay.on_event(&a.id, InboundEvent::SendMessage(message.clone()));

        assert_eq!(b.events("newMessage"), vec![message.clone()]);
        assert!(c.frames().is_empty());
        assert_eq!(a.frames().len(), 1);
    }

    #[test]
    fn typing_requires_authenticated_sender() {
        let (mut relay, transport) = setup();
        let anon = connect(&mut relay, &transport);
        let a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        auth(&mut relay, &a, "ua", "A");
        auth(&mut relay, &b, "ub", "B");
        b.frames();

        relay.on_event(
            &anon.id,
            InboundEvent::UserTyping(json!({"receiverId": "ub", "isTyping": true})),
        );
        assert!(b.frames().is_empty());

        relay.on_event(
            &a.id,
            InboundEvent::UserTyping(json!({"receiverId": "ub", "isTyping": true})),
        );
        assert_eq!(
            b.events("userTyping"),
            vec![json!({"userId": "ua", "isTyping": true})]
        );

        relay.on_event(&a.id, InboundEvent::UserTyping(json!({"isTyping": false})));
        assert!(b.frames().is_empty());
    }

    #[test]
    fn numeric_ids_are_published_as_sent() {
        let (mut relay, transport) = setup();
        let mut a = connect(&mut relay, &transport);
        relay.on_event(&a.id, InboundEvent::Authenticate(json!({"id": 42, "name": "N"})));
        assert_eq!(a.events("onlineUsers"), vec![json!([42])]);
    }

    #[test]
    fn explicit_null_fields_are_relayed() {
        let (mut relay, transport) = setup();
        let a = connect(&mut relay, &transport);
        let mut b = connect(&mut relay, &transport);
        auth(&mut relay, &a, "ua", "A");
        auth(&mut relay, &b, "ub", "B");
        b.frames();

        relay.on_event(
            &a.id,
            InboundEvent::UserTyping(json!({"receiverId": "ub", "isTyping": null})),
        );
        assert_eq!(
            b.events("userTyping"),
            vec![json!({"userId": "ua", "isTyping": null})]
        );

        relay.on_event(
            &a.id,
            InboundEvent::IceCandidate(json!({"target": b.id.as_str(), "candidate": null})),
        );
        assert_eq!(
            b.events("ice-candidate"),
            vec![json!({"candidate": null, "sender": a.id.as_str()})]
        );
    }

    #[test]
    fn initiate_call_by_display_name() {
        let (mut relay, transport) = setup();
        let mut a = connect(&mut relay, &transport);
        let mut bob = connect(&mut relay, &transport);
        auth(&mut relay, &a, "ua", "Alice");
        auth(&mut relay, &bob, "ub", "Bob");
        a.frames();
        bob.frames();

        let call = json!({"contactName": "Bob", "kind": "audio"});
        relay.on_event(&a.id, InboundEvent::InitiateCall(call.clone()));

        let incoming = bob.events("incomingCall");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0]["callerId"], a.id.as_str());
        assert_eq!(incoming[0]["callerName"], "Alice");
        assert_eq!(a.events("callInitiated"), vec![call]);
    }

    #[test]
    fn create_group_with_online_and_offline_members() {
        let (mut relay, transport) = setup();
        let mut creator = connect(&mut relay, &transport);
        let mut a = connect(&mut relay, &transport);
        auth(&mut relay, &creator, "owner", "Owner");
        auth(&mut relay, &a, "ua", "A");
        creator.frames();
        a.frames();
        assert_eq!(relay.groups().len(), 0);

        relay.on_event(
            &creator.id,
            InboundEvent::CreateGroup(json!({"name": "g", "members": ["ua", "ub"]})),
        );

        assert_eq!(relay.groups().len(), 1);
        let to_a = a.events("groupCreated");
        assert_eq!(to_a.len(), 1);
        let echo = creator.events("groupCreated");
        assert_eq!(echo.len(), 1);
        assert!(echo[0]["id"].as_str().unwrap().starts_with("group_"));
        assert_eq!(echo[0]["id"], to_a[0]["id"]);

        // The creator is in the room; other members are not.
        let group_id = echo[0]["id"].as_str().unwrap().to_string();
        relay.on_event(
            &a.id,
            InboundEvent::SendMessage(json!({"groupId": group_id, "text": "hi"})),
        );
        assert_eq!(creator.events("newMessage").len(), 1);
    }

    #[test]
    fn offer_is_delivered_to_target_only() {
        let (mut relay, transport) = setup();
        let mut s = connect(&mut relay, &transport);
        let mut x = connect(&mut relay, &transport);
        let mut y = connect(&mut relay, &transport);

        relay.on_event(
            &s.id,
            InboundEvent::Offer(json!({"target": x.id.as_str(), "offer": {"sdp": "v=0"}})),
        );
        assert_eq!(
            x.events("offer"),
            vec![json!({"offer": {"sdp": "v=0"}, "caller": s.id.as_str()})]
        );
        assert!(y.frames().is_empty());
        assert!(s.frames().is_empty());
    }

    #[test]
    fn accept_without_initiate_is_relayed() {
        let (mut relay, transport) = setup();
        let mut caller = connect(&mut relay, &transport);
        let callee = connect(&mut relay, &transport);

        let call = json!({"callerId": caller.id.as_str()});
        relay.on_event(&callee.id, InboundEvent::AcceptCall(call.clone()));
        assert_eq!(caller.events("callAccepted"), vec![call]);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (mut relay, transport) = setup();
        let mut a = connect(&mut relay, &transport);
        relay.on_frame(&a.id, "{not json");
        relay.on_frame(&a.id, r#"{"event":"explode","data":{}}"#);
        assert!(a.frames().is_empty());

        relay.on_frame(&a.id, r#"{"event":"sendMessage","data":{"text":"x"}}"#);
        assert_eq!(a.events("messageDelivered").len(), 1);
    }

    #[test]
    fn status_reports_sessions_and_groups() {
        let (mut relay, transport) = setup();
        let a = connect(&mut relay, &transport);
        let _b = connect(&mut relay, &transport);
        auth(&mut relay, &a, "ua", "A");
        relay.on_event(&a.id, InboundEvent::CreateGroup(json!({})));

        let status = relay.status();
        assert_eq!(status.connected_users, 1);
        assert_eq!(status.active_rooms, 1);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["connectedUsers"], 1);
        assert_eq!(json["activeRooms"], 1);
        assert_eq!(json["message"], STATUS_MESSAGE);
    }
}
