use huddle_core::ids::ConnectionId;
use huddle_core::protocol::OutboundEvent;

use crate::registry::ConnectionRegistry;
use crate::transport::Transport;

/// Resolves logical destinations to live connections.
///
/// A connection never receives its own relay: a destination that resolves
/// back to the sender counts as a miss. Misses are silent.
pub struct Router<'a, T: ?Sized> {
    registry: &'a ConnectionRegistry,
    transport: &'a T,
}

impl<'a, T: Transport + ?Sized> Router<'a, T> {
    pub fn new(registry: &'a ConnectionRegistry, transport: &'a T) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub fn registry(&self) -> &'a ConnectionRegistry {
        self.registry
    }

    pub fn transport(&self) -> &'a T {
        self.transport
    }

    /// Deliver to the first session registered under `user_id`.
    pub fn send_to_user(&self, user_id: &str, event: &OutboundEvent, sender: &ConnectionId) -> bool {
        let Some(session) = self.registry.find_by_user_id(user_id) else {
            tracing::debug!(user_id, event = event.name(), "Recipient offline, dropping");
            return false;
        };
        if &session.connection_id == sender {
            return false;
        }
        self.transport.send(&session.connection_id, event)
    }

    /// Deliver to everyone joined to the room named `group_id`, whether or
    /// not a group record exists for it.
    pub fn send_to_group(&self, group_id: &str, event: &OutboundEvent, sender: &ConnectionId) -> usize {
        self.transport.send_to_room(group_id, event, Some(sender))
    }

    /// Deliver straight to a connection id supplied by a client.
    pub fn send_to_connection(
        &self,
        target: &str,
        event: &OutboundEvent,
        sender: &ConnectionId,
    ) -> bool {
        if target == sender.as_str() {
            return false;
        }
        let delivered = self.transport.send(&ConnectionId::from_raw(target), event);
        if !delivered {
            tracing::debug!(
                target_connection = target,
                event = event.name(),
                "Target connection not found, dropping"
            );
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ClientRegistry;
    use serde_json::json;

    fn ping() -> OutboundEvent {
        OutboundEvent::NewMessage(json!({"text": "hi"}))
    }

    #[test]
    fn send_to_user_online_and_offline() {
        let transport = ClientRegistry::new(32);
        let (sender, mut rx_sender) = transport.register();
        let (bob, mut rx_bob) = transport.register();

        let mut registry = ConnectionRegistry::new();
        registry.register(sender.clone(), &json!({"id": "alice"}));
        registry.register(bob, &json!({"id": "bob"}));

        let router = Router::new(&registry, &transport);
        assert!(router.send_to_user("bob", &ping(), &sender));
        assert!(rx_bob.try_recv().is_ok());

        assert!(!router.send_to_user("carol", &ping(), &sender));
        assert!(rx_sender.try_recv().is_err());
    }

    #[test]
    fn send_to_self_is_a_miss() {
        let transport = ClientRegistry::new(32);
        let (alice, mut rx) = transport.register();
        let mut registry = ConnectionRegistry::new();
        registry.register(alice.clone(), &json!({"id": "alice"}));

        let router = Router::new(&registry, &transport);
        assert!(!router.send_to_user("alice", &ping(), &alice));
        assert!(!router.send_to_connection(alice.as_str(), &ping(), &alice));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_to_group_ignores_directory() {
        let transport = ClientRegistry::new(32);
        let (a, _rx_a) = transport.register();
        let (b, mut rx_b) = transport.register();
        transport.join_room("not-a-registered-group", &b);

        let registry = ConnectionRegistry::new();
        let router = Router::new(&registry, &transport);
        assert_eq!(router.send_to_group("not-a-registered-group", &ping(), &a), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn send_to_connection_direct() {
        let transport = ClientRegistry::new(32);
        let (a, _rx_a) = transport.register();
        let (b, mut rx_b) = transport.register();

        let registry = ConnectionRegistry::new();
        let router = Router::new(&registry, &transport);
        assert!(router.send_to_connection(b.as_str(), &ping(), &a));
        assert!(rx_b.try_recv().is_ok());
        assert!(!router.send_to_connection("conn_gone", &ping(), &a));
    }
}
