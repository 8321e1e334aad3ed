use huddle_core::protocol::OutboundEvent;

use crate::registry::ConnectionRegistry;
use crate::transport::Transport;

/// Send the current online-user list to every open connection, authenticated
/// or not. Each call is a full snapshot that replaces what clients held.
pub fn publish_presence<T: Transport + ?Sized>(registry: &ConnectionRegistry, transport: &T) {
    let online = registry.list_user_ids();
    tracing::debug!(online = online.len(), "Publishing presence");
    transport.broadcast(&OutboundEvent::OnlineUsers(online), None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ClientRegistry;
    use huddle_core::ids::ConnectionId;
    use serde_json::json;

    #[test]
    fn presence_reaches_unauthenticated_connections() {
        let transport = ClientRegistry::new(32);
        let (authed, mut rx_authed) = transport.register();
        let (_anon, mut rx_anon) = transport.register();

        let mut registry = ConnectionRegistry::new();
        registry.register(authed, &json!({"id": "u1"}));
        registry.register(ConnectionId::from_raw("elsewhere"), &json!({}));

        publish_presence(&registry, &transport);

        for rx in [&mut rx_authed, &mut rx_anon] {
            let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["event"], "onlineUsers");
            assert_eq!(frame["data"], json!(["u1", null]));
        }
    }
}
