//! Call signaling relay.
//!
//! There is no server-side call record. Each message is relayed on its own
//! resolution rule:
//!
//! - `initiateCall` resolves the callee by display name (`contactName`),
//!   since the dialing UI only knows the contact's name at that point.
//! - `acceptCall` / `rejectCall` go straight to the connection in `callerId`.
//! - `offer` / `answer` / `ice-candidate` go straight to the connection in
//!   `target`.
//! - `callEnded` goes to everyone except the sender.
//!
//! Nothing is validated across messages; an accept with no preceding
//! initiate is relayed like any other.

use huddle_core::ids::ConnectionId;
use huddle_core::protocol::{optional_field, routing_str, with_fields, OutboundEvent};
use serde_json::Value;

use crate::router::Router;
use crate::transport::Transport;

pub struct CallSignaling<'a, T: ?Sized> {
    router: Router<'a, T>,
}

impl<'a, T: Transport + ?Sized> CallSignaling<'a, T> {
    pub fn new(router: Router<'a, T>) -> Self {
        Self { router }
    }

    /// Ring the callee and acknowledge the caller. The acknowledgement is
    /// sent whether or not anyone was found.
    pub fn initiate(&self, caller: &ConnectionId, call: &Value) -> bool {
        let callee = routing_str(call, "contactName")
            .and_then(|name| self.router.registry().find_by_display_name(name));

        let rang = match callee {
            Some(session) if &session.connection_id != caller => {
                let caller_name = self
                    .router
                    .registry()
                    .get(caller)
                    .and_then(|s| s.display_name.clone());
                let mut extra = vec![(
                    "callerId".to_string(),
                    Value::String(caller.to_string()),
                )];
                if let Some(name) = caller_name {
                    extra.push(("callerName".to_string(), Value::String(name)));
                }
                let incoming = OutboundEvent::IncomingCall(with_fields(call, extra));
                self.router.transport().send(&session.connection_id, &incoming)
            }
            _ => false,
        };

        tracing::info!(caller = %caller, rang, "Call initiated");
        self.router
            .transport()
            .send(caller, &OutboundEvent::CallInitiated(call.clone()));
        rang
    }

    pub fn accept(&self, from: &ConnectionId, call: &Value) -> bool {
        tracing::info!(from = %from, "Call accepted");
        self.to_caller(from, call, OutboundEvent::CallAccepted(call.clone()))
    }

    pub fn reject(&self, from: &ConnectionId, call: &Value) -> bool {
        tracing::info!(from = %from, "Call rejected");
        self.to_caller(from, call, OutboundEvent::CallRejected(call.clone()))
    }

    pub fn end(&self, from: &ConnectionId, call: &Value) {
        tracing::info!(from = %from, "Call ended");
        self.router
            .transport()
            .broadcast(&OutboundEvent::CallEnded(call.clone()), Some(from));
    }

    pub fn offer(&self, from: &ConnectionId, data: &Value) -> bool {
        self.to_target(
            from,
            data,
            OutboundEvent::Offer {
                offer: optional_field(data, "offer"),
                caller: from.clone(),
            },
        )
    }

    pub fn answer(&self, from: &ConnectionId, data: &Value) -> bool {
        self.to_target(
            from,
            data,
            OutboundEvent::Answer {
                answer: optional_field(data, "answer"),
                answerer: from.clone(),
            },
        )
    }

    pub fn ice_candidate(&self, from: &ConnectionId, data: &Value) -> bool {
        self.to_target(
            from,
            data,
            OutboundEvent::IceCandidate {
                candidate: optional_field(data, "candidate"),
                sender: from.clone(),
            },
        )
    }

    fn to_caller(&self, from: &ConnectionId, call: &Value, event: OutboundEvent) -> bool {
        routing_str(call, "callerId")
            .is_some_and(|caller| self.router.send_to_connection(caller, &event, from))
    }

    fn to_target(&self, from: &ConnectionId, data: &Value, event: OutboundEvent) -> bool {
        routing_str(data, "target")
            .is_some_and(|target| self.router.send_to_connection(target, &event, from))
    }
}
