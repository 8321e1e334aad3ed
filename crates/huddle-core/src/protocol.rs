//! Wire protocol.
//!
//! Every frame in both directions is a JSON envelope `{ event, data }`.
//! Payloads stay as opaque `serde_json::Value`s: the relay only reads the
//! handful of routing fields it needs and forwards everything else untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::ids::ConnectionId;

/// Raw frame as it travels over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Client → server events.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Authenticate(Value),
    JoinRoom(String),
    SendMessage(Value),
    UserTyping(Value),
    InitiateCall(Value),
    AcceptCall(Value),
    RejectCall(Value),
    CallEnded(Value),
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
    CreateGroup(Value),
}

impl InboundEvent {
    /// Decode a text frame into a typed event.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope { event, data } = envelope;
        let decoded = match event.as_str() {
            "authenticate" => Self::Authenticate(data),
            "joinRoom" => match data {
                Value::String(room) => Self::JoinRoom(room),
                other => {
                    return Err(ProtocolError::InvalidPayload {
                        event: "joinRoom",
                        reason: format!("expected room id string, got {other}"),
                    })
                }
            },
            "sendMessage" => Self::SendMessage(data),
            "userTyping" => Self::UserTyping(data),
            "initiateCall" => Self::InitiateCall(data),
            "acceptCall" => Self::AcceptCall(data),
            "rejectCall" => Self::RejectCall(data),
            "callEnded" => Self::CallEnded(data),
            "offer" => Self::Offer(data),
            "answer" => Self::Answer(data),
            "ice-candidate" => Self::IceCandidate(data),
            "createGroup" => Self::CreateGroup(data),
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };
        Ok(decoded)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => "authenticate",
            Self::JoinRoom(_) => "joinRoom",
            Self::SendMessage(_) => "sendMessage",
            Self::UserTyping(_) => "userTyping",
            Self::InitiateCall(_) => "initiateCall",
            Self::AcceptCall(_) => "acceptCall",
            Self::RejectCall(_) => "rejectCall",
            Self::CallEnded(_) => "callEnded",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::CreateGroup(_) => "createGroup",
        }
    }
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// The raw `id` of every session as the client sent it; `null` when
    /// the session has none.
    OnlineUsers(Vec<Value>),
    NewMessage(Value),
    MessageDelivered(Value),
    UserTyping {
        user_id: Option<Value>,
        is_typing: Option<Value>,
    },
    IncomingCall(Value),
    CallInitiated(Value),
    CallAccepted(Value),
    CallRejected(Value),
    CallEnded(Value),
    Offer {
        offer: Option<Value>,
        caller: ConnectionId,
    },
    Answer {
        answer: Option<Value>,
        answerer: ConnectionId,
    },
    IceCandidate {
        candidate: Option<Value>,
        sender: ConnectionId,
    },
    GroupCreated(Value),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OnlineUsers(_) => "onlineUsers",
            Self::NewMessage(_) => "newMessage",
            Self::MessageDelivered(_) => "messageDelivered",
            Self::UserTyping { .. } => "userTyping",
            Self::IncomingCall(_) => "incomingCall",
            Self::CallInitiated(_) => "callInitiated",
            Self::CallAccepted(_) => "callAccepted",
            Self::CallRejected(_) => "callRejected",
            Self::CallEnded(_) => "callEnded",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::GroupCreated(_) => "groupCreated",
        }
    }

    /// The `data` half of the envelope.
    pub fn data(&self) -> Value {
        match self {
            Self::OnlineUsers(ids) => Value::Array(ids.clone()),
            Self::NewMessage(v)
            | Self::MessageDelivered(v)
            | Self::IncomingCall(v)
            | Self::CallInitiated(v)
            | Self::CallAccepted(v)
            | Self::CallRejected(v)
            | Self::CallEnded(v)
            | Self::GroupCreated(v) => v.clone(),
            Self::UserTyping { user_id, is_typing } => {
                let mut obj = Map::new();
                if let Some(id) = user_id {
                    obj.insert("userId".into(), id.clone());
                }
                if let Some(flag) = is_typing {
                    obj.insert("isTyping".into(), flag.clone());
                }
                Value::Object(obj)
            }
            Self::Offer { offer, caller } => signal_data("offer", offer, "caller", caller),
            Self::Answer { answer, answerer } => {
                signal_data("answer", answer, "answerer", answerer)
            }
            Self::IceCandidate { candidate, sender } => {
                signal_data("candidate", candidate, "sender", sender)
            }
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            event: self.name().to_string(),
            data: self.data(),
        }
    }

    /// Serialize to the text frame sent over the socket.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.to_envelope())?)
    }
}

fn signal_data(
    media_key: &str,
    media: &Option<Value>,
    role_key: &str,
    origin: &ConnectionId,
) -> Value {
    let mut obj = Map::new();
    if let Some(m) = media {
        obj.insert(media_key.into(), m.clone());
    }
    obj.insert(role_key.into(), Value::String(origin.to_string()));
    Value::Object(obj)
}

/// A routing field counts only when it is a non-empty string.
pub fn routing_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// A pass-through field. Only a missing key is absent; an explicit `null`
/// is relayed as `null`.
pub fn optional_field(payload: &Value, key: &str) -> Option<Value> {
    payload.get(key).cloned()
}

/// Copy `payload` and overlay `extra` on top of it. Non-object payloads
/// contribute nothing.
pub fn with_fields(payload: &Value, extra: impl IntoIterator<Item = (String, Value)>) -> Value {
    let mut obj = payload.as_object().cloned().unwrap_or_default();
    for (k, v) in extra {
        obj.insert(k, v);
    }
    Value::Object(obj)
}
