//! Connection registry: which user identity is bound to which live connection.

use chrono::{DateTime, Utc};
use huddle_core::ids::{ConnectionId, UserId};
use serde_json::{Map, Value};

/// The identity a client claimed when it authenticated.
#[derive(Clone, Debug)]
pub struct Session {
    pub connection_id: ConnectionId,
    /// `id` from the authenticate payload. Absent ids never match a lookup.
    pub user_id: Option<UserId>,
    /// `name` from the authenticate payload.
    pub display_name: Option<String>,
    pub last_seen: DateTime<Utc>,
    /// The full authenticate payload, kept as supplied.
    pub profile: Map<String, Value>,
}

impl Session {
    /// `id` exactly as the client sent it, `null` when missing.
    pub fn raw_id(&self) -> Value {
        self.profile.get("id").cloned().unwrap_or(Value::Null)
    }
}

/// Sessions in insertion order. Lookups are first-match linear scans, so when
/// several connections share a user id the earliest registered one wins.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: Vec<Session>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_data` to `connection_id`. Re-authenticating on the same
    /// connection overwrites the session but keeps its position.
    pub fn register(&mut self, connection_id: ConnectionId, user_data: &Value) -> &Session {
        let profile = user_data.as_object().cloned().unwrap_or_default();
        let session = Session {
            user_id: profile
                .get("id")
                .and_then(Value::as_str)
                .map(UserId::from_raw),
            display_name: profile
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_owned),
            connection_id,
            last_seen: Utc::now(),
            profile,
        };

        let index = match self
            .sessions
            .iter()
            .position(|s| s.connection_id == session.connection_id)
        {
            Some(i) => {
                self.sessions[i] = session;
                i
            }
            None => {
                self.sessions.push(session);
                self.sessions.len() - 1
            }
        };
        &self.sessions[index]
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| &s.connection_id == connection_id)
    }

    pub fn find_by_user_id(&self, user_id: &str) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.user_id.as_ref().is_some_and(|id| id.as_str() == user_id))
    }

    pub fn find_by_display_name(&self, name: &str) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.display_name.as_deref() == Some(name))
    }

    /// Drop the session owned by `connection_id`, if any.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Session> {
        let index = self
            .sessions
            .iter()
            .position(|s| &s.connection_id == connection_id)?;
        Some(self.sessions.remove(index))
    }

    /// Raw `id` of every session in registry order, duplicates included.
    pub fn list_user_ids(&self) -> Vec<Value> {
        self.sessions.iter().map(Session::raw_id).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
