//! Ad-hoc groups created on demand and kept for the life of the process.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use huddle_core::ids::{ConnectionId, GroupId, UserId};
use huddle_core::protocol::{with_fields, OutboundEvent};
use serde_json::{Map, Value};

use crate::router::Router;
use crate::transport::Transport;

/// A stored group. Membership is a snapshot taken at creation.
#[derive(Clone, Debug)]
pub struct Group {
    pub id: GroupId,
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    /// Everything else the creator sent, untouched.
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct GroupDirectory {
    groups: HashMap<GroupId, Group>,
    next_sequence: u64,
}

impl GroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group, join the creator to its room, notify online members
    /// and echo the result to the creator.
    ///
    /// Member notification is best effort: offline members get nothing and
    /// nobody but the creator is joined to the room.
    pub fn create_group<T: Transport + ?Sized>(
        &mut self,
        creator: &ConnectionId,
        group_data: &Value,
        router: &Router<'_, T>,
    ) -> &Group {
        let created_at = Utc::now();
        let id = GroupId::generate(created_at.timestamp_millis(), self.next_sequence);
        self.next_sequence += 1;

        let mut metadata = group_data.as_object().cloned().unwrap_or_default();
        let members: Vec<UserId> = match metadata.remove("members") {
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(Value::as_str)
                .map(UserId::from_raw)
                .collect(),
            _ => Vec::new(),
        };

        router.transport().join_room(id.as_str(), creator);

        let announcement = OutboundEvent::GroupCreated(with_fields(
            group_data,
            [("id".to_string(), Value::String(id.to_string()))],
        ));
        let notified = members
            .iter()
            .filter(|member| router.send_to_user(member.as_str(), &announcement, creator))
            .count();
        router.transport().send(creator, &announcement);

        tracing::info!(
            group_id = %id,
            creator = %creator,
            members = members.len(),
            notified,
            "Group created"
        );

        self.groups.entry(id.clone()).or_insert(Group {
            id,
            members,
            created_at,
            metadata,
        })
    }

    pub fn get(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
