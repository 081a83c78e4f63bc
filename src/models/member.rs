use super::{impl_hashable, GuildId, RoleId, SharedUser, UserId, UserPayload};
use crate::util::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

pub type SharedMember = Arc<RwLock<Member>>;

#[derive(Clone, Debug, Deserialize)]
pub struct MemberPayload {
    pub user: UserPayload,
    pub guild_id: Option<GuildId>,
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    pub joined_at: Option<String>,
}

/// Guild-scoped member fields as they appear embedded in a message
/// payload, without the `user` object.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemberFieldsPayload {
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    pub joined_at: Option<String>,
}

/// A user's guild-scoped identity: nickname and role set layered over
/// the pooled global [`User`](super::User).
#[derive(Clone, Debug)]
pub struct Member {
    pub user: SharedUser,
    /// Snapshot of the user id; identity is immutable so this never
    /// goes stale.
    pub id: UserId,
    pub guild_id: GuildId,
    pub nick: Option<String>,
    pub roles: HashSet<RoleId>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl_hashable!(Member);

impl Member {
    pub fn new(user: SharedUser, guild_id: GuildId, payload: &MemberPayload) -> Self {
        let id = user.read().expect("user lock poisoned").id;
        Self {
            user,
            id,
            guild_id,
            nick: payload.nick.clone(),
            roles: payload.roles.iter().copied().collect(),
            joined_at: payload.joined_at.as_deref().and_then(parse_timestamp),
        }
    }

    /// Builds a member opportunistically from a message's embedded
    /// member sub-payload, upgrading an author that was only known as
    /// a plain user.
    pub fn from_message_fields(
        user: SharedUser,
        guild_id: GuildId,
        fields: &MemberFieldsPayload,
    ) -> Self {
        let id = user.read().expect("user lock poisoned").id;
        Self {
            user,
            id,
            guild_id,
            nick: fields.nick.clone(),
            roles: fields.roles.iter().copied().collect(),
            joined_at: fields.joined_at.as_deref().and_then(parse_timestamp),
        }
    }

    /// Updates the mutable guild-scoped fields in place so every
    /// holder of this member observes the change.
    pub fn update_from_message(&mut self, fields: &MemberFieldsPayload) {
        if fields.nick.is_some() {
            self.nick = fields.nick.clone();
        }
        if !fields.roles.is_empty() {
            self.roles = fields.roles.iter().copied().collect();
        }
        if let Some(joined) = fields.joined_at.as_deref().and_then(parse_timestamp) {
            self.joined_at = Some(joined);
        }
    }

    pub fn apply(&mut self, payload: &MemberPayload) {
        self.nick = payload.nick.clone();
        self.roles = payload.roles.iter().copied().collect();
        if let Some(joined) = payload.joined_at.as_deref().and_then(parse_timestamp) {
            self.joined_at = Some(joined);
        }
    }

    /// The nickname if set, otherwise the global user name.
    pub fn display_name(&self) -> String {
        match &self.nick {
            Some(nick) => nick.clone(),
            None => self.user.read().expect("user lock poisoned").name.clone(),
        }
    }

    pub fn mention(&self) -> String {
        format!("<@!{}>", self.id)
    }
}
