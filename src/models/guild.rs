use super::{
    impl_hashable, Channel, ChannelId, ChannelType, GuildId, Role, RoleId, RolePayload,
    SharedMember, UserId,
};
use crate::util::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Handle to a cached guild. Event handlers and accessors share one
/// live `Guild` per id.
pub type SharedGuild = Arc<RwLock<Guild>>;

#[derive(Clone, Debug, Deserialize)]
pub struct GuildPayload {
    pub id: GuildId,
    #[serde(default)]
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: Option<UserId>,
    pub member_count: Option<u64>,
    pub max_members: Option<u64>,
    pub description: Option<String>,
    pub joined_at: Option<String>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub roles: Vec<RolePayload>,
}

/// A guild and its scoped entities. Channels, roles and members live
/// inside the guild rather than in global maps so that removing the
/// guild drops them atomically.
#[derive(Debug)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: Option<UserId>,
    pub member_count: u64,
    pub max_members: Option<u64>,
    pub description: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub unavailable: bool,
    channels: HashMap<ChannelId, Channel>,
    members: HashMap<UserId, SharedMember>,
    roles: HashMap<RoleId, Role>,
}

impl_hashable!(Guild);

impl Guild {
    pub fn from_payload(payload: &GuildPayload) -> Self {
        let roles = payload
            .roles
            .iter()
            .map(|role| (role.id, Role::from_payload(role, payload.id)))
            .collect();
        Self {
            id: payload.id,
            name: payload.name.clone(),
            icon: payload.icon.clone(),
            owner_id: payload.owner_id,
            member_count: payload.member_count.unwrap_or(0),
            max_members: payload.max_members,
            description: payload.description.clone(),
            joined_at: payload.joined_at.as_deref().and_then(parse_timestamp),
            unavailable: payload.unavailable,
            channels: HashMap::new(),
            members: HashMap::new(),
            roles,
        }
    }

    /// Applies the scalar fields of a guild update in place. Scoped
    /// entities are managed by their own events.
    pub fn apply(&mut self, payload: &GuildPayload) {
        if !payload.name.is_empty() {
            self.name = payload.name.clone();
        }
        if payload.icon.is_some() {
            self.icon = payload.icon.clone();
        }
        if payload.owner_id.is_some() {
            self.owner_id = payload.owner_id;
        }
        if let Some(count) = payload.member_count {
            self.member_count = count;
        }
        if payload.max_members.is_some() {
            self.max_members = payload.max_members;
        }
        if payload.description.is_some() {
            self.description = payload.description.clone();
        }
    }

    // Channels

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn add_channel(&mut self, channel: Channel) -> Option<Channel> {
        self.channels.insert(channel.id, channel)
    }

    pub fn remove_channel(&mut self, id: ChannelId) -> Option<Channel> {
        self.channels.remove(&id)
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Text channels ordered by (position, id).
    pub fn text_channels(&self) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self
            .channels
            .values()
            .filter(|channel| channel.kind == ChannelType::Text)
            .collect();
        channels.sort_by_key(|channel| channel.sort_key());
        channels
    }

    pub fn categories(&self) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self
            .channels
            .values()
            .filter(|channel| channel.kind == ChannelType::Category)
            .collect();
        channels.sort_by_key(|channel| channel.sort_key());
        channels
    }

    /// Channels grouped by category, in UI order: uncategorized
    /// channels first, then each category with its children. Within a
    /// group, channels sort by (type tag, position, id).
    pub fn by_category(&self) -> Vec<(Option<&Channel>, Vec<&Channel>)> {
        let mut grouped: HashMap<Option<ChannelId>, Vec<&Channel>> = HashMap::new();
        for channel in self.channels.values() {
            if channel.kind == ChannelType::Category {
                grouped.entry(Some(channel.id)).or_default();
            } else {
                grouped.entry(channel.parent_id).or_default().push(channel);
            }
        }

        let mut groups: Vec<(Option<&Channel>, Vec<&Channel>)> = grouped
            .into_iter()
            .map(|(parent, mut children)| {
                children.sort_by_key(|c| (c.kind.wire(), c.position, c.id.0));
                (parent.and_then(|id| self.channel(id)), children)
            })
            .collect();
        groups.sort_by_key(|(category, _)| match category {
            None => (0, 0, 0),
            Some(c) => (1, c.position, c.id.0),
        });
        groups
    }

    // Roles

    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles.get(&id)
    }

    pub fn add_role(&mut self, role: Role) -> Option<Role> {
        self.roles.insert(role.id, role)
    }

    pub fn remove_role(&mut self, id: RoleId) -> Option<Role> {
        self.roles.remove(&id)
    }

    /// All roles in hierarchy order, default role first.
    pub fn roles(&self) -> Vec<&Role> {
        let mut roles: Vec<&Role> = self.roles.values().collect();
        roles.sort();
        roles
    }

    /// The default role shares the guild's id.
    pub fn default_role_id(&self) -> RoleId {
        RoleId(self.id.0)
    }

    // Members

    pub fn member(&self, id: UserId) -> Option<&SharedMember> {
        self.members.get(&id)
    }

    /// Inserts a member, returning the displaced handle if the user
    /// was already a member.
    pub fn add_member(&mut self, id: UserId, member: SharedMember) -> Option<SharedMember> {
        self.members.insert(id, member)
    }

    pub fn remove_member(&mut self, id: UserId) -> Option<SharedMember> {
        self.members.remove(&id)
    }

    pub fn members(&self) -> impl Iterator<Item = &SharedMember> {
        self.members.values()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.members.keys().copied()
    }

    pub fn owner(&self) -> Option<&SharedMember> {
        self.owner_id.and_then(|id| self.members.get(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelPayload;

    fn guild() -> Guild {
        Guild::from_payload(&GuildPayload {
            id: GuildId(100),
            name: "test".to_owned(),
            icon: None,
            owner_id: None,
            member_count: Some(3),
            max_members: None,
            description: None,
            joined_at: None,
            unavailable: false,
            roles: Vec::new(),
        })
    }

    fn channel(id: u64, kind: u32, position: i64, parent: Option<u64>) -> Channel {
        Channel::from_payload(
            &ChannelPayload {
                id: ChannelId(id),
                kind: Some(kind),
                guild_id: Some(GuildId(100)),
                name: format!("c{}", id),
                position: Some(position),
                parent_id: parent.map(ChannelId),
            },
            GuildId(100),
        )
        .unwrap()
    }

    #[test]
    fn test_text_channels_sorted() {
        let mut g = guild();
        g.add_channel(channel(3, 0, 1, None));
        g.add_channel(channel(1, 0, 2, None));
        g.add_channel(channel(2, 2, 0, None)); // voice, excluded
        let ids: Vec<u64> = g.text_channels().iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_by_category_uncategorized_first() {
        let mut g = guild();
        g.add_channel(channel(10, 4, 0, None)); // category
        g.add_channel(channel(11, 0, 0, Some(10)));
        g.add_channel(channel(12, 0, 0, None));

        let groups = g.by_category();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].0.is_none());
        assert_eq!(groups[0].1[0].id, ChannelId(12));
        assert_eq!(groups[1].0.unwrap().id, ChannelId(10));
        assert_eq!(groups[1].1[0].id, ChannelId(11));
    }

    #[test]
    fn test_roles_hierarchy_order() {
        let mut g = guild();
        g.add_role(Role {
            id: RoleId(105),
            guild_id: GuildId(100),
            name: "mid".to_owned(),
            color: 0,
            hoist: false,
        });
        g.add_role(Role {
            id: g.default_role_id(),
            guild_id: GuildId(100),
            name: "everyone".to_owned(),
            color: 0,
            hoist: false,
        });
        let names: Vec<&str> = g.roles().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["everyone", "mid"]);
    }

    #[test]
    fn test_apply_keeps_scoped_entities() {
        let mut g = guild();
        g.add_channel(channel(1, 0, 0, None));
        g.apply(&GuildPayload {
            id: GuildId(100),
            name: "renamed".to_owned(),
            icon: None,
            owner_id: None,
            member_count: None,
            max_members: None,
            description: None,
            joined_at: None,
            unavailable: false,
            roles: Vec::new(),
        });
        assert_eq!(g.name, "renamed");
        assert_eq!(g.member_count, 3);
        assert!(g.channel(ChannelId(1)).is_some());
    }
}
