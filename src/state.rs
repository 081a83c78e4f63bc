//! Event dispatch and the high-level operations that keep the cache
//! and the remote side consistent. One [`State`] wraps the cache and a
//! REST collaborator; gateway payloads flow in through [`State::dispatch`].

use crate::cache::StateCache;
use crate::models::{
    Channel, ChannelId, ChannelPayload, ChannelType, Guild, GuildId, GuildPayload, Member,
    MemberPayload, Message, MessageId, MessagePayload, MessageReference, Reaction, ReactionPayload,
    Role, RoleId, RolePayload, Sendable, SharedGuild, SharedMember, SharedMessage, UpdateContext,
    User, UserId, UserPayload,
};
use crate::prelude::*;
use crate::rest::{ChannelPositionUpdate, JsonMap, Patch, RestClient};
use serde::Deserialize;
use serde_json::Value;
use std::sync::RwLock;

/// A fully-processed gateway event, carrying handles into the cache.
#[derive(Clone)]
pub enum Event {
    Ready(Arc<User>),
    GuildCreate(SharedGuild),
    GuildUpdate(SharedGuild),
    GuildRemove(SharedGuild),
    GuildUnavailable(GuildId),
    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),
    MemberAdd(SharedMember),
    MemberUpdate(SharedMember),
    MemberRemove(SharedMember),
    RoleCreate(Role),
    RoleUpdate(Role),
    RoleDelete(Role),
    MessageCreate(SharedMessage),
    MessageUpdate(SharedMessage),
    MessageDelete {
        id: MessageId,
        message: Option<SharedMessage>,
    },
    ReactionAdd(Reaction),
    ReactionRemove(Reaction),
}

/// Where to place a channel relative to its sorting bucket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MoveTarget {
    Beginning,
    End,
    Before(ChannelId),
    After(ChannelId),
}

/// Tri-state channel edit. Unset fields are left untouched remotely.
#[derive(Clone, Debug, Default)]
pub struct ChannelEdit {
    pub name: Patch<String>,
    pub position: Patch<i64>,
    pub parent_id: Patch<ChannelId>,
    pub kind: Patch<ChannelType>,
}

impl ChannelEdit {
    fn to_fields(&self) -> Result<JsonMap> {
        if let Patch::Set(position) = self.position {
            if position < 0 {
                return Err(Error::InvalidArgument(format!(
                    "channel position {} is negative",
                    position
                )));
            }
        }
        let mut fields = JsonMap::new();
        self.name.apply_to(&mut fields, "name")?;
        self.position.apply_to(&mut fields, "position")?;
        self.parent_id.apply_to(&mut fields, "parent_id")?;
        self.kind.apply_to(&mut fields, "type")?;
        Ok(fields)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RoleEdit {
    pub name: Patch<String>,
    pub color: Patch<u32>,
    pub hoist: Patch<bool>,
}

impl RoleEdit {
    fn to_fields(&self) -> Result<JsonMap> {
        let mut fields = JsonMap::new();
        self.name.apply_to(&mut fields, "name")?;
        self.color.apply_to(&mut fields, "color")?;
        self.hoist.apply_to(&mut fields, "hoist")?;
        Ok(fields)
    }
}

#[derive(Deserialize)]
struct ReadyPayload {
    user: UserPayload,
}

#[derive(Deserialize)]
struct MemberRemovePayload {
    user: UserPayload,
    guild_id: Option<GuildId>,
}

#[derive(Deserialize)]
struct RoleEventPayload {
    guild_id: GuildId,
    role: RolePayload,
}

#[derive(Deserialize)]
struct RoleDeletePayload {
    guild_id: GuildId,
    role_id: RoleId,
}

#[derive(Deserialize)]
struct MessageDeletePayload {
    id: MessageId,
}

#[derive(Clone)]
pub struct State {
    cache: StateCache,
    rest: Arc<dyn RestClient>,
}

impl State {
    pub fn new(rest: Arc<dyn RestClient>) -> Self {
        Self::with_cache(StateCache::new(), rest)
    }

    pub fn with_cache(cache: StateCache, rest: Arc<dyn RestClient>) -> Self {
        Self { cache, rest }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    /// Routes one raw gateway payload into the cache. Returns the
    /// processed event, or `None` when the event is unknown or refers
    /// to state that was never cached.
    pub async fn dispatch(&self, event_type: &str, payload: Value) -> Result<Option<Event>> {
        match event_type {
            "READY" => {
                let data: ReadyPayload = serde_json::from_value(payload)?;
                let user = self.cache.cache_current_user(User::from_payload(&data.user));
                Ok(Some(Event::Ready(user)))
            }
            "GUILD_CREATE" => {
                let data: GuildPayload = serde_json::from_value(payload)?;
                self.handle_guild_create(data).await.map(Some)
            }
            "GUILD_UPDATE" => {
                let data: GuildPayload = serde_json::from_value(payload)?;
                self.handle_guild_update(data).await.map(Some)
            }
            "GUILD_DELETE" => {
                let data: GuildPayload = serde_json::from_value(payload)?;
                Ok(self.handle_guild_delete(&data))
            }
            "CHANNEL_CREATE" => {
                let data: ChannelPayload = serde_json::from_value(payload)?;
                Ok(self.handle_channel_create(&data))
            }
            "CHANNEL_UPDATE" => {
                let data: ChannelPayload = serde_json::from_value(payload)?;
                Ok(self.handle_channel_update(&data))
            }
            "CHANNEL_DELETE" => {
                let data: ChannelPayload = serde_json::from_value(payload)?;
                Ok(self.handle_channel_delete(&data))
            }
            "GUILD_MEMBER_ADD" => {
                let data: MemberPayload = serde_json::from_value(payload)?;
                self.handle_member_add(&data)
            }
            "GUILD_MEMBER_UPDATE" => {
                let data: MemberPayload = serde_json::from_value(payload)?;
                self.handle_member_update(&data)
            }
            "GUILD_MEMBER_REMOVE" => {
                let data: MemberRemovePayload = serde_json::from_value(payload)?;
                Ok(self.handle_member_remove(&data))
            }
            "GUILD_ROLE_CREATE" => {
                let data: RoleEventPayload = serde_json::from_value(payload)?;
                Ok(self.handle_role_upsert(&data, true))
            }
            "GUILD_ROLE_UPDATE" => {
                let data: RoleEventPayload = serde_json::from_value(payload)?;
                Ok(self.handle_role_upsert(&data, false))
            }
            "GUILD_ROLE_DELETE" => {
                let data: RoleDeletePayload = serde_json::from_value(payload)?;
                Ok(self.handle_role_delete(&data))
            }
            // Mention-gated intents deliver creates under their own name.
            "MESSAGE_CREATE" | "AT_MESSAGE_CREATE" => {
                let data: MessagePayload = serde_json::from_value(payload)?;
                self.handle_message_create(&data).map(Some)
            }
            "MESSAGE_UPDATE" => {
                let data: MessagePayload = serde_json::from_value(payload)?;
                self.handle_message_update(&data).map(Some)
            }
            "MESSAGE_DELETE" => {
                let data: MessageDeletePayload = serde_json::from_value(payload)?;
                let message = self.cache.remove_message(data.id);
                Ok(Some(Event::MessageDelete {
                    id: data.id,
                    message,
                }))
            }
            "MESSAGE_REACTION_ADD" => {
                let data: ReactionPayload = serde_json::from_value(payload)?;
                Ok(Some(Event::ReactionAdd(Reaction::from_payload(&data))))
            }
            "MESSAGE_REACTION_REMOVE" => {
                let data: ReactionPayload = serde_json::from_value(payload)?;
                Ok(Some(Event::ReactionRemove(Reaction::from_payload(&data))))
            }
            _ => {
                debug!("ignoring unhandled gateway event {}", event_type);
                Ok(None)
            }
        }
    }

    // Guilds

    async fn handle_guild_create(&self, payload: GuildPayload) -> Result<Event> {
        if payload.unavailable {
            let guild_id = payload.id;
            self.cache.insert_guild(Guild::from_payload(&payload));
            self.cache.mark_unavailable(guild_id);
            return Ok(Event::GuildUnavailable(guild_id));
        }
        let guild = self.upsert_guild(&payload).await?;
        Ok(Event::GuildCreate(guild))
    }

    async fn handle_guild_update(&self, payload: GuildPayload) -> Result<Event> {
        if let Some(guild) = self.cache.guild(payload.id) {
            guild.write().expect("guild lock poisoned").apply(&payload);
            return Ok(Event::GuildUpdate(guild));
        }
        // An update for a guild we never saw; hydrate it from scratch.
        let guild = self.upsert_guild(&payload).await?;
        Ok(Event::GuildUpdate(guild))
    }

    fn handle_guild_delete(&self, payload: &GuildPayload) -> Option<Event> {
        if payload.unavailable {
            self.cache.mark_unavailable(payload.id);
            if let Some(guild) = self.cache.guild(payload.id) {
                guild.write().expect("guild lock poisoned").unavailable = true;
            }
            return Some(Event::GuildUnavailable(payload.id));
        }
        self.cache.remove_guild(payload.id).map(Event::GuildRemove)
    }

    /// Builds and hydrates a guild, then publishes it. The guild is
    /// invisible to lookups until hydration finishes; a sync failure
    /// leaves the cache without the guild entirely.
    async fn upsert_guild(&self, payload: &GuildPayload) -> Result<SharedGuild> {
        let mut guild = Guild::from_payload(payload);
        self.sync_guild(&mut guild).await?;
        Ok(self.cache.insert_guild(guild))
    }

    async fn sync_guild(&self, guild: &mut Guild) -> Result<()> {
        let data = self.rest.sync_guild(guild.id).await?;

        for role in &data.roles {
            guild.add_role(Role::from_payload(role, guild.id));
        }
        for payload in &data.channels {
            match Channel::from_payload(payload, guild.id) {
                Some(channel) => {
                    guild.add_channel(channel);
                }
                None => debug!(
                    "guild {}: skipping channel {} with unrecognized type tag",
                    guild.id, payload.id
                ),
            }
        }

        let mut members = data.members;
        if members.is_empty() {
            // Some gateways omit the member list; fall back to fetching
            // our own membership so the guild is never member-less.
            match self.cache.current_user() {
                Some(current) => {
                    members.push(self.rest.get_member(guild.id, current.id).await?);
                }
                None => warn!(
                    "guild {} sync returned no members and no session user is known",
                    guild.id
                ),
            }
        }
        for payload in &members {
            let user = self.cache.store_user(&payload.user);
            let member = Member::new(user, guild.id, payload);
            let user_id = member.id;
            if guild
                .add_member(user_id, Arc::new(RwLock::new(member)))
                .is_some()
            {
                // Duplicate entry in the member list; drop the extra
                // pool reference the displaced member held.
                self.cache.deref_user(user_id);
            }
        }
        Ok(())
    }

    // Channels

    fn handle_channel_create(&self, payload: &ChannelPayload) -> Option<Event> {
        let guild_id = payload.guild_id?;
        let guild = self.cache.guild(guild_id)?;
        let channel = match Channel::from_payload(payload, guild_id) {
            Some(channel) => channel,
            None => {
                debug!("channel {} has an unrecognized type tag", payload.id);
                return None;
            }
        };
        guild
            .write()
            .expect("guild lock poisoned")
            .add_channel(channel.clone());
        self.cache.register_channel(channel.id, guild_id);
        Some(Event::ChannelCreate(channel))
    }

    fn handle_channel_update(&self, payload: &ChannelPayload) -> Option<Event> {
        let guild = payload
            .guild_id
            .and_then(|id| self.cache.guild(id))
            .or_else(|| self.cache.channel_guild(payload.id))?;
        let mut guard = guild.write().expect("guild lock poisoned");
        if let Some(channel) = guard.channel_mut(payload.id) {
            channel.apply(payload);
            return Some(Event::ChannelUpdate(channel.clone()));
        }
        // An update for a channel we never saw doubles as a create.
        let guild_id = guard.id;
        let channel = Channel::from_payload(payload, guild_id)?;
        guard.add_channel(channel.clone());
        drop(guard);
        self.cache.register_channel(channel.id, guild_id);
        Some(Event::ChannelUpdate(channel))
    }

    fn handle_channel_delete(&self, payload: &ChannelPayload) -> Option<Event> {
        let guild = payload
            .guild_id
            .and_then(|id| self.cache.guild(id))
            .or_else(|| self.cache.channel_guild(payload.id))?;
        let removed = guild
            .write()
            .expect("guild lock poisoned")
            .remove_channel(payload.id)?;
        self.cache.unregister_channel(payload.id);
        Some(Event::ChannelDelete(removed))
    }

    // Members

    fn handle_member_add(&self, payload: &MemberPayload) -> Result<Option<Event>> {
        let guild_id = payload
            .guild_id
            .ok_or_else(|| Error::InvalidData("member event without a guild id".to_owned()))?;
        let guild = match self.cache.guild(guild_id) {
            Some(guild) => guild,
            None => {
                warn!("member event for uncached guild {}", guild_id);
                return Ok(None);
            }
        };
        let user = self.cache.store_user(&payload.user);
        let member = Member::new(user, guild_id, payload);
        let rejoin = self.cache.member(guild_id, member.id).is_some();
        let shared = match self.cache.put_member(guild_id, member) {
            Some(shared) => shared,
            None => return Ok(None),
        };
        if !rejoin {
            guild.write().expect("guild lock poisoned").member_count += 1;
        }
        Ok(Some(Event::MemberAdd(shared)))
    }

    fn handle_member_update(&self, payload: &MemberPayload) -> Result<Option<Event>> {
        let guild_id = payload
            .guild_id
            .ok_or_else(|| Error::InvalidData("member event without a guild id".to_owned()))?;
        self.cache.update_user(&payload.user);
        match self.cache.member(guild_id, payload.user.id) {
            Some(member) => {
                member
                    .write()
                    .expect("member lock poisoned")
                    .apply(payload);
                Ok(Some(Event::MemberUpdate(member)))
            }
            // An update for a member we never saw doubles as an add.
            None => self.handle_member_add(payload),
        }
    }

    fn handle_member_remove(&self, payload: &MemberRemovePayload) -> Option<Event> {
        let guild_id = payload.guild_id?;
        let removed = self.cache.remove_member(guild_id, payload.user.id)?;
        if let Some(guild) = self.cache.guild(guild_id) {
            let mut guard = guild.write().expect("guild lock poisoned");
            guard.member_count = guard.member_count.saturating_sub(1);
        }
        Some(Event::MemberRemove(removed))
    }

    // Roles

    fn handle_role_upsert(&self, payload: &RoleEventPayload, create: bool) -> Option<Event> {
        let guild = self.cache.guild(payload.guild_id)?;
        let mut guard = guild.write().expect("guild lock poisoned");
        let existing = guard.role(payload.role.id).cloned();
        let role = match existing {
            Some(mut updated) if !create => {
                updated.apply(&payload.role);
                updated
            }
            _ => Role::from_payload(&payload.role, payload.guild_id),
        };
        guard.add_role(role.clone());
        Some(if create {
            Event::RoleCreate(role)
        } else {
            Event::RoleUpdate(role)
        })
    }

    fn handle_role_delete(&self, payload: &RoleDeletePayload) -> Option<Event> {
        let guild = self.cache.guild(payload.guild_id)?;
        let removed = {
            let mut guard = guild.write().expect("guild lock poisoned");
            let removed = guard.remove_role(payload.role_id)?;
            // Members must not keep pointing at a deleted role.
            for member in guard.members() {
                member
                    .write()
                    .expect("member lock poisoned")
                    .roles
                    .remove(&payload.role_id);
            }
            removed
        };
        Some(Event::RoleDelete(removed))
    }

    // Messages

    fn handle_message_create(&self, payload: &MessagePayload) -> Result<Event> {
        let channel_id = payload
            .channel_id
            .ok_or_else(|| Error::InvalidData("message without a channel id".to_owned()))?;
        let guild = payload
            .guild_id
            .and_then(|id| self.cache.guild(id))
            .or_else(|| self.cache.channel_guild(channel_id));
        let guild_id = guild
            .as_ref()
            .map(|g| g.read().expect("guild lock poisoned").id)
            .or(payload.guild_id);

        let ctx = UpdateContext {
            cache: &self.cache,
            guild: guild.as_ref(),
        };
        let message = Message::new(payload, channel_id, guild_id, &ctx);
        let shared = self.cache.cache_message(message);

        if let Some(guild) = &guild {
            let mut guard = guild.write().expect("guild lock poisoned");
            if let Some(channel) = guard.channel_mut(channel_id) {
                channel.last_message_id = Some(payload.id);
            }
        }
        Ok(Event::MessageCreate(shared))
    }

    fn handle_message_update(&self, payload: &MessagePayload) -> Result<Event> {
        if let Some(message) = self.cache.message(payload.id) {
            let guild_id = message.read().expect("message lock poisoned").guild_id;
            let guild = guild_id.and_then(|id| self.cache.guild(id));
            let ctx = UpdateContext {
                cache: &self.cache,
                guild: guild.as_ref(),
            };
            message
                .write()
                .expect("message lock poisoned")
                .apply(&ctx, payload);
            return Ok(Event::MessageUpdate(message));
        }
        // Update for an uncached (likely evicted) message; cache what
        // the partial payload gives us.
        self.handle_message_create(payload).map(|event| match event {
            Event::MessageCreate(message) => Event::MessageUpdate(message),
            other => other,
        })
    }

    // Channel operations

    /// Repositions a channel within its sorting bucket, optionally
    /// changing its category. Positions are updated locally first and
    /// then pushed remotely in one bulk request.
    pub async fn move_channel(
        &self,
        channel_id: ChannelId,
        target: Option<MoveTarget>,
        offset: i64,
        category: Patch<ChannelId>,
    ) -> Result<()> {
        let target = match target {
            Some(target) => target,
            None => return Ok(()),
        };
        let guild = self
            .cache
            .channel_guild(channel_id)
            .ok_or_else(|| Error::NotFound(format!("channel {} is not cached", channel_id)))?;

        let (guild_id, updates) = {
            let guard = guild.read().expect("guild lock poisoned");
            let subject = guard
                .channel(channel_id)
                .ok_or_else(|| Error::NotFound(format!("channel {} is not cached", channel_id)))?;
            let new_parent = match category {
                Patch::Keep => subject.parent_id,
                Patch::Clear => None,
                Patch::Set(id) => Some(id),
            };

            let mut bucket: Vec<&Channel> = guard
                .channels()
                .filter(|c| {
                    c.id != channel_id
                        && c.sorting_bucket() == subject.sorting_bucket()
                        && c.parent_id == new_parent
                })
                .collect();
            bucket.sort_by_key(|c| c.sort_key());

            let index = match target {
                MoveTarget::Beginning => 0,
                MoveTarget::End => bucket.len(),
                MoveTarget::Before(sibling) => bucket
                    .iter()
                    .position(|c| c.id == sibling)
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "channel {} is not in the target bucket",
                            sibling
                        ))
                    })?,
                MoveTarget::After(sibling) => {
                    bucket
                        .iter()
                        .position(|c| c.id == sibling)
                        .ok_or_else(|| {
                            Error::InvalidArgument(format!(
                                "channel {} is not in the target bucket",
                                sibling
                            ))
                        })?
                        + 1
                }
            };
            let index = (index as i64 + offset).clamp(0, bucket.len() as i64) as usize;

            let mut order: Vec<ChannelId> = bucket.iter().map(|c| c.id).collect();
            order.insert(index, channel_id);

            let updates: Vec<ChannelPositionUpdate> = order
                .iter()
                .enumerate()
                .map(|(position, id)| ChannelPositionUpdate {
                    id: *id,
                    position: position as i64,
                    parent_id: if *id == channel_id {
                        category
                    } else {
                        Patch::Keep
                    },
                })
                .collect();
            (guard.id, updates)
        };

        // Optimistic local application; the remote call follows and is
        // not rolled back on failure.
        {
            let mut guard = guild.write().expect("guild lock poisoned");
            for update in &updates {
                if let Some(channel) = guard.channel_mut(update.id) {
                    channel.position = update.position;
                    if let Patch::Set(parent) = update.parent_id {
                        channel.parent_id = Some(parent);
                    } else if update.id == channel_id && matches!(category, Patch::Clear) {
                        channel.parent_id = None;
                    }
                }
            }
        }

        self.rest.bulk_channel_update(guild_id, &updates).await
    }

    pub async fn create_channel(&self, guild_id: GuildId, edit: ChannelEdit) -> Result<Channel> {
        let guild = self
            .cache
            .guild(guild_id)
            .ok_or_else(|| Error::NotFound(format!("guild {} is not cached", guild_id)))?;
        let payload = self.rest.create_channel(guild_id, edit.to_fields()?).await?;
        let channel = Channel::from_payload(&payload, guild_id).ok_or_else(|| {
            Error::InvalidData(format!("channel {} has an unrecognized type tag", payload.id))
        })?;
        guild
            .write()
            .expect("guild lock poisoned")
            .add_channel(channel.clone());
        self.cache.register_channel(channel.id, guild_id);
        Ok(channel)
    }

    pub async fn edit_channel(&self, channel_id: ChannelId, edit: ChannelEdit) -> Result<Channel> {
        let guild = self
            .cache
            .channel_guild(channel_id)
            .ok_or_else(|| Error::NotFound(format!("channel {} is not cached", channel_id)))?;
        let payload = self.rest.edit_channel(channel_id, edit.to_fields()?).await?;
        let mut guard = guild.write().expect("guild lock poisoned");
        let channel = guard
            .channel_mut(channel_id)
            .ok_or_else(|| Error::NotFound(format!("channel {} is not cached", channel_id)))?;
        channel.apply(&payload);
        Ok(channel.clone())
    }

    pub async fn delete_channel(&self, channel_id: ChannelId) -> Result<()> {
        self.rest.delete_channel(channel_id).await?;
        if let Some(guild) = self.cache.channel_guild(channel_id) {
            guild
                .write()
                .expect("guild lock poisoned")
                .remove_channel(channel_id);
            self.cache.unregister_channel(channel_id);
        }
        Ok(())
    }

    // Role operations

    pub async fn create_role(&self, guild_id: GuildId, edit: RoleEdit) -> Result<Role> {
        let guild = self
            .cache
            .guild(guild_id)
            .ok_or_else(|| Error::NotFound(format!("guild {} is not cached", guild_id)))?;
        let payload = self.rest.create_role(guild_id, edit.to_fields()?).await?;
        let role = Role::from_payload(&payload, guild_id);
        guild
            .write()
            .expect("guild lock poisoned")
            .add_role(role.clone());
        Ok(role)
    }

    pub async fn edit_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        edit: RoleEdit,
    ) -> Result<Role> {
        let guild = self
            .cache
            .guild(guild_id)
            .ok_or_else(|| Error::NotFound(format!("guild {} is not cached", guild_id)))?;
        let payload = self.rest.edit_role(guild_id, role_id, edit.to_fields()?).await?;
        let mut guard = guild.write().expect("guild lock poisoned");
        let role = match guard.role(role_id).cloned() {
            Some(mut updated) => {
                updated.apply(&payload);
                updated
            }
            None => Role::from_payload(&payload, guild_id),
        };
        guard.add_role(role.clone());
        Ok(role)
    }

    pub async fn delete_role(&self, guild_id: GuildId, role_id: RoleId) -> Result<()> {
        self.rest.delete_role(guild_id, role_id).await?;
        self.handle_role_delete(&RoleDeletePayload { guild_id, role_id });
        Ok(())
    }

    // Fetch-or-cache accessors

    /// The channel, fetched fresh from the remote side and merged into
    /// the cache. A channel that resolves to a different guild than
    /// requested is an integrity error and is not cached.
    pub async fn fetch_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Channel> {
        let payload = self.rest.get_channel(channel_id).await?;
        if payload.guild_id != Some(guild_id) {
            return Err(Error::InvalidData(format!(
                "channel {} resolved to a different guild",
                channel_id
            )));
        }
        let guild = self.cache.guild(guild_id);
        if let Some(guild) = &guild {
            let mut guard = guild.write().expect("guild lock poisoned");
            if let Some(channel) = guard.channel_mut(channel_id) {
                channel.apply(&payload);
                return Ok(channel.clone());
            }
        }
        let channel = Channel::from_payload(&payload, guild_id).ok_or_else(|| {
            Error::InvalidData(format!("channel {} has an unrecognized type tag", payload.id))
        })?;
        if let Some(guild) = &guild {
            guild
                .write()
                .expect("guild lock poisoned")
                .add_channel(channel.clone());
            self.cache.register_channel(channel.id, guild_id);
        }
        Ok(channel)
    }

    /// The member, fetched fresh from the remote side. A cached member
    /// is refreshed in place so every holder observes the new fields.
    pub async fn fetch_member(&self, guild_id: GuildId, user_id: UserId) -> Result<SharedMember> {
        let payload = self.rest.get_member(guild_id, user_id).await?;
        if payload.guild_id.is_some() && payload.guild_id != Some(guild_id) {
            return Err(Error::InvalidData(format!(
                "member {} resolved to a different guild",
                user_id
            )));
        }
        if let Some(member) = self.cache.member(guild_id, user_id) {
            self.cache.update_user(&payload.user);
            member
                .write()
                .expect("member lock poisoned")
                .apply(&payload);
            return Ok(member);
        }
        let user = self.cache.store_user(&payload.user);
        let member = Member::new(user, guild_id, &payload);
        self.cache.put_member(guild_id, member).ok_or_else(|| {
            self.cache.deref_user(user_id);
            Error::NotFound(format!("guild {} is not cached", guild_id))
        })
    }

    /// The message, fetched fresh from the remote side and upserted
    /// into the bounded cache.
    pub async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<SharedMessage> {
        let payload = self.rest.get_message(channel_id, message_id).await?;
        self.handle_message_update(&payload).map(|event| match event {
            Event::MessageCreate(message) | Event::MessageUpdate(message) => message,
            _ => unreachable!("message upsert always yields a message event"),
        })
    }

    /// The guild's roles, refreshed from the remote side and merged
    /// into the cache, in hierarchy order.
    pub async fn fetch_roles(&self, guild_id: GuildId) -> Result<Vec<Role>> {
        let guild = self
            .cache
            .guild(guild_id)
            .ok_or_else(|| Error::NotFound(format!("guild {} is not cached", guild_id)))?;
        let payloads = self.rest.get_roles(guild_id).await?;
        let mut guard = guild.write().expect("guild lock poisoned");
        for payload in &payloads {
            let role = match guard.role(payload.id).cloned() {
                Some(mut updated) => {
                    updated.apply(payload);
                    updated
                }
                None => Role::from_payload(payload, guild_id),
            };
            guard.add_role(role);
        }
        Ok(guard.roles().into_iter().cloned().collect())
    }

    // Sending

    /// Sends a message to anything sendable, caching the created
    /// message on success.
    pub async fn send_message(
        &self,
        target: &impl Sendable,
        content: Option<&str>,
        reference: Option<MessageReference>,
    ) -> Result<SharedMessage> {
        if content.is_none() && reference.is_none() {
            return Err(Error::InvalidArgument(
                "a message needs content or a reference".to_owned(),
            ));
        }
        let channel_id = target.resolve_channel()?;
        let mut fields = JsonMap::new();
        if let Some(content) = content {
            fields.insert("content".to_owned(), Value::String(content.to_owned()));
        }
        if let Some(reference) = &reference {
            fields.insert(
                "message_reference".to_owned(),
                serde_json::to_value(reference).map_err(Error::Json)?,
            );
        }
        let payload = self.rest.send_message(channel_id, fields).await?;
        self.handle_message_create(&payload).map(|event| match event {
            Event::MessageCreate(message) => message,
            _ => unreachable!("message create always yields a message event"),
        })
    }
}
