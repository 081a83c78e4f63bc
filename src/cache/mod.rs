//! The connection-state cache: guilds with their scoped entities, a
//! reference-counted user pool, and a bounded FIFO message cache.
//! Everything hangs off one cheaply-clonable handle.

mod builder;
mod config;

pub use self::{builder::StateCacheBuilder, config::Config};

use crate::models::{
    Channel, ChannelId, Guild, GuildId, Member, Message, MessageId, SharedGuild, SharedMember,
    SharedMessage, SharedUser, User, UserId, UserPayload,
};
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

/// A pooled user plus the number of cache slots holding it alive.
struct UserEntry {
    user: SharedUser,
    refs: usize,
}

#[derive(Default)]
struct StateCacheRef {
    config: Config,
    guilds: DashMap<GuildId, SharedGuild>,
    // Channel-to-guild index so channel lookups skip a guild scan.
    guild_channels: DashMap<ChannelId, GuildId>,
    unavailable_guilds: DashSet<GuildId>,
    users: DashMap<UserId, UserEntry>,
    messages: DashMap<MessageId, SharedMessage>,
    message_order: Mutex<VecDeque<MessageId>>,
    current_user: Mutex<Option<Arc<User>>>,
}

/// The cache handle. Clones share the same underlying state.
#[derive(Clone, Default)]
pub struct StateCache(Arc<StateCacheRef>);

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self(Arc::new(StateCacheRef {
            config,
            ..StateCacheRef::default()
        }))
    }

    pub fn builder() -> StateCacheBuilder {
        StateCacheBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    // Current user

    pub fn current_user(&self) -> Option<Arc<User>> {
        self.0
            .current_user
            .lock()
            .expect("current user lock poisoned")
            .clone()
    }

    pub fn cache_current_user(&self, user: User) -> Arc<User> {
        let user = Arc::new(user);
        self.0
            .current_user
            .lock()
            .expect("current user lock poisoned")
            .replace(Arc::clone(&user));
        user
    }

    // Guilds

    pub fn guild(&self, guild_id: GuildId) -> Option<SharedGuild> {
        self.0.guilds.get(&guild_id).map(|guild| Arc::clone(&guild))
    }

    pub fn guilds(&self) -> Vec<SharedGuild> {
        self.0
            .guilds
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Inserts a fully-hydrated guild, replacing any previous value
    /// under the same id. The guild becomes visible to lookups only
    /// from this point on.
    pub fn insert_guild(&self, guild: Guild) -> SharedGuild {
        let guild_id = guild.id;
        let channel_ids: Vec<ChannelId> = guild.channel_ids().collect();
        let shared = Arc::new(RwLock::new(guild));

        self.0.unavailable_guilds.remove(&guild_id);
        if let Some((_, old)) = self.0.guilds.remove(&guild_id) {
            self.release_guild(&old);
        }
        for channel_id in channel_ids {
            self.0.guild_channels.insert(channel_id, guild_id);
        }
        self.0.guilds.insert(guild_id, Arc::clone(&shared));
        shared
    }

    pub fn remove_guild(&self, guild_id: GuildId) -> Option<SharedGuild> {
        self.0.unavailable_guilds.remove(&guild_id);
        let (_, guild) = self.0.guilds.remove(&guild_id)?;
        self.release_guild(&guild);
        Some(guild)
    }

    /// Flags a guild as unavailable without evicting it; a later
    /// insert clears the flag.
    pub fn mark_unavailable(&self, guild_id: GuildId) {
        self.0.unavailable_guilds.insert(guild_id);
    }

    pub fn is_unavailable(&self, guild_id: GuildId) -> bool {
        self.0.unavailable_guilds.contains(&guild_id)
    }

    fn release_guild(&self, guild: &SharedGuild) {
        let guild = guild.read().expect("guild lock poisoned");
        for member_id in guild.member_ids() {
            self.deref_user(member_id);
        }
        for channel_id in guild.channel_ids() {
            self.0.guild_channels.remove(&channel_id);
        }
    }

    // Channels

    pub fn channel(&self, channel_id: ChannelId) -> Option<Channel> {
        let guild_id = *self.0.guild_channels.get(&channel_id)?;
        let guild = self.guild(guild_id)?;
        let channel = guild
            .read()
            .expect("guild lock poisoned")
            .channel(channel_id)
            .cloned();
        channel
    }

    /// Guild owning the channel, resolved through the channel index.
    pub fn channel_guild(&self, channel_id: ChannelId) -> Option<SharedGuild> {
        let guild_id = *self.0.guild_channels.get(&channel_id)?;
        self.guild(guild_id)
    }

    pub(crate) fn register_channel(&self, channel_id: ChannelId, guild_id: GuildId) {
        self.0.guild_channels.insert(channel_id, guild_id);
    }

    pub(crate) fn unregister_channel(&self, channel_id: ChannelId) {
        self.0.guild_channels.remove(&channel_id);
    }

    // Users

    /// Fetches or creates the pooled user for this payload and takes
    /// one reference on it. Existing entries are updated in place, so
    /// every live handle observes the new fields.
    pub fn store_user(&self, payload: &UserPayload) -> SharedUser {
        match self.0.users.entry(payload.id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.user
                    .write()
                    .expect("user lock poisoned")
                    .apply(payload);
                slot.refs += 1;
                Arc::clone(&slot.user)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let user = Arc::new(RwLock::new(User::from_payload(payload)));
                entry.insert(UserEntry {
                    user: Arc::clone(&user),
                    refs: 1,
                });
                user
            }
        }
    }

    /// Applies a user payload to the pooled user without taking a
    /// reference. No-op if the user is not pooled.
    pub fn update_user(&self, payload: &UserPayload) -> Option<SharedUser> {
        let entry = self.0.users.get(&payload.id)?;
        entry
            .user
            .write()
            .expect("user lock poisoned")
            .apply(payload);
        Some(Arc::clone(&entry.user))
    }

    /// Drops one reference on a pooled user, evicting it at zero.
    /// No-op if the user is not pooled.
    pub fn deref_user(&self, user_id: UserId) {
        if let dashmap::mapref::entry::Entry::Occupied(mut entry) = self.0.users.entry(user_id) {
            let slot = entry.get_mut();
            slot.refs = slot.refs.saturating_sub(1);
            if slot.refs == 0 {
                entry.remove();
            }
        }
    }

    pub fn user(&self, user_id: UserId) -> Option<SharedUser> {
        self.0
            .users
            .get(&user_id)
            .map(|entry| Arc::clone(&entry.user))
    }

    #[cfg(test)]
    pub(crate) fn user_ref_count(&self, user_id: UserId) -> usize {
        self.0.users.get(&user_id).map_or(0, |entry| entry.refs)
    }

    // Members

    pub fn member(&self, guild_id: GuildId, user_id: UserId) -> Option<SharedMember> {
        let guild = self.guild(guild_id)?;
        let member = guild
            .read()
            .expect("guild lock poisoned")
            .member(user_id)
            .cloned();
        member
    }

    /// Inserts a member into its guild, releasing the user reference
    /// held by any member it displaces. The member's own user must
    /// already be retained by the caller.
    pub fn put_member(&self, guild_id: GuildId, member: Member) -> Option<SharedMember> {
        let guild = self.guild(guild_id)?;
        let user_id = member.id;
        let shared = Arc::new(RwLock::new(member));
        let displaced = guild
            .write()
            .expect("guild lock poisoned")
            .add_member(user_id, Arc::clone(&shared));
        if displaced.is_some() {
            self.deref_user(user_id);
        }
        Some(shared)
    }

    pub fn remove_member(&self, guild_id: GuildId, user_id: UserId) -> Option<SharedMember> {
        let guild = self.guild(guild_id)?;
        let removed = guild
            .write()
            .expect("guild lock poisoned")
            .remove_member(user_id);
        if removed.is_some() {
            self.deref_user(user_id);
        }
        removed
    }

    // Messages

    /// Caches a message, evicting the oldest once the configured
    /// capacity is exceeded. Re-caching an id keeps its original queue
    /// slot and releases the users the displaced value retained.
    pub fn cache_message(&self, message: Message) -> SharedMessage {
        let message_id = message.id;
        let shared = Arc::new(RwLock::new(message));

        if let Some(previous) = self
            .0
            .messages
            .insert(message_id, Arc::clone(&shared))
        {
            self.release_message(&previous);
            return shared;
        }

        let mut order = self
            .0
            .message_order
            .lock()
            .expect("message order lock poisoned");
        order.push_back(message_id);
        while order.len() > self.0.config.message_cache_size {
            if let Some(evicted) = order.pop_front() {
                if let Some((_, old)) = self.0.messages.remove(&evicted) {
                    self.release_message(&old);
                }
            }
        }
        shared
    }

    pub fn message(&self, message_id: MessageId) -> Option<SharedMessage> {
        self.0
            .messages
            .get(&message_id)
            .map(|message| Arc::clone(&message))
    }

    pub fn remove_message(&self, message_id: MessageId) -> Option<SharedMessage> {
        let (_, message) = self.0.messages.remove(&message_id)?;
        self.release_message(&message);
        self.0
            .message_order
            .lock()
            .expect("message order lock poisoned")
            .retain(|id| *id != message_id);
        Some(message)
    }

    fn release_message(&self, message: &SharedMessage) {
        let retained = message
            .read()
            .expect("message lock poisoned")
            .retained_users();
        for user_id in retained {
            self.deref_user(user_id);
        }
    }

    /// Drops all cached state.
    pub fn clear(&self) {
        self.0.guilds.clear();
        self.0.guild_channels.clear();
        self.0.unavailable_guilds.clear();
        self.0.users.clear();
        self.0.messages.clear();
        self.0
            .message_order
            .lock()
            .expect("message order lock poisoned")
            .clear();
        self.0
            .current_user
            .lock()
            .expect("current user lock poisoned")
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelId, MessagePayload, UpdateContext};
    use static_assertions::assert_impl_all;

    assert_impl_all!(StateCache: Clone, Send, Sync);

    fn user_payload(id: u64, name: &str) -> UserPayload {
        UserPayload {
            id: UserId(id),
            username: name.to_owned(),
            avatar: None,
            bot: false,
        }
    }

    fn message_payload(id: u64, author_id: u64) -> MessagePayload {
        MessagePayload {
            id: MessageId(id),
            channel_id: Some(ChannelId(1)),
            guild_id: None,
            author: Some(user_payload(author_id, "author")),
            member: None,
            mentions: None,
            content: Some("hello".to_owned()),
            embeds: None,
            attachments: None,
            edited_timestamp: None,
            mention_everyone: None,
            mention_roles: None,
            message_reference: None,
        }
    }

    fn cache_message(cache: &StateCache, id: u64, author_id: u64) -> SharedMessage {
        let payload = message_payload(id, author_id);
        let ctx = UpdateContext { cache, guild: None };
        let message = Message::new(&payload, ChannelId(1), None, &ctx);
        cache.cache_message(message)
    }

    #[test]
    fn test_user_pool_returns_one_handle_per_id() {
        let cache = StateCache::new();
        let first = cache.store_user(&user_payload(1, "alpha"));
        let second = cache.store_user(&user_payload(1, "beta"));

        assert!(Arc::ptr_eq(&first, &second));
        // The second store updated the shared value in place.
        assert_eq!(first.read().unwrap().name, "beta");
        assert_eq!(cache.user_ref_count(UserId(1)), 2);
    }

    #[test]
    fn test_deref_user_evicts_at_zero() {
        let cache = StateCache::new();
        cache.store_user(&user_payload(1, "alpha"));
        cache.store_user(&user_payload(1, "alpha"));

        cache.deref_user(UserId(1));
        assert!(cache.user(UserId(1)).is_some());
        cache.deref_user(UserId(1));
        assert!(cache.user(UserId(1)).is_none());
        // Releasing an absent user is a no-op.
        cache.deref_user(UserId(1));
    }

    #[test]
    fn test_update_user_takes_no_reference() {
        let cache = StateCache::new();
        cache.store_user(&user_payload(1, "alpha"));
        cache.update_user(&user_payload(1, "beta"));

        assert_eq!(cache.user_ref_count(UserId(1)), 1);
        assert_eq!(cache.user(UserId(1)).unwrap().read().unwrap().name, "beta");
        assert!(cache.update_user(&user_payload(9, "ghost")).is_none());
    }

    #[test]
    fn test_message_cache_evicts_fifo() {
        let cache = StateCache::builder().message_cache_size(2).build();
        cache_message(&cache, 1, 50);
        cache_message(&cache, 2, 50);
        cache_message(&cache, 3, 50);

        assert!(cache.message(MessageId(1)).is_none());
        assert!(cache.message(MessageId(2)).is_some());
        assert!(cache.message(MessageId(3)).is_some());
        // Each live message retains the shared author once.
        assert_eq!(cache.user_ref_count(UserId(50)), 2);
    }

    #[test]
    fn test_recaching_same_id_keeps_queue_slot() {
        let cache = StateCache::builder().message_cache_size(2).build();
        cache_message(&cache, 1, 50);
        cache_message(&cache, 1, 51);
        cache_message(&cache, 2, 50);

        // Re-caching id 1 must not count as a new slot.
        assert!(cache.message(MessageId(1)).is_some());
        assert!(cache.message(MessageId(2)).is_some());
        // The displaced value's author reference was released.
        assert_eq!(cache.user_ref_count(UserId(50)), 1);
        assert_eq!(cache.user_ref_count(UserId(51)), 1);
    }

    #[test]
    fn test_remove_message_releases_users() {
        let cache = StateCache::new();
        cache_message(&cache, 1, 50);
        assert_eq!(cache.user_ref_count(UserId(50)), 1);

        assert!(cache.remove_message(MessageId(1)).is_some());
        assert!(cache.message(MessageId(1)).is_none());
        assert!(cache.user(UserId(50)).is_none());
    }

    #[test]
    fn test_current_user_and_clear() {
        let cache = StateCache::new();
        assert!(cache.current_user().is_none());
        cache.cache_current_user(User::from_payload(&user_payload(9, "bot")));
        assert_eq!(cache.current_user().unwrap().id, UserId(9));

        cache_message(&cache, 1, 50);
        cache.clear();
        assert!(cache.current_user().is_none());
        assert!(cache.message(MessageId(1)).is_none());
        assert!(cache.user(UserId(50)).is_none());
    }
}
