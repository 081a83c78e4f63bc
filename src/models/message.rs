use super::{
    impl_hashable, Channel, ChannelId, Embed, Guild, GuildId, Member, MemberFieldsPayload,
    MessageId, Role, RoleId, SharedGuild, SharedMember, SharedUser, UserId, UserPayload,
};
use crate::cache::StateCache;
use crate::util::{self, mentions, parse_timestamp};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Handle to a cached message. Message updates mutate the cached
/// value in place so every holder observes the edit.
pub type SharedMessage = Arc<RwLock<Message>>;

/// A message author or mention target: a guild member when guild
/// context is available, otherwise a plain pooled user.
#[derive(Clone, Debug)]
pub enum UserRef {
    User(SharedUser),
    Member(SharedMember),
}

impl UserRef {
    pub fn id(&self) -> UserId {
        match self {
            UserRef::User(user) => user.read().expect("user lock poisoned").id,
            UserRef::Member(member) => member.read().expect("member lock poisoned").id,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            UserRef::User(user) => user.read().expect("user lock poisoned").name.clone(),
            UserRef::Member(member) => member.read().expect("member lock poisoned").display_name(),
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, UserRef::Member(_))
    }

    /// The underlying pooled user, regardless of variant.
    pub fn user(&self) -> SharedUser {
        match self {
            UserRef::User(user) => Arc::clone(user),
            UserRef::Member(member) => {
                Arc::clone(&member.read().expect("member lock poisoned").user)
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AttachmentPayload {
    pub id: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub filename: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct Attachment {
    pub id: Option<String>,
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Attachment {
    pub fn from_payload(payload: &AttachmentPayload) -> Self {
        // The wire sometimes omits the scheme from attachment URLs.
        let url = if payload.url.is_empty() || payload.url.contains("://") {
            payload.url.clone()
        } else {
            format!("https://{}", payload.url)
        };
        Self {
            id: payload.id.clone(),
            url,
            filename: payload.filename.clone(),
            content_type: payload.content_type.clone(),
            size: payload.size,
            width: payload.width,
            height: payload.height,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A pointer to another message, used for replies. Serializes directly
/// as the wire's `message_reference` object.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MessageReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
    #[serde(default = "default_true")]
    pub fail_if_not_exists: bool,
}

impl MessageReference {
    pub fn from_message(message: &Message, fail_if_not_exists: bool) -> Self {
        Self {
            message_id: Some(message.id),
            channel_id: Some(message.channel_id),
            guild_id: message.guild_id,
            fail_if_not_exists,
        }
    }

    /// The referenced message, if it is still in the bounded cache.
    pub fn cached_message(&self, cache: &StateCache) -> Option<SharedMessage> {
        self.message_id.and_then(|id| cache.message(id))
    }
}

/// A mention entry: a user payload with an optional embedded member
/// sub-payload.
#[derive(Clone, Debug, Deserialize)]
pub struct MentionPayload {
    #[serde(flatten)]
    pub user: UserPayload,
    pub member: Option<MemberFieldsPayload>,
}

/// Raw message payload. Every field except `id` is optional: message
/// update events carry only the fields that changed.
#[derive(Clone, Debug, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub channel_id: Option<ChannelId>,
    pub guild_id: Option<GuildId>,
    pub author: Option<UserPayload>,
    pub member: Option<MemberFieldsPayload>,
    pub mentions: Option<Vec<MentionPayload>>,
    pub content: Option<String>,
    pub embeds: Option<Vec<Embed>>,
    pub attachments: Option<Vec<AttachmentPayload>>,
    pub edited_timestamp: Option<String>,
    #[serde(default, deserialize_with = "util::bool_from_any_opt")]
    pub mention_everyone: Option<bool>,
    pub mention_roles: Option<Vec<RoleId>>,
    pub message_reference: Option<MessageReference>,
}

/// Cache and guild context threaded through message construction and
/// updates.
pub struct UpdateContext<'a> {
    pub cache: &'a StateCache,
    pub guild: Option<&'a SharedGuild>,
}

/// Lazily-computed content derivations, discarded whenever the message
/// is updated.
#[derive(Clone, Debug, Default)]
struct Derived {
    raw_mentions: Option<Vec<UserId>>,
    raw_channel_mentions: Option<Vec<ChannelId>>,
    raw_role_mentions: Option<Vec<RoleId>>,
    channel_mentions: Option<Vec<Channel>>,
    clean_content: Option<String>,
}

type UpdateHandler = fn(&mut Message, &UpdateContext<'_>, &MessagePayload);

// Field handlers run in a fixed order. Author must precede member:
// the member handler layers guild fields over the author the payload
// just produced.
const UPDATE_HANDLERS: &[UpdateHandler] = &[
    Message::handle_author,
    Message::handle_member,
    Message::handle_content,
    Message::handle_mentions,
    Message::handle_mention_roles,
    Message::handle_mention_everyone,
    Message::handle_attachments,
    Message::handle_embeds,
    Message::handle_edited_timestamp,
];

#[derive(Clone, Debug)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: Option<UserRef>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub mentions: Vec<UserRef>,
    pub role_mentions: Vec<Role>,
    pub mention_everyone: bool,
    pub reference: Option<MessageReference>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    derived: Derived,
}

impl_hashable!(Message);

impl Message {
    pub fn new(
        payload: &MessagePayload,
        channel_id: ChannelId,
        guild_id: Option<GuildId>,
        ctx: &UpdateContext<'_>,
    ) -> Self {
        let mut message = Self {
            id: payload.id,
            channel_id,
            guild_id,
            author: None,
            content: String::new(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            mentions: Vec::new(),
            role_mentions: Vec::new(),
            mention_everyone: false,
            reference: payload.message_reference.clone(),
            created_at: Utc::now(),
            edited_at: None,
            derived: Derived::default(),
        };
        message.apply(ctx, payload);
        message
    }

    /// Applies a partial message payload in place. Absent fields are
    /// left untouched; content derivations are recomputed on demand.
    pub fn apply(&mut self, ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        self.derived = Derived::default();
        for handler in UPDATE_HANDLERS {
            handler(self, ctx, payload);
        }
    }

    fn handle_author(&mut self, ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        let author = match &payload.author {
            Some(author) => author,
            None => return,
        };
        if let Some(old) = &self.author {
            ctx.cache.deref_user(old.id());
        }
        let user = ctx.cache.store_user(author);
        let member = ctx.guild.and_then(|guild| {
            guild
                .read()
                .expect("guild lock poisoned")
                .member(author.id)
                .cloned()
        });
        self.author = Some(match member {
            Some(member) => UserRef::Member(member),
            None => UserRef::User(user),
        });
    }

    fn handle_member(&mut self, _ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        let fields = match &payload.member {
            Some(fields) => fields,
            None => return,
        };
        match &self.author {
            Some(UserRef::Member(member)) => {
                member
                    .write()
                    .expect("member lock poisoned")
                    .update_from_message(fields);
            }
            Some(UserRef::User(user)) => {
                if let Some(guild_id) = self.guild_id {
                    let member = Member::from_message_fields(Arc::clone(user), guild_id, fields);
                    self.author = Some(UserRef::Member(Arc::new(RwLock::new(member))));
                }
            }
            None => {
                warn!(
                    "message {} carries member fields without an author; ignoring them",
                    self.id
                );
            }
        }
    }

    fn handle_content(&mut self, _ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        if let Some(content) = &payload.content {
            self.content = content.clone();
        }
    }

    fn handle_mentions(&mut self, ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        let entries = match &payload.mentions {
            Some(entries) => entries,
            None => return,
        };
        for old in self.mentions.drain(..) {
            ctx.cache.deref_user(old.id());
        }
        let mut new_mentions = Vec::with_capacity(entries.len());
        for entry in entries {
            let user = ctx.cache.store_user(&entry.user);
            let cached = ctx.guild.and_then(|guild| {
                guild
                    .read()
                    .expect("guild lock poisoned")
                    .member(entry.user.id)
                    .cloned()
            });
            let mention = if let Some(member) = cached {
                UserRef::Member(member)
            } else if let (Some(fields), Some(guild_id)) = (&entry.member, self.guild_id) {
                UserRef::Member(Arc::new(RwLock::new(Member::from_message_fields(
                    user, guild_id, fields,
                ))))
            } else {
                UserRef::User(user)
            };
            new_mentions.push(mention);
        }
        self.mentions = new_mentions;
    }

    fn handle_mention_roles(&mut self, ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        let ids = match &payload.mention_roles {
            Some(ids) => ids,
            None => return,
        };
        let mut roles = Vec::new();
        if let Some(guild) = ctx.guild {
            let guild = guild.read().expect("guild lock poisoned");
            for id in ids {
                // A role deleted between send and dispatch is skipped.
                if let Some(role) = guild.role(*id) {
                    roles.push(role.clone());
                }
            }
        }
        self.role_mentions = roles;
    }

    fn handle_mention_everyone(&mut self, _ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        if let Some(mention_everyone) = payload.mention_everyone {
            self.mention_everyone = mention_everyone;
        }
    }

    fn handle_attachments(&mut self, _ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        if let Some(attachments) = &payload.attachments {
            self.attachments = attachments.iter().map(Attachment::from_payload).collect();
        }
    }

    fn handle_embeds(&mut self, _ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        if let Some(embeds) = &payload.embeds {
            self.embeds = embeds.clone();
        }
    }

    fn handle_edited_timestamp(&mut self, _ctx: &UpdateContext<'_>, payload: &MessagePayload) {
        if let Some(edited) = payload.edited_timestamp.as_deref().and_then(parse_timestamp) {
            self.edited_at = Some(edited);
        }
    }

    /// Ids of every pooled user this message holds alive: the author
    /// plus each mention. Duplicates are intentional; the pool is
    /// reference counted and each slot was retained separately.
    pub(crate) fn retained_users(&self) -> Vec<UserId> {
        let mut ids = Vec::with_capacity(self.mentions.len() + 1);
        if let Some(author) = &self.author {
            ids.push(author.id());
        }
        ids.extend(self.mentions.iter().map(UserRef::id));
        ids
    }

    /// User ids found in the raw content, cached until the next update.
    pub fn raw_mentions(&mut self) -> Vec<UserId> {
        if let Some(cached) = &self.derived.raw_mentions {
            return cached.clone();
        }
        let ids = mentions::user_mention_ids(&self.content);
        self.derived.raw_mentions = Some(ids.clone());
        ids
    }

    pub fn raw_channel_mentions(&mut self) -> Vec<ChannelId> {
        if let Some(cached) = &self.derived.raw_channel_mentions {
            return cached.clone();
        }
        let ids = mentions::channel_mention_ids(&self.content);
        self.derived.raw_channel_mentions = Some(ids.clone());
        ids
    }

    pub fn raw_role_mentions(&mut self) -> Vec<RoleId> {
        if let Some(cached) = &self.derived.raw_role_mentions {
            return cached.clone();
        }
        let ids = mentions::role_mention_ids(&self.content);
        self.derived.raw_role_mentions = Some(ids.clone());
        ids
    }

    /// Channels mentioned in the content that resolve in the given
    /// guild, deduplicated in first-appearance order.
    pub fn channel_mentions(&mut self, guild: Option<&Guild>) -> Vec<Channel> {
        if let Some(cached) = &self.derived.channel_mentions {
            return cached.clone();
        }
        let mut seen = HashSet::new();
        let mut channels = Vec::new();
        if let Some(guild) = guild {
            for id in self.raw_channel_mentions() {
                if seen.insert(id) {
                    if let Some(channel) = guild.channel(id) {
                        channels.push(channel.clone());
                    }
                }
            }
        }
        self.derived.channel_mentions = Some(channels.clone());
        channels
    }

    /// The content with mention tokens replaced by readable names:
    /// `<#id>` becomes `#channel`, `<@id>`/`<@!id>` becomes `@name`,
    /// and with guild context `<@&id>` becomes `@role`. Substitution is
    /// a single pass, so replacement text is never re-substituted.
    /// Anything left that could still ping (`@everyone`, `@here`, raw
    /// mention ids) is neutralized with a zero-width space.
    pub fn clean_content(&mut self, guild: Option<&Guild>) -> String {
        if let Some(cached) = &self.derived.clean_content {
            return cached.clone();
        }

        let mut replacements: HashMap<String, String> = HashMap::new();
        for channel in self.channel_mentions(guild) {
            replacements.insert(channel.mention(), format!("#{}", channel.name));
        }
        for mention in &self.mentions {
            let id = mention.id();
            let name = format!("@{}", mention.display_name());
            replacements.insert(format!("<@{}>", id), name.clone());
            replacements.insert(format!("<@!{}>", id), name);
        }
        if guild.is_some() {
            for role in &self.role_mentions {
                replacements.insert(role.mention(), format!("@{}", role.name));
            }
        }

        let cleaned = if replacements.is_empty() {
            self.content.clone()
        } else {
            // Longer tokens first so `<@!id>` wins over a prefix match.
            let mut tokens: Vec<&String> = replacements.keys().collect();
            tokens.sort_by_key(|token| std::cmp::Reverse(token.len()));
            let pattern = tokens
                .iter()
                .map(|token| regex::escape(token))
                .collect::<Vec<_>>()
                .join("|");
            let matcher = Regex::new(&pattern).expect("escaped mention tokens form a valid regex");
            matcher
                .replace_all(&self.content, |caps: &regex::Captures<'_>| {
                    replacements[&caps[0]].clone()
                })
                .into_owned()
        };
        let cleaned = mentions::escape_mentions(&cleaned);

        self.derived.clean_content = Some(cleaned.clone());
        cleaned
    }

    /// A reference to this message, suitable for replies.
    pub fn to_reference(&self, fail_if_not_exists: bool) -> MessageReference {
        MessageReference::from_message(self, fail_if_not_exists)
    }
}
