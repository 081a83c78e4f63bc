use super::emoji::EmojiPayload;
use super::{ChannelId, GuildId, MessageId, PartialEmoji, SharedMessage, UserId};
use crate::cache::StateCache;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct ReactionPayload {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub guild_id: Option<GuildId>,
    pub emoji: EmojiPayload,
}

/// A reaction added to or removed from a message. Carries ids rather
/// than entity handles so it stays usable after the message leaves the
/// bounded cache.
#[derive(Clone, Debug)]
pub struct Reaction {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub guild_id: Option<GuildId>,
    pub emoji: PartialEmoji,
}

impl Reaction {
    pub fn from_payload(payload: &ReactionPayload) -> Self {
        Self {
            message_id: payload.message_id,
            channel_id: payload.channel_id,
            user_id: payload.user_id,
            guild_id: payload.guild_id,
            emoji: PartialEmoji::from_payload(&payload.emoji),
        }
    }

    /// The reacted-to message, if it is still in the bounded cache.
    pub fn cached_message(&self, cache: &StateCache) -> Option<SharedMessage> {
        cache.message(self.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_payload_parses_emoji() {
        let payload: ReactionPayload = serde_json::from_value(json!({
            "message_id": 900,
            "channel_id": 10,
            "user_id": 7,
            "guild_id": 100,
            "emoji": { "id": "1234567890123", "type": 1 },
        }))
        .unwrap();
        let reaction = Reaction::from_payload(&payload);
        assert_eq!(reaction.message_id, MessageId(900));
        assert_eq!(reaction.user_id, UserId(7));
        assert!(reaction.emoji.is_custom());
    }

    #[test]
    fn test_guild_id_is_optional() {
        let payload: ReactionPayload = serde_json::from_value(json!({
            "message_id": 900,
            "channel_id": 10,
            "user_id": 7,
            "emoji": { "id": "👍" },
        }))
        .unwrap();
        let reaction = Reaction::from_payload(&payload);
        assert_eq!(reaction.guild_id, None);
        assert!(reaction.emoji.is_unicode());
    }
}
