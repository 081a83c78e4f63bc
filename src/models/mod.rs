pub mod channel;
pub mod embed;
pub mod emoji;
pub mod guild;
pub mod member;
pub mod message;
pub mod reaction;
pub mod role;
pub mod user;

pub use self::{
    channel::{Channel, ChannelPayload, ChannelType},
    embed::Embed,
    emoji::{EmojiPayload, PartialEmoji},
    guild::{Guild, GuildPayload, SharedGuild},
    member::{Member, MemberFieldsPayload, MemberPayload, SharedMember},
    message::{
        Attachment, Message, MessagePayload, MessageReference, SharedMessage, UpdateContext,
        UserRef,
    },
    reaction::{Reaction, ReactionPayload},
    role::{Role, RolePayload},
    user::{SharedUser, User, UserPayload},
};

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::time::{Duration, UNIX_EPOCH};

/// Milliseconds between the Unix epoch and the platform's snowflake
/// epoch.
pub const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

pub trait Snowflake {
    fn as_u64(&self) -> u64;

    fn created_at(&self) -> DateTime<Utc> {
        let timestamp = (self.as_u64() >> 22) + SNOWFLAKE_EPOCH_MS;
        DateTime::<Utc>::from(UNIX_EPOCH + Duration::from_millis(timestamp))
    }
}

macro_rules! define_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(pub u64);

        impl Snowflake for $name {
            fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                crate::util::u64_from_any(deserializer).map($name)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_u64(self.0)
            }
        }
    };
}

define_id!(GuildId);
define_id!(ChannelId);
define_id!(UserId);
define_id!(RoleId);
define_id!(MessageId);

/// Implements id-only equality and hashing for an entity with an `id`
/// field. Mutable fields never participate: two snapshots of the same
/// entity compare equal regardless of staleness.
macro_rules! impl_hashable {
    ($ty:ty) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $ty {}

        impl std::hash::Hash for $ty {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                // The low 22 bits carry shard/sequence noise; shift
                // them out for a stable per-entity hash.
                state.write_u64(crate::models::Snowflake::as_u64(&self.id) >> 22);
            }
        }
    };
}

pub(crate) use impl_hashable;

/// Capability interface for anything a message can be sent to.
///
/// Implemented by text channels and by messages (the reply target);
/// replaces the duck-typed "messageable" checks the platform's other
/// client libraries rely on.
pub trait Sendable {
    fn resolve_channel(&self) -> Result<ChannelId>;
}

impl Sendable for ChannelId {
    fn resolve_channel(&self) -> Result<ChannelId> {
        Ok(*self)
    }
}

impl Sendable for Channel {
    fn resolve_channel(&self) -> Result<ChannelId> {
        if self.kind == ChannelType::Text {
            Ok(self.id)
        } else {
            Err(Error::InvalidArgument(format!(
                "channel {} is not a text channel",
                self.id
            )))
        }
    }
}

impl Sendable for Message {
    fn resolve_channel(&self) -> Result<ChannelId> {
        Ok(self.channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_created_at() {
        // Timestamp bits are the id shifted right by 22.
        let id = UserId(175_928_847_299_117_063);
        assert_eq!(id.created_at().timestamp_millis(), 1_462_015_105_796);
    }

    #[test]
    fn test_id_deserializes_from_string_or_number() {
        let from_str: GuildId = serde_json::from_str("\"123\"").unwrap();
        let from_num: GuildId = serde_json::from_str("123").unwrap();
        assert_eq!(from_str, from_num);
    }

    #[test]
    fn test_sendable_channel_id() {
        assert_eq!(ChannelId(7).resolve_channel().unwrap(), ChannelId(7));
    }
}
