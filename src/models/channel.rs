use super::{impl_hashable, ChannelId, GuildId, MessageId};
use serde::{Deserialize, Serialize, Serializer};

/// Channel kinds and their wire tags. An unlisted tag is not a
/// constructible channel.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChannelType {
    Text,
    Voice,
    Category,
    Live,
    App,
    Thread,
}

impl ChannelType {
    pub fn from_wire(value: u32) -> Option<ChannelType> {
        match value {
            0 => Some(ChannelType::Text),
            2 => Some(ChannelType::Voice),
            4 => Some(ChannelType::Category),
            10005 => Some(ChannelType::Live),
            10006 => Some(ChannelType::App),
            10007 => Some(ChannelType::Thread),
            _ => None,
        }
    }

    pub fn wire(self) -> u32 {
        match self {
            ChannelType::Text => 0,
            ChannelType::Voice => 2,
            ChannelType::Category => 4,
            ChannelType::Live => 10005,
            ChannelType::App => 10006,
            ChannelType::Thread => 10007,
        }
    }
}

impl Serialize for ChannelType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.wire())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChannelPayload {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: Option<u32>,
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub name: String,
    pub position: Option<i64>,
    pub parent_id: Option<ChannelId>,
}

/// A sub-destination within a guild. Position is an ordering key for
/// UI sort, not necessarily contiguous; ties break by id ascending.
#[derive(Clone, Debug)]
pub struct Channel {
    pub id: ChannelId,
    pub kind: ChannelType,
    pub guild_id: GuildId,
    pub name: String,
    pub position: i64,
    pub parent_id: Option<ChannelId>,
    pub last_message_id: Option<MessageId>,
}

impl_hashable!(Channel);

impl Channel {
    /// Constructs a channel from a payload, or `None` when the type
    /// tag is unrecognized. Callers decide whether that is a skip
    /// (guild sync) or a hard failure (direct fetch).
    pub fn from_payload(payload: &ChannelPayload, guild_id: GuildId) -> Option<Channel> {
        let kind = ChannelType::from_wire(payload.kind?)?;
        Some(Channel {
            id: payload.id,
            kind,
            guild_id,
            name: payload.name.clone(),
            position: payload.position.unwrap_or(0),
            // The wire uses a zero parent id for "no category".
            parent_id: payload.parent_id.filter(|id| id.0 != 0),
            last_message_id: None,
        })
    }

    /// Applies a partial channel payload in place.
    pub fn apply(&mut self, payload: &ChannelPayload) {
        if !payload.name.is_empty() {
            self.name = payload.name.clone();
        }
        if let Some(position) = payload.position {
            self.position = position;
        }
        if payload.parent_id.is_some() {
            self.parent_id = payload.parent_id.filter(|id| id.0 != 0);
        }
        if let Some(kind) = payload.kind.and_then(ChannelType::from_wire) {
            self.kind = kind;
        }
    }

    /// Sibling channels compete for position only within the same
    /// sorting bucket.
    pub fn sorting_bucket(&self) -> ChannelType {
        self.kind
    }

    pub fn sort_key(&self) -> (i64, u64) {
        (self.position, self.id.0)
    }

    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: u64, kind: u32, position: i64) -> ChannelPayload {
        ChannelPayload {
            id: ChannelId(id),
            kind: Some(kind),
            guild_id: None,
            name: "general".to_owned(),
            position: Some(position),
            parent_id: None,
        }
    }

    #[test]
    fn test_unknown_type_tag() {
        let mut p = payload(1, 9999, 0);
        assert!(Channel::from_payload(&p, GuildId(1)).is_none());
        p.kind = None;
        assert!(Channel::from_payload(&p, GuildId(1)).is_none());
    }

    #[test]
    fn test_zero_parent_means_no_category() {
        let mut p = payload(1, 0, 0);
        p.parent_id = Some(ChannelId(0));
        let channel = Channel::from_payload(&p, GuildId(1)).unwrap();
        assert_eq!(channel.parent_id, None);
    }

    #[test]
    fn test_sort_key_breaks_ties_by_id() {
        let a = Channel::from_payload(&payload(1, 0, 3), GuildId(1)).unwrap();
        let b = Channel::from_payload(&payload(2, 0, 3), GuildId(1)).unwrap();
        assert!(a.sort_key() < b.sort_key());
    }
}
