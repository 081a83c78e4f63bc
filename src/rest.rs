//! The REST boundary: the trait the state layer drives, plus the
//! request/patch types shared with callers. Implementations own
//! transport, auth and rate limiting.

use crate::models::{
    ChannelId, ChannelPayload, GuildId, MemberPayload, MessageId, MessagePayload, RoleId,
    RolePayload, UserId,
};
use crate::prelude::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Tri-state edit field: leave the remote value alone, clear it, or
/// set a new one. Distinguishes "don't touch" from "set to null",
/// which a plain `Option` cannot express.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

impl<T: Serialize> Patch<T> {
    /// Writes this field into a request body: `Keep` writes nothing,
    /// `Clear` writes an explicit null, `Set` writes the value.
    pub fn apply_to(&self, map: &mut JsonMap, key: &str) -> Result<()> {
        match self {
            Patch::Keep => {}
            Patch::Clear => {
                map.insert(key.to_owned(), serde_json::Value::Null);
            }
            Patch::Set(value) => {
                map.insert(key.to_owned(), serde_json::to_value(value).map_err(Error::Json)?);
            }
        }
        Ok(())
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            // Keep is normally elided via skip_serializing_if; if it
            // does get serialized, null is the least harmful encoding.
            Patch::Keep | Patch::Clear => serializer.serialize_none(),
            Patch::Set(value) => value.serialize(serializer),
        }
    }
}

/// One entry of a bulk channel reposition request.
#[derive(Clone, Debug, Serialize)]
pub struct ChannelPositionUpdate {
    pub id: ChannelId,
    pub position: i64,
    #[serde(skip_serializing_if = "Patch::is_keep")]
    pub parent_id: Patch<ChannelId>,
}

/// Everything a guild sync returns in one round trip.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GuildSyncData {
    #[serde(default)]
    pub channels: Vec<ChannelPayload>,
    #[serde(default)]
    pub roles: Vec<RolePayload>,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
}

/// The REST operations the state layer needs. Kept as a trait so tests
/// can script responses without a transport.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn get_channel(&self, channel_id: ChannelId) -> Result<ChannelPayload>;

    async fn create_channel(&self, guild_id: GuildId, fields: JsonMap) -> Result<ChannelPayload>;

    async fn edit_channel(&self, channel_id: ChannelId, fields: JsonMap) -> Result<ChannelPayload>;

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()>;

    async fn bulk_channel_update(
        &self,
        guild_id: GuildId,
        updates: &[ChannelPositionUpdate],
    ) -> Result<()>;

    async fn get_roles(&self, guild_id: GuildId) -> Result<Vec<RolePayload>>;

    async fn create_role(&self, guild_id: GuildId, fields: JsonMap) -> Result<RolePayload>;

    async fn edit_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        fields: JsonMap,
    ) -> Result<RolePayload>;

    async fn delete_role(&self, guild_id: GuildId, role_id: RoleId) -> Result<()>;

    async fn get_member(&self, guild_id: GuildId, user_id: UserId) -> Result<MemberPayload>;

    /// Fetches the guild's channels, roles and members in one shot,
    /// used to hydrate a guild before it becomes visible.
    async fn sync_guild(&self, guild_id: GuildId) -> Result<GuildSyncData>;

    async fn get_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<MessagePayload>;

    async fn send_message(&self, channel_id: ChannelId, fields: JsonMap) -> Result<MessagePayload>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_apply_to() {
        let mut map = JsonMap::new();
        Patch::<String>::Keep.apply_to(&mut map, "name").unwrap();
        Patch::<String>::Clear.apply_to(&mut map, "topic").unwrap();
        Patch::Set("general".to_owned())
            .apply_to(&mut map, "label")
            .unwrap();

        assert!(!map.contains_key("name"));
        assert_eq!(map["topic"], serde_json::Value::Null);
        assert_eq!(map["label"], json!("general"));
    }

    #[test]
    fn test_position_update_elides_kept_parent() {
        let update = ChannelPositionUpdate {
            id: ChannelId(5),
            position: 2,
            parent_id: Patch::Keep,
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "id": 5, "position": 2 })
        );

        let reparented = ChannelPositionUpdate {
            id: ChannelId(5),
            position: 2,
            parent_id: Patch::Set(ChannelId(9)),
        };
        assert_eq!(
            serde_json::to_value(&reparented).unwrap(),
            json!({ "id": 5, "position": 2, "parent_id": 9 })
        );
    }
}
