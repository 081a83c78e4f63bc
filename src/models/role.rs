use super::{impl_hashable, GuildId, RoleId};
use serde::Deserialize;
use std::cmp::Ordering;

#[derive(Clone, Debug, Deserialize)]
pub struct RolePayload {
    pub id: RoleId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default, deserialize_with = "crate::util::bool_from_any")]
    pub hoist: bool,
}

/// A guild role. Roles are totally ordered within their guild: the
/// default role sorts strictly below every other role, the rest by
/// numeric id ascending.
#[derive(Clone, Debug)]
pub struct Role {
    pub id: RoleId,
    pub guild_id: GuildId,
    pub name: String,
    pub color: u32,
    pub hoist: bool,
}

impl_hashable!(Role);

impl Role {
    pub fn from_payload(payload: &RolePayload, guild_id: GuildId) -> Self {
        Self {
            id: payload.id,
            guild_id,
            name: payload.name.clone(),
            color: payload.color,
            hoist: payload.hoist,
        }
    }

    pub fn apply(&mut self, payload: &RolePayload) {
        self.name = payload.name.clone();
        self.color = payload.color;
        self.hoist = payload.hoist;
    }

    /// The default role shares its id with the guild.
    pub fn is_default(&self) -> bool {
        self.id.0 == self.guild_id.0
    }

    pub fn mention(&self) -> String {
        format!("<@&{}>", self.id)
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    /// Hierarchy order within one guild. Comparing roles from two
    /// different guilds is a programming error and panics.
    fn cmp(&self, other: &Self) -> Ordering {
        assert_eq!(
            self.guild_id, other.guild_id,
            "cannot compare roles from two different guilds"
        );

        match (self.is_default(), other.is_default()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.id.cmp(&other.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: u64, guild: u64) -> Role {
        Role {
            id: RoleId(id),
            guild_id: GuildId(guild),
            name: "test".to_owned(),
            color: 0,
            hoist: false,
        }
    }

    #[test]
    fn test_default_role_is_lowest() {
        let guild = 100;
        let everyone = role(guild, guild);
        let a = role(guild + 5, guild);
        let b = role(guild + 10, guild);

        assert!(everyone < a);
        assert!(everyone < b);
        assert!(a < b);
        // Strictly lowest, never equal-lowest.
        assert!(!(a < everyone));
        assert_eq!(everyone.cmp(&everyone), Ordering::Equal);
    }

    #[test]
    fn test_sorted_hierarchy() {
        let guild = 100;
        let mut roles = vec![role(guild + 10, guild), role(guild, guild), role(guild + 5, guild)];
        roles.sort();
        let ids: Vec<u64> = roles.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![guild, guild + 5, guild + 10]);
    }

    #[test]
    #[should_panic(expected = "two different guilds")]
    fn test_cross_guild_compare_panics() {
        let a = role(1, 100);
        let b = role(2, 200);
        let _ = a < b;
    }
}
