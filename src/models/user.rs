use super::{impl_hashable, UserId};
use serde::Deserialize;
use std::sync::{Arc, RwLock};

/// Handle to a pooled user. The cache guarantees at most one live
/// `User` per id, so every holder of this handle observes field
/// updates without re-fetching.
pub type SharedUser = Arc<RwLock<User>>;

#[derive(Clone, Debug, Deserialize)]
pub struct UserPayload {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// A platform user, independent of any guild.
#[derive(Clone, Debug)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
    pub bot: bool,
}

impl_hashable!(User);

impl User {
    pub fn from_payload(payload: &UserPayload) -> Self {
        Self {
            id: payload.id,
            name: payload.username.clone(),
            avatar: payload.avatar.clone(),
            bot: payload.bot,
        }
    }

    /// Applies a partial user payload in place. The id never changes.
    pub fn apply(&mut self, payload: &UserPayload) {
        if !payload.username.is_empty() {
            self.name = payload.username.clone();
        }
        if payload.avatar.is_some() {
            self.avatar = payload.avatar.clone();
        }
        self.bot = payload.bot;
    }

    /// The mention token that resolves to this user in message content.
    pub fn mention(&self) -> String {
        format!("<@!{}>", self.id)
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }
}
