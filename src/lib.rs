//! Client-side connection state for a guild chat platform: a cache of
//! guilds, channels, members, roles and recent messages, an event
//! dispatcher that keeps it consistent with the gateway, and
//! fetch-or-cache accessors layered over a pluggable REST client.

#[macro_use]
extern crate lazy_static;

pub mod cache;
pub mod error;
pub mod models;
pub mod prelude;
pub mod rest;
pub mod state;
pub mod util;

pub use crate::{
    cache::{Config, StateCache, StateCacheBuilder},
    error::{Error, Result},
    rest::{ChannelPositionUpdate, GuildSyncData, JsonMap, Patch, RestClient},
    state::{ChannelEdit, Event, MoveTarget, RoleEdit, State},
};
