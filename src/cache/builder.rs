use super::{Config, StateCache};

/// Builder for a [`StateCache`].
#[derive(Clone, Debug, Default)]
pub struct StateCacheBuilder(Config);

impl StateCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bounded message cache capacity. A capacity of zero
    /// disables message caching entirely.
    pub fn message_cache_size(mut self, size: usize) -> Self {
        self.0.message_cache_size = size;
        self
    }

    pub fn build(self) -> StateCache {
        StateCache::with_config(self.0)
    }
}
