/// Configuration for a [`StateCache`](super::StateCache).
#[derive(Clone, Debug)]
pub struct Config {
    pub(super) message_cache_size: usize,
}

impl Config {
    /// Maximum number of messages retained before the oldest is
    /// evicted.
    pub fn message_cache_size(&self) -> usize {
        self.message_cache_size
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            message_cache_size: 1000,
        }
    }
}
