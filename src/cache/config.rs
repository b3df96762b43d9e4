//! Cache configuration.

use std::time::Duration;

/// Longest time-to-live a store will honor; larger values are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60); // ~100 years

/// Configuration for a cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on physically stored entries.
    /// Entries past this bound may be evicted before their TTL runs out.
    pub max_capacity: u64,

    /// Time-to-live for cache entries, counted from the last `set`.
    pub ttl: Duration,

    /// Give up on a fetch after this long and treat it as a miss.
    /// `None` leaves timeouts to the fetcher itself.
    pub fetch_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Duration::from_secs(300), // 5 minutes
            fetch_timeout: None,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with the given max capacity.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set max capacity for cache (builder pattern).
    #[must_use]
    pub fn max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Set time-to-live for cache entries. Values above [`MAX_TTL`] are clamped.
    #[must_use]
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = duration.min(MAX_TTL);
        self
    }

    /// Bound every fetch by `duration`.
    #[must_use]
    pub fn fetch_timeout(mut self, duration: Duration) -> Self {
        self.fetch_timeout = Some(duration);
        self
    }

    /// Create config for guild settings.
    /// Settings change rarely and every change is pushed as an event,
    /// so entries can live for hours.
    pub fn guild_settings() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Duration::from_secs(2 * 60 * 60), // 2 hours
            fetch_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_settings_preset() {
        let config = CacheConfig::guild_settings();
        assert_eq!(config.ttl, Duration::from_secs(7200));
        assert!(config.fetch_timeout.is_none());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::with_capacity(50)
            .ttl(Duration::from_secs(10))
            .fetch_timeout(Duration::from_millis(500));

        assert_eq!(config.max_capacity, 50);
        assert_eq!(config.ttl, Duration::from_secs(10));
        assert_eq!(config.fetch_timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let config = CacheConfig::guild_settings().ttl(Duration::from_secs(u64::MAX));
        assert_eq!(config.ttl, MAX_TTL);
    }
}
