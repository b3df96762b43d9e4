//! Configuration module for guildcached.
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::cache::{CacheConfig, MAX_TTL};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Settings cache tuning (TTL, capacity, fetch timeout).
    pub cache: CacheConfig,

    /// JSON file with the records the local fetcher serves.
    /// Without it, every fetch misses.
    pub seed_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to `CacheConfig::guild_settings()`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut cache = CacheConfig::guild_settings();

        if let Some(secs) = parse_var::<u64>("GUILDCACHE_TTL_SECS") {
            cache = cache.ttl(ttl_from_secs(secs));
        }

        if let Some(capacity) = parse_var::<u64>("GUILDCACHE_MAX_CAPACITY") {
            cache = cache.max_capacity(capacity);
        }

        // 0 disables the timeout
        if let Some(ms) = parse_var::<u64>("GUILDCACHE_FETCH_TIMEOUT_MS")
            && ms > 0
        {
            cache = cache.fetch_timeout(Duration::from_millis(ms));
        }

        let seed_path = env::var("GUILDCACHE_SEED_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self { cache, seed_path }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    parse_value(name, env::var(name).ok().as_deref())
}

/// Parse a raw variable value, warning about (and ignoring) garbage.
fn parse_value<T: std::str::FromStr>(name: &str, raw: Option<&str>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}

fn ttl_from_secs(secs: u64) -> Duration {
    let ttl = Duration::from_secs(secs);
    if ttl > MAX_TTL {
        warn!("GUILDCACHE_TTL_SECS={} is too large, using {:?}", secs, MAX_TTL);
        return MAX_TTL;
    }
    ttl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u64>("TTL", Some(" 42 ")), Some(42));
        assert_eq!(parse_value::<u64>("TTL", Some("forty-two")), None);
        assert_eq!(parse_value::<u64>("TTL", Some("-1")), None);
        assert_eq!(parse_value::<u64>("TTL", None), None);
    }

    #[test]
    fn test_ttl_from_secs_clamps() {
        assert_eq!(ttl_from_secs(3600), Duration::from_secs(3600));
        assert_eq!(ttl_from_secs(u64::MAX), MAX_TTL);
    }
}
