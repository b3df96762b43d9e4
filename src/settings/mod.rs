//! Guild settings cache.
//!
//! Wires the generic cache and router to guild settings:
//! - reads go through `SettingsCache::get_or_fetch`, one fetch per guild at a time
//! - pub/sub updates patch or replace cached records
//! - the gateway's `guildDelete` drops them

mod fetcher;
mod models;

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

pub use fetcher::{SettingsFetcher, StaticFetcher};
pub use models::{GuildBlacklist, GuildDisabledCommand, GuildPrefix, GuildSettings, SettingsPatch};

use crate::cache::{CacheConfig, SingleFlightCache};
use crate::error::EventError;
use crate::events::{Applied, EventBus, Invalidation, InvalidationRouter, Subscription, channels};

/// Per-guild settings cache with single-flight fetches and
/// event-driven invalidation.
///
/// Cloning is cheap; all clones share the same entries.
#[derive(Clone)]
pub struct SettingsCache {
    cache: SingleFlightCache<String, GuildSettings>,
    fetcher: Arc<dyn SettingsFetcher>,
    pubsub: InvalidationRouter<String, GuildSettings>,
    cluster: InvalidationRouter<String, GuildSettings>,
}

impl SettingsCache {
    /// Create a cache with the default guild settings config (2 hour TTL).
    pub fn new(fetcher: Arc<dyn SettingsFetcher>) -> Self {
        Self::with_config(fetcher, &CacheConfig::guild_settings())
    }

    pub fn with_config(fetcher: Arc<dyn SettingsFetcher>, config: &CacheConfig) -> Self {
        let cache = SingleFlightCache::new("guild_settings", config);

        let pubsub = InvalidationRouter::new(cache.store().clone())
            .route(channels::GUILD_BLACKLIST_UPDATE, decode_blacklist_update)
            .route(channels::GUILD_DISABLED_COMMAND_UPDATE, decode_disabled_command_update)
            .route(channels::GUILD_PREFIX_UPDATE, decode_prefix_update)
            .route(channels::GUILD_SETTINGS_UPDATE, decode_settings_update);

        let cluster = InvalidationRouter::new(cache.store().clone())
            .route(channels::GUILD_DELETE, decode_guild_delete);

        Self {
            cache,
            fetcher,
            pubsub,
            cluster,
        }
    }

    /// Get settings for a guild, fetching them if not cached.
    ///
    /// Returns `None` when the fetch fails. Callers cannot tell a missing
    /// guild from a backend error.
    pub async fn get_or_fetch(&self, guild_id: &str) -> Option<GuildSettings> {
        let fetcher = Arc::clone(&self.fetcher);
        self.cache
            .get_or_fetch(guild_id.to_string(), move |id| async move {
                fetcher.fetch(&id).await
            })
            .await
    }

    /// Get cached settings without fetching.
    pub fn get(&self, guild_id: &str) -> Option<GuildSettings> {
        self.cache.store().get(&guild_id.to_string())
    }

    pub fn has(&self, guild_id: &str) -> bool {
        self.cache.store().has(&guild_id.to_string())
    }

    /// Store settings under `guild_id`, e.g. to pre-warm the cache.
    pub fn set(&self, guild_id: impl Into<String>, settings: GuildSettings) {
        self.cache.store().set(guild_id.into(), settings);
    }

    /// Store settings under their own `id`.
    pub fn insert(&self, settings: GuildSettings) {
        self.set(settings.id.clone(), settings);
    }

    pub fn delete(&self, guild_id: &str) {
        self.cache.store().delete(&guild_id.to_string());
    }

    pub fn clear(&self) {
        self.cache.store().clear();
    }

    /// Whether a fetch for `guild_id` is currently outstanding.
    pub fn is_fetching(&self, guild_id: &str) -> bool {
        self.cache.inflight().has(&guild_id.to_string())
    }

    /// Subscribe to the gateway lifecycle events on `cluster` and to the
    /// settings channels on `pubsub`.
    ///
    /// Keep the returned subscriptions alive; dropping them unsubscribes.
    pub fn create(&self, cluster: &dyn EventBus, pubsub: &dyn EventBus) -> Vec<Subscription> {
        let mut subscriptions = self.cluster.subscribe(cluster);
        subscriptions.extend(self.pubsub.subscribe(pubsub));

        info!(
            "Guild settings cache subscribed to {} channels",
            subscriptions.len()
        );
        subscriptions
    }

    /// Apply a message received outside of an `EventBus`.
    pub fn handle_event(&self, channel: &str, payload: &[u8]) -> Result<Applied, EventError> {
        let applied = if self.cluster.channels().iter().any(|c| *c == channel) {
            self.cluster.handle(channel, payload)?
        } else {
            self.pubsub.handle(channel, payload)?
        };

        debug!("{} -> {:?}", channel, applied);
        Ok(applied)
    }
}

impl std::fmt::Debug for SettingsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsCache")
            .field("cache", &self.cache)
            .finish()
    }
}

#[derive(Deserialize)]
struct GuildDeleteEvent {
    #[serde(alias = "guildId", alias = "id")]
    guild_id: String,
}

#[derive(Deserialize)]
struct BlacklistUpdate {
    id: String,
    blacklist: Vec<GuildBlacklist>,
}

#[derive(Deserialize)]
struct DisabledCommandUpdate {
    id: String,
    disabled_commands: Vec<GuildDisabledCommand>,
}

#[derive(Deserialize)]
struct PrefixUpdate {
    id: String,
    prefixes: Vec<GuildPrefix>,
}

type Decoded = Result<Invalidation<String, GuildSettings>, serde_json::Error>;

fn decode_guild_delete(payload: &[u8]) -> Decoded {
    let event: GuildDeleteEvent = serde_json::from_slice(payload)?;
    Ok(Invalidation::Delete(event.guild_id))
}

fn decode_blacklist_update(payload: &[u8]) -> Decoded {
    let update: BlacklistUpdate = serde_json::from_slice(payload)?;
    Ok(Invalidation::Merge(update.id, SettingsPatch::Blacklist(update.blacklist)))
}

fn decode_disabled_command_update(payload: &[u8]) -> Decoded {
    let update: DisabledCommandUpdate = serde_json::from_slice(payload)?;
    Ok(Invalidation::Merge(
        update.id,
        SettingsPatch::DisabledCommands(update.disabled_commands),
    ))
}

fn decode_prefix_update(payload: &[u8]) -> Decoded {
    let update: PrefixUpdate = serde_json::from_slice(payload)?;
    Ok(Invalidation::Merge(update.id, SettingsPatch::Prefixes(update.prefixes)))
}

fn decode_settings_update(payload: &[u8]) -> Decoded {
    let settings: GuildSettings = serde_json::from_slice(payload)?;
    Ok(Invalidation::Replace(settings.id.clone(), settings))
}
