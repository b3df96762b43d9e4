//! guildcache - Guild settings cache
//!
//! Keeps per-guild settings close to the request handlers that read them,
//! so a burst of commands in one guild costs at most one round trip to the
//! settings service.
//!
//! ## Architecture
//!
//! - `cache` - TTL store, in-flight registry, single-flight `get_or_fetch`
//! - `events` - event bus contract and the invalidation router
//! - `settings` - guild settings records, fetcher, and `SettingsCache`
//! - `config` - Environment configuration
//! - `error` - Error types

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod settings;

pub use cache::{CacheConfig, SingleFlightCache, TtlStore};
pub use config::Config;
pub use error::{Error, EventError, FetchError, Result};
pub use events::{EventBus, LocalBus, Subscription};
pub use settings::{GuildSettings, SettingsCache, SettingsFetcher, StaticFetcher};
