//! Cache module - TTL storage and single-flight population.
//!
//! ## Architecture
//!
//! - `TtlStore` - key/value store with a fixed per-entry time-to-live (Moka)
//! - `InFlightRegistry` - outstanding fetches, at most one per key (DashMap)
//! - `SingleFlightCache` - composes both behind `get_or_fetch`
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cache = SingleFlightCache::<String, Settings>::new("settings", &CacheConfig::default());
//!
//! // Concurrent callers for the same key share a single fetch
//! let settings = cache.get_or_fetch(guild_id, |id| async move { api.fetch(&id).await }).await;
//!
//! // Event handlers mutate the store directly
//! cache.store().delete(&guild_id);
//! ```

mod config;
mod inflight;
mod single_flight;
mod store;

pub use config::{CacheConfig, MAX_TTL};
pub use inflight::{Claim, InFlight, InFlightRegistry};
pub use single_flight::SingleFlightCache;
pub use store::{CacheEntry, TtlStore};
