//! Event handling.
//!
//! - `bus` - subscription contract (`EventBus`) and the in-process `LocalBus`
//! - `router` - `InvalidationRouter`, mapping channels to store mutations
//!
//! Add a new invalidation channel by:
//! 1. Adding its name to `channels` below
//! 2. Writing a decoder for its payload
//! 3. Registering both with `InvalidationRouter::route`

pub mod bus;
pub mod router;

pub use bus::{EventBus, Handler, LocalBus, Subscription};
pub use router::{Applied, Decoder, Invalidation, InvalidationRouter, Mergeable};

/// Pub/sub channel names.
pub mod channels {
    pub const GUILD_BLACKLIST_UPDATE: &str = "GUILD_BLACKLIST_UPDATE";
    pub const GUILD_DISABLED_COMMAND_UPDATE: &str = "GUILD_DISABLED_COMMAND_UPDATE";
    pub const GUILD_PREFIX_UPDATE: &str = "GUILD_PREFIX_UPDATE";
    pub const GUILD_SETTINGS_UPDATE: &str = "GUILD_SETTINGS_UPDATE";

    /// Gateway lifecycle event: the bot left or lost a guild.
    pub const GUILD_DELETE: &str = "guildDelete";
}
