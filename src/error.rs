//! Error types.

use thiserror::Error;

/// Why a settings fetch produced no record.
///
/// These never escape `get_or_fetch`; they are logged and turned into a miss.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("guild {0} not found")]
    NotFound(String),

    #[error("backend error for guild {guild_id}: {message}")]
    Backend { guild_id: String, message: String },
}

/// A message from the event bus that could not be turned into an invalidation.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed payload on {channel}: {source}")]
    Decode {
        channel: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no route for channel {0}")]
    UnknownChannel(String),
}

/// Top-level error for the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
