//! Authoritative settings lookup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::GuildSettings;
use crate::error::{Error, FetchError};

/// Source of truth for guild settings, usually a remote service.
///
/// Implementations are expected to enforce their own timeouts; the cache
/// does not retry.
#[async_trait]
pub trait SettingsFetcher: Send + Sync {
    async fn fetch(&self, guild_id: &str) -> Result<GuildSettings, FetchError>;
}

/// In-memory fetcher, for seeding from a file and for tests.
#[derive(Clone, Default)]
pub struct StaticFetcher {
    records: Arc<RwLock<HashMap<String, GuildSettings>>>,
    calls: Arc<AtomicUsize>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of records, keyed on `id`.
    pub fn from_records(records: impl IntoIterator<Item = GuildSettings>) -> Self {
        let fetcher = Self::new();
        for record in records {
            fetcher.insert(record);
        }
        fetcher
    }

    /// Load a JSON array of settings records.
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let records: Vec<GuildSettings> = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;

        debug!("Loaded {} seed records from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    pub fn insert(&self, settings: GuildSettings) {
        self.records.write().insert(settings.id.clone(), settings);
    }

    pub fn remove(&self, guild_id: &str) -> Option<GuildSettings> {
        self.records.write().remove(guild_id)
    }

    /// How many times `fetch` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsFetcher for StaticFetcher {
    async fn fetch(&self, guild_id: &str) -> Result<GuildSettings, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .read()
            .get(guild_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(guild_id.to_string()))
    }
}

impl std::fmt::Debug for StaticFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticFetcher")
            .field("records", &self.records.read().len())
            .field("calls", &self.calls())
            .finish()
    }
}
