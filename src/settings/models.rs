//! Guild settings records.
//!
//! Field names match the JSON the settings service and the pub/sub
//! channels send. List items are carried as-is; `added` stays the string
//! the service sent.

use serde::{Deserialize, Serialize};

use crate::events::Mergeable;

/// A user or channel barred from using commands in a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildBlacklist {
    pub added: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: String,
}

/// A command (or command group) switched off in a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildDisabledCommand {
    pub added: String,
    pub command: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: String,
}

/// A custom command prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildPrefix {
    pub added: String,
    pub guild_id: String,
    pub prefix: String,
    pub user_id: String,
}

/// Settings for one guild, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    /// Guild ID
    pub id: String,

    /// Guild name (cached for reference)
    pub name: String,

    /// Icon hash
    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub blacklist: Vec<GuildBlacklist>,

    #[serde(default)]
    pub disabled_commands: Vec<GuildDisabledCommand>,

    #[serde(default)]
    pub prefixes: Vec<GuildPrefix>,
}

impl GuildSettings {
    /// Create settings with no blacklist, disabled commands or prefixes.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            blacklist: Vec::new(),
            disabled_commands: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    /// Check if a command is disabled.
    pub fn is_command_disabled(&self, command: &str) -> bool {
        self.disabled_commands.iter().any(|d| d.command == command)
    }

    /// Check if a user or channel id is blacklisted.
    pub fn is_blacklisted(&self, id: &str) -> bool {
        self.blacklist.iter().any(|b| b.id == id)
    }
}

/// The fields a partial-update event may overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsPatch {
    Blacklist(Vec<GuildBlacklist>),
    DisabledCommands(Vec<GuildDisabledCommand>),
    Prefixes(Vec<GuildPrefix>),
}

impl Mergeable for GuildSettings {
    type Patch = SettingsPatch;

    fn merge(&mut self, patch: SettingsPatch) {
        match patch {
            SettingsPatch::Blacklist(blacklist) => self.blacklist = blacklist,
            SettingsPatch::DisabledCommands(disabled) => self.disabled_commands = disabled,
            SettingsPatch::Prefixes(prefixes) => self.prefixes = prefixes,
        }
    }
}
