//! Configuration type definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::common::{Account, ReconnectConfig};

/// Default nick decoration applied to relayed senders.
pub const DEFAULT_NICK_FORMAT: &str = "[%protocol] <%user> ";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub reupload: ReuploadConfig,
    #[serde(default, rename = "account")]
    pub accounts: Vec<AccountConfig>,
    #[serde(default, rename = "gateway")]
    pub gateways: Vec<GatewayConfig>,
}

impl Config {
    /// Every declared account, in file order.
    pub fn declared_accounts(&self) -> Vec<Account> {
        self.accounts.iter().map(AccountConfig::account).collect()
    }
}

/// Process-wide relay settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Nick format used when a channel does not override it.
    pub nick_format: String,
    /// How long a relayed message stays correlatable for edits, deletes,
    /// and loop detection.
    pub relay_window_secs: u64,
    /// Maximum number of relay records held at once.
    pub relay_capacity: usize,
    /// Timeout for a single outbound send, edit or delete.
    pub send_timeout_secs: u64,
    /// Grace period for flushing pending sends at shutdown.
    pub shutdown_grace_secs: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            nick_format: DEFAULT_NICK_FORMAT.to_string(),
            relay_window_secs: 3600,
            relay_capacity: 10_000,
            send_timeout_secs: 15,
            shutdown_grace_secs: 5,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl GeneralConfig {
    pub fn relay_window(&self) -> Duration {
        Duration::from_secs(self.relay_window_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Attachment re-upload settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReuploadConfig {
    pub enabled: bool,
    /// Directory holding the cache database.
    pub path: PathBuf,
    /// Upper bound on the cache database size, in bytes.
    pub max_size: u64,
    pub imgur_client_id: Option<String>,
}

impl Default for ReuploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("reupload-cache"),
            max_size: 2 * 1024 * 1024 * 1024,
            imgur_client_id: None,
        }
    }
}

/// One bridge account. Credentials are opaque to the router and only
/// interpreted by the protocol adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub protocol: String,
    pub name: String,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

impl AccountConfig {
    pub fn account(&self) -> Account {
        Account::new(self.protocol.trim(), self.name.trim())
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// A routing rule as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, rename = "channel")]
    pub channels: Vec<GatewayChannelConfig>,
}

fn default_enabled() -> bool {
    true
}

/// One channel entry of a gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayChannelConfig {
    /// Account in `protocol.name` form.
    pub account: String,
    pub channel: String,
    /// "in", "out" or "both" (default).
    pub direction: Option<String>,
    #[serde(default)]
    pub options: ChannelOptions,
}

/// Per-channel transformation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Overrides the global nick format for messages delivered here.
    pub nick_format: Option<String>,
    /// Maximum body length in bytes for messages delivered here.
    pub max_length: Option<usize>,
    /// Relay join/leave notices to this channel.
    pub show_join_part: bool,
}
