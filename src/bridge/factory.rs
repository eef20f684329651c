//! Protocol adapter construction from account config.

use std::sync::Arc;

use crate::bridge::SharedBridge;
use crate::common::ConfigError;
use crate::config::types::AccountConfig;
use crate::discord::DiscordBridge;

/// Credentials each supported protocol requires, or `None` when the
/// protocol has no adapter.
pub fn required_credentials(protocol: &str) -> Option<&'static [&'static str]> {
    match protocol {
        "discord" => Some(&["token"]),
        _ => None,
    }
}

/// Build one bridge per configured account.
pub fn build_bridges(accounts: &[AccountConfig]) -> Result<Vec<SharedBridge>, ConfigError> {
    accounts.iter().map(build_bridge).collect()
}

fn build_bridge(config: &AccountConfig) -> Result<SharedBridge, ConfigError> {
    let account = config.account();
    match account.protocol.as_str() {
        "discord" => {
            let token = config
                .credential("token")
                .ok_or_else(|| ConfigError::ValidationError {
                    message: format!("account '{}' is missing credential 'token'", account),
                })?;
            Ok(Arc::new(DiscordBridge::new(account, token)))
        }
        other => Err(ConfigError::ValidationError {
            message: format!("account '{}' uses unsupported protocol '{}'", account, other),
        }),
    }
}
