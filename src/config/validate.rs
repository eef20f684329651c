//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.
//! Gateway definitions are checked by the gateway loader.

use std::collections::HashSet;

use crate::bridge::factory::required_credentials;
use crate::common::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Validate accounts
    if config.accounts.is_empty() {
        errors.push("no accounts configured".to_string());
    }

    let mut seen = HashSet::new();
    for (i, account) in config.accounts.iter().enumerate() {
        let protocol = account.protocol.trim();
        let name = account.name.trim();

        if protocol.is_empty() {
            errors.push(format!("account[{}].protocol is required", i));
            continue;
        }
        if name.is_empty() {
            errors.push(format!("account[{}].name is required", i));
            continue;
        }

        let id = account.account();
        if !seen.insert(id.clone()) {
            errors.push(format!("account '{}' is declared more than once", id));
        }

        match required_credentials(protocol) {
            Some(keys) => {
                for key in keys {
                    if account.credential(key).is_none() {
                        errors.push(format!(
                            "account '{}' is missing credential '{}'",
                            id, key
                        ));
                    }
                }
            }
            None => errors.push(format!(
                "account '{}' uses unsupported protocol '{}'",
                id, protocol
            )),
        }
    }

    // Validate relay settings
    if config.general.relay_capacity == 0 {
        errors.push("general.relay_capacity must be non-zero".to_string());
    }
    if config.general.relay_window_secs == 0 {
        errors.push("general.relay_window_secs must be non-zero".to_string());
    }
    if config.general.send_timeout_secs == 0 {
        errors.push("general.send_timeout_secs must be non-zero".to_string());
    }

    // Validate re-upload settings
    let reupload = &config.reupload;
    if reupload.enabled {
        if reupload.path.as_os_str().is_empty() {
            errors.push("reupload.path is required when re-upload is enabled".to_string());
        }
        if reupload.max_size == 0 {
            errors.push("reupload.max_size must be non-zero".to_string());
        }
        if reupload
            .imgur_client_id
            .as_deref()
            .map_or(true, str::is_empty)
        {
            errors.push(
                "reupload.imgur_client_id is required when re-upload is enabled".to_string(),
            );
        }
    }

    if !config.gateways.iter().any(|g| g.enabled) {
        errors.push("no enabled gateways - no message routing configured".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
