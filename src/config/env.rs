//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `SWITCHBOARD_CONFIG` - config file path
//! - `SWITCHBOARD_DEBUG` - enable debug logging when set to `1`
//! - `SWITCHBOARD_<PROTOCOL>_<NAME>_TOKEN` - token credential of one account
//! - `SWITCHBOARD_IMGUR_CLIENT_ID` - image host client ID

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "SWITCHBOARD";

/// Apply environment variable overrides to a config.
///
/// This allows secrets like bot tokens to be provided via environment
/// variables instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    for account in &mut config.accounts {
        let var = token_var_name(&account.protocol, &account.name);
        if let Ok(token) = env::var(&var) {
            account.credentials.insert("token".to_string(), token);
        }
    }

    if let Ok(client_id) = env::var(format!("{}_IMGUR_CLIENT_ID", ENV_PREFIX)) {
        config.reupload.imgur_client_id = Some(client_id);
    }

    config
}

/// Name of the token override variable for one account.
///
/// Non-alphanumeric characters map to `_`, so `discord.my-server` reads
/// `SWITCHBOARD_DISCORD_MY_SERVER_TOKEN`.
pub fn token_var_name(protocol: &str, name: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}_{}_{}_TOKEN", ENV_PREFIX, sanitize(protocol), sanitize(name))
}

/// Get the config file path from environment or use default.
///
/// Checks `SWITCHBOARD_CONFIG`, otherwise returns "switchboard.toml".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "switchboard.toml".to_string())
}

/// Whether `SWITCHBOARD_DEBUG=1` is set.
pub fn debug_requested() -> bool {
    env::var(format!("{}_DEBUG", ENV_PREFIX))
        .map(|v| v == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::AccountConfig;

    fn make_test_config(protocol: &str, name: &str) -> Config {
        Config {
            accounts: vec![AccountConfig {
                protocol: protocol.to_string(),
                name: name.to_string(),
                credentials: [("token".to_string(), "original_token".to_string())]
                    .into_iter()
                    .collect(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(ENV_PREFIX, "SWITCHBOARD");
    }

    #[test]
    fn test_token_var_name() {
        assert_eq!(
            token_var_name("discord", "my-server"),
            "SWITCHBOARD_DISCORD_MY_SERVER_TOKEN"
        );
        assert_eq!(token_var_name("irc", "libera.chat"), "SWITCHBOARD_IRC_LIBERA_CHAT_TOKEN");
    }

    #[test]
    fn test_apply_env_overrides_no_vars() {
        let config = make_test_config("discord", "untouched");
        env::remove_var(token_var_name("discord", "untouched"));

        let result = apply_env_overrides(config);

        assert_eq!(result.accounts[0].credential("token"), Some("original_token"));
    }

    #[test]
    fn test_apply_env_overrides_token() {
        let config = make_test_config("discord", "overridden");
        env::set_var(token_var_name("discord", "overridden"), "from_env");

        let result = apply_env_overrides(config);
        env::remove_var(token_var_name("discord", "overridden"));

        assert_eq!(result.accounts[0].credential("token"), Some("from_env"));
    }
}
