//! Configuration file parsing (TOML format).

use std::path::Path;

use crate::common::ConfigError;
use crate::config::types::Config;

/// Load configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;

    load_config_str(&content)
}

/// Load configuration from a TOML string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::DEFAULT_NICK_FORMAT;

    const SAMPLE: &str = r#"
[general]
relay_window_secs = 120

[reupload]
enabled = true
path = "/var/lib/switchboard/cache"
imgur_client_id = "abc123"

[[account]]
protocol = "discord"
name = "main"
credentials = { token = "secret" }

[[account]]
protocol = "discord"
name = "friends"

[[gateway]]
name = "lobby"

[[gateway.channel]]
account = "discord.main"
channel = "1234"
direction = "in"

[[gateway.channel]]
account = "discord.friends"
channel = "5678"
options = { max_length = 400, show_join_part = true }
"#;

    #[test]
    fn test_parse_sample() {
        let config = load_config_str(SAMPLE).unwrap();

        assert_eq!(config.general.relay_window_secs, 120);
        assert_eq!(config.general.nick_format, DEFAULT_NICK_FORMAT);
        assert!(config.reupload.enabled);
        assert_eq!(config.reupload.imgur_client_id.as_deref(), Some("abc123"));
        assert_eq!(config.reupload.max_size, 2 * 1024 * 1024 * 1024);

        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].credential("token"), Some("secret"));
        assert_eq!(config.accounts[1].credential("token"), None);

        assert_eq!(config.gateways.len(), 1);
        let gateway = &config.gateways[0];
        assert!(gateway.enabled);
        assert_eq!(gateway.channels.len(), 2);
        assert_eq!(gateway.channels[0].direction.as_deref(), Some("in"));
        assert_eq!(gateway.channels[1].direction, None);
        assert_eq!(gateway.channels[1].options.max_length, Some(400));
        assert!(gateway.channels[1].options.show_join_part);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert!(config.accounts.is_empty());
        assert!(!config.reupload.enabled);
        assert_eq!(config.general.send_timeout_secs, 15);
    }

    #[test]
    fn test_malformed_config_is_parse_error() {
        let result = load_config_str("[[account]\nprotocol = ");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_config("/nonexistent/switchboard.toml");
        assert!(matches!(result, Err(ConfigError::IoError { .. })));
    }
}
