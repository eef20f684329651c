//! Gateway definition loading and validation.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::common::{Account, ChannelRef, ConfigError};
use crate::config::types::GatewayConfig;
use super::{Direction, Gateway, GatewayEntry, GatewaySet};

/// Build a validated [`GatewaySet`] from raw gateway definitions.
///
/// Every problem found is reported in one `ValidationError`. Disabled
/// gateways are skipped without validation.
pub fn load_gateways(
    configs: &[GatewayConfig],
    accounts: &[Account],
) -> Result<GatewaySet, ConfigError> {
    let declared: HashSet<&Account> = accounts.iter().collect();
    let mut errors = Vec::new();
    let mut names = HashSet::new();
    let mut gateways = Vec::new();

    for (g, config) in configs.iter().enumerate() {
        let name = config.name.trim();
        if name.is_empty() {
            errors.push(format!("gateway[{}].name is required", g));
            continue;
        }
        if !names.insert(name) {
            errors.push(format!("gateway '{}' is declared more than once", name));
            continue;
        }
        if !config.enabled {
            debug!("Skipping disabled gateway '{}'", name);
            continue;
        }

        let mut entries = Vec::new();
        let mut seen: HashSet<(Direction, ChannelRef)> = HashSet::new();

        for (i, channel) in config.channels.iter().enumerate() {
            let at = format!("gateway '{}' channel[{}]", name, i);

            let account = match Account::parse(&channel.account) {
                Some(account) => account,
                None => {
                    errors.push(format!(
                        "{}: account '{}' must be in protocol.name form",
                        at, channel.account
                    ));
                    continue;
                }
            };
            if !declared.contains(&account) {
                errors.push(format!("{}: account '{}' is not declared", at, account));
                continue;
            }

            let channel_name = channel.channel.trim();
            if channel_name.is_empty() {
                errors.push(format!("{}: channel is required", at));
                continue;
            }

            let direction = match channel.direction.as_deref() {
                None => Direction::Both,
                Some(raw) => match raw.parse::<Direction>() {
                    Ok(direction) => direction,
                    Err(e) => {
                        errors.push(format!("{}: direction {}", at, e));
                        continue;
                    }
                },
            };

            let channel_ref = ChannelRef::new(account, channel_name);
            if !seen.insert((direction, channel_ref.clone())) {
                errors.push(format!(
                    "{}: '{}' is listed twice with direction '{}'",
                    at, channel_ref, direction
                ));
                continue;
            }

            entries.push(GatewayEntry {
                direction,
                channel: channel_ref,
                options: channel.options.clone(),
            });
        }

        if entries.is_empty() {
            warn!("Gateway '{}' has no channels and will never relay", name);
        }

        gateways.push(Gateway {
            name: name.to_string(),
            entries,
        });
    }

    if !errors.is_empty() {
        return Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        });
    }

    warn_ambiguous_sources(&gateways);

    Ok(GatewaySet::new(gateways))
}

/// A channel feeding several gateways is routed via the union of all of
/// them. Legal, but usually a config mistake.
fn warn_ambiguous_sources(gateways: &[Gateway]) {
    let mut feeds: HashMap<&ChannelRef, Vec<&str>> = HashMap::new();
    for gateway in gateways {
        for entry in gateway.entries.iter().filter(|e| e.direction.is_source()) {
            let names = feeds.entry(&entry.channel).or_default();
            if !names.contains(&gateway.name.as_str()) {
                names.push(&gateway.name);
            }
        }
    }

    for (channel, names) in feeds {
        if names.len() > 1 {
            warn!(
                "Channel {} feeds several gateways {:?}; routing via their union",
                channel, names
            );
        }
    }
}
