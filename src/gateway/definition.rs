//! Gateway definitions and target resolution.
//!
//! A [`GatewaySet`] is immutable once built. Reloading builds a new set and
//! the router swaps it in whole.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::common::ChannelRef;
use crate::config::types::ChannelOptions;

/// Direction of message flow for one gateway entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Messages from this channel enter the gateway.
    In,
    /// The gateway delivers messages to this channel.
    Out,
    /// Bidirectional.
    Both,
}

impl Direction {
    /// Check if this direction lets the channel feed the gateway.
    pub fn is_source(&self) -> bool {
        matches!(self, Direction::In | Direction::Both)
    }

    /// Check if this direction lets the gateway deliver to the channel.
    pub fn is_target(&self) -> bool {
        matches!(self, Direction::Out | Direction::Both)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "both" => Ok(Direction::Both),
            other => Err(format!("'{}' is not one of: in, out, both", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::Both => "both",
        };
        f.write_str(name)
    }
}

/// One channel of a gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEntry {
    pub direction: Direction,
    pub channel: ChannelRef,
    pub options: ChannelOptions,
}

/// A named routing rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Gateway {
    pub name: String,
    pub entries: Vec<GatewayEntry>,
}

/// A resolved delivery destination for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Gateway that produced this target (first match when several do).
    pub gateway: String,
    pub channel: ChannelRef,
    pub options: ChannelOptions,
}

/// The active set of gateways with a source-channel index.
#[derive(Debug, Default)]
pub struct GatewaySet {
    gateways: Vec<Gateway>,
    /// Index: source channel -> gateways it feeds.
    sources: HashMap<ChannelRef, Vec<usize>>,
}

impl GatewaySet {
    pub fn new(gateways: Vec<Gateway>) -> Self {
        let mut sources: HashMap<ChannelRef, Vec<usize>> = HashMap::new();

        for (idx, gateway) in gateways.iter().enumerate() {
            for entry in gateway.entries.iter().filter(|e| e.direction.is_source()) {
                let indices = sources.entry(entry.channel.clone()).or_default();
                if !indices.contains(&idx) {
                    indices.push(idx);
                }
            }
        }

        Self { gateways, sources }
    }

    /// Create an empty set with no routes.
    #[cfg(test)]
    pub fn empty() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn gateways(&self) -> &[Gateway] {
        &self.gateways
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }

    /// Names of the gateways the channel feeds.
    #[cfg(test)]
    pub fn gateways_for(&self, origin: &ChannelRef) -> Vec<&str> {
        self.sources
            .get(origin)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| self.gateways[i].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every channel that should receive a message from `origin`.
    ///
    /// Unions the outbound entries of every gateway the origin feeds, in
    /// gateway then entry order. The origin itself is never a target and
    /// a channel reached through several gateways appears once.
    pub fn resolve_targets(&self, origin: &ChannelRef) -> Vec<Target> {
        let Some(indices) = self.sources.get(origin) else {
            return Vec::new();
        };

        let mut seen: HashSet<&ChannelRef> = HashSet::new();
        let mut targets = Vec::new();

        for &idx in indices {
            let gateway = &self.gateways[idx];
            for entry in &gateway.entries {
                if !entry.direction.is_target() || entry.channel == *origin {
                    continue;
                }
                if seen.insert(&entry.channel) {
                    targets.push(Target {
                        gateway: gateway.name.clone(),
                        channel: entry.channel.clone(),
                        options: entry.options.clone(),
                    });
                }
            }
        }

        targets
    }
}
