//! Router that ties every bridge together.
//!
//! Consumes the merged inbound event stream, resolves targets against the
//! active gateway set and fans each event out to the per-target send paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bridge::SharedBridge;
use crate::cache::MediaResolver;
use crate::common::{Account, ChannelRef, EventKind, InboundEvent};
use crate::config::types::{GeneralConfig, DEFAULT_NICK_FORMAT};
use crate::gateway::{GatewaySet, Target};

use super::draft::{Draft, PendingMedia};
use super::formatter::render;
use super::outbox::{OutboundOp, Outbox, DEFAULT_LANE_CAPACITY};
use super::relay::{RelayKey, RelayTable};

/// Router-wide settings taken from `[general]`.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub nick_format: String,
    pub send_timeout: Duration,
    pub relay_window: Duration,
    pub relay_capacity: usize,
    /// Queued operations per target channel before new ones are dropped.
    pub lane_capacity: usize,
}

impl RouterSettings {
    pub fn from_config(general: &GeneralConfig) -> Self {
        Self {
            nick_format: general.nick_format.clone(),
            send_timeout: general.send_timeout(),
            relay_window: general.relay_window(),
            relay_capacity: general.relay_capacity,
            lane_capacity: DEFAULT_LANE_CAPACITY,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            nick_format: DEFAULT_NICK_FORMAT.to_string(),
            send_timeout: Duration::from_secs(15),
            relay_window: Duration::from_secs(3600),
            relay_capacity: 10_000,
            lane_capacity: DEFAULT_LANE_CAPACITY,
        }
    }
}

/// Why an event produced no outbound operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The event is one of our own relayed copies.
    RelayedCopy,
    /// The sender is this process's own identity on the origin network.
    SelfEcho,
    /// No gateway takes input from the origin channel.
    NoGateway,
    /// Edit or delete of a message with no live relay record.
    NotRelayed,
    /// Join/leave notice and no target wants those.
    NoTargets,
}

impl DropReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::RelayedCopy => "relayed copy",
            Self::SelfEcho => "own message",
            Self::NoGateway => "no matching gateway",
            Self::NotRelayed => "no relay record",
            Self::NoTargets => "no interested target",
        }
    }
}

/// Result of routing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Dropped(DropReason),
    /// Operations were queued for this many targets.
    Dispatched { targets: usize },
}

/// A registered bridge and the send paths of its channels.
struct BridgeEntry {
    bridge: SharedBridge,
    lanes: Mutex<HashMap<String, Outbox>>,
}

/// The main router that orchestrates message flow between bridges.
pub struct Router {
    /// Active gateway set, swapped whole on reload.
    gateways: ArcSwap<GatewaySet>,
    /// Live bridge handles keyed by account.
    bridges: DashMap<Account, Arc<BridgeEntry>>,
    relays: Arc<RelayTable>,
    /// Attachment re-upload, when enabled.
    media: Option<Arc<MediaResolver>>,
    settings: RouterSettings,
}

impl Router {
    pub fn new(gateways: GatewaySet, settings: RouterSettings) -> Self {
        let relays = Arc::new(RelayTable::new(settings.relay_window, settings.relay_capacity));
        Self {
            gateways: ArcSwap::from_pointee(gateways),
            bridges: DashMap::new(),
            relays,
            media: None,
            settings,
        }
    }

    /// Enable attachment re-upload through `media`.
    pub fn with_media(mut self, media: Arc<MediaResolver>) -> Self {
        self.media = Some(media);
        self
    }

    #[cfg(test)]
    pub fn relays(&self) -> &RelayTable {
        &self.relays
    }

    /// Snapshot of the active gateway set.
    #[cfg(test)]
    pub fn gateways(&self) -> Arc<GatewaySet> {
        self.gateways.load_full()
    }

    /// Add a bridge to the registry, replacing any previous handle for the
    /// same account. Queued work for a replaced handle still drains.
    pub fn register_bridge(&self, bridge: SharedBridge) {
        let account = bridge.account().clone();
        let entry = Arc::new(BridgeEntry {
            bridge,
            lanes: Mutex::new(HashMap::new()),
        });
        if self.bridges.insert(account.clone(), entry).is_some() {
            debug!("Replaced bridge handle for {}", account);
        } else {
            debug!("Registered bridge {}", account);
        }
    }

    /// Remove a bridge from the registry. Events for its channels are no
    /// longer delivered; already queued operations still drain.
    pub fn unregister_bridge(&self, account: &Account) -> Option<SharedBridge> {
        let (_, entry) = self.bridges.remove(account)?;
        debug!("Unregistered bridge {}", account);
        Some(entry.bridge.clone())
    }

    #[cfg(test)]
    pub fn is_registered(&self, account: &Account) -> bool {
        self.bridges.contains_key(account)
    }

    /// Atomically swap in a new gateway set.
    ///
    /// Events already being routed finish against the set they started
    /// with; the next event sees the new one.
    pub fn reload(&self, gateways: GatewaySet) {
        info!("Reloaded {} gateway(s)", gateways.len());
        self.gateways.store(Arc::new(gateways));
    }

    /// Route one inbound event.
    ///
    /// Only queues work: sends, edits and attachment re-hosting happen on
    /// the targets' own send paths.
    pub async fn route(&self, event: InboundEvent) -> RouteOutcome {
        if let Some(reason) = self.loop_check(&event) {
            debug!(
                "Dropping {} {} from {}: {}",
                event.kind.name(),
                event.message_id,
                event.origin,
                reason.describe()
            );
            return RouteOutcome::Dropped(reason);
        }

        // One snapshot for the whole event.
        let gateways = self.gateways.load_full();
        let targets = gateways.resolve_targets(&event.origin);
        if targets.is_empty() {
            debug!("No gateway for {}, dropping {}", event.origin, event.message_id);
            return RouteOutcome::Dropped(DropReason::NoGateway);
        }

        let event = Arc::new(event);
        match event.kind {
            EventKind::Create => self.dispatch_create(&event, &targets),
            EventKind::Edit | EventKind::Delete => self.dispatch_correlated(&event, &targets),
            EventKind::Join | EventKind::Leave => self.dispatch_notice(&event, &targets),
        }
    }

    /// Consume events until shutdown or until every producer is gone.
    pub async fn run(
        self: Arc<Self>,
        mut events_rx: mpsc::UnboundedReceiver<InboundEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Router received shutdown signal");
                        break;
                    }
                }
                event = events_rx.recv() => {
                    match event {
                        Some(event) => {
                            self.route(event).await;
                        }
                        None => {
                            debug!("Inbound event stream closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Close the send paths of `account`, giving them `grace` to drain.
    ///
    /// Returns true if every queued operation completed in time.
    pub async fn flush(&self, account: &Account, grace: Duration) -> bool {
        let Some(entry) = self.bridges.get(account).map(|e| Arc::clone(e.value())) else {
            return true;
        };
        let lanes: Vec<Outbox> = entry.lanes.lock().drain().map(|(_, lane)| lane).collect();
        if lanes.is_empty() {
            return true;
        }
        debug!("Flushing {} send path(s) of {}", lanes.len(), account);
        join_all(lanes.into_iter().map(|lane| lane.close(grace)))
            .await
            .into_iter()
            .all(|drained| drained)
    }

    fn loop_check(&self, event: &InboundEvent) -> Option<DropReason> {
        if self.relays.is_relayed_copy(&event.origin, &event.message_id) {
            return Some(DropReason::RelayedCopy);
        }

        let own_id = self
            .bridges
            .get(event.account())
            .and_then(|entry| entry.bridge.self_id());
        match own_id {
            Some(id) if !event.sender_id.is_empty() && id == event.sender_id => {
                Some(DropReason::SelfEcho)
            }
            _ => None,
        }
    }

    /// Shared re-hosting job for `event`, if it carries anything to re-host.
    fn pending_media(&self, event: &InboundEvent) -> Option<Arc<PendingMedia>> {
        let resolver = self.media.as_ref()?;
        if !PendingMedia::needed(&event.attachments) {
            return None;
        }
        Some(Arc::new(PendingMedia::new(
            resolver.clone(),
            event.attachments.clone(),
        )))
    }

    fn draft(
        &self,
        event: &Arc<InboundEvent>,
        target: &Target,
        media: Option<&Arc<PendingMedia>>,
    ) -> Draft {
        match media {
            Some(media) => Draft::Pending {
                event: event.clone(),
                target: target.clone(),
                nick_format: self.settings.nick_format.clone(),
                media: media.clone(),
            },
            None => Draft::Ready(render(event, target, &self.settings.nick_format)),
        }
    }

    fn dispatch_create(&self, event: &Arc<InboundEvent>, targets: &[Target]) -> RouteOutcome {
        let key = RelayKey::new(event.origin.clone(), event.message_id.clone());
        let channels: Vec<ChannelRef> = targets.iter().map(|t| t.channel.clone()).collect();
        self.relays.begin(&key, &channels);
        let media = self.pending_media(event);

        let mut dispatched = 0;
        for target in targets {
            let message = self.draft(event, target, media.as_ref());
            let op = OutboundOp::Send {
                key: Some(key.clone()),
                message,
            };
            if self.enqueue(&target.channel, op) {
                dispatched += 1;
            }
        }
        RouteOutcome::Dispatched { targets: dispatched }
    }

    fn dispatch_correlated(&self, event: &Arc<InboundEvent>, targets: &[Target]) -> RouteOutcome {
        let key = RelayKey::new(event.origin.clone(), event.message_id.clone());
        let Some(recorded) = self.relays.targets(&key) else {
            debug!(
                "No relay record for {} {} from {}, nothing to {}",
                event.kind.name(),
                event.message_id,
                event.origin,
                event.kind.name()
            );
            return RouteOutcome::Dropped(DropReason::NotRelayed);
        };
        let media = match event.kind {
            EventKind::Edit => self.pending_media(event),
            _ => None,
        };

        let mut dispatched = 0;
        for channel in &recorded {
            let op = match event.kind {
                EventKind::Delete => OutboundOp::Delete { key: key.clone() },
                _ => {
                    let target = targets
                        .iter()
                        .find(|t| &t.channel == channel)
                        .cloned()
                        .unwrap_or_else(|| Target {
                            gateway: String::new(),
                            channel: channel.clone(),
                            options: Default::default(),
                        });
                    OutboundOp::Edit {
                        key: key.clone(),
                        message: self.draft(event, &target, media.as_ref()),
                    }
                }
            };
            if self.enqueue(channel, op) {
                dispatched += 1;
            }
        }
        RouteOutcome::Dispatched { targets: dispatched }
    }

    fn dispatch_notice(&self, event: &InboundEvent, targets: &[Target]) -> RouteOutcome {
        let mut dispatched = 0;
        for target in targets.iter().filter(|t| t.options.show_join_part) {
            let op = OutboundOp::Send {
                key: None,
                message: Draft::Ready(render(event, target, &self.settings.nick_format)),
            };
            if self.enqueue(&target.channel, op) {
                dispatched += 1;
            }
        }
        if dispatched == 0 {
            return RouteOutcome::Dropped(DropReason::NoTargets);
        }
        RouteOutcome::Dispatched { targets: dispatched }
    }

    /// Queue `op` on the send path of `target`, spawning it on first use.
    fn enqueue(&self, target: &ChannelRef, op: OutboundOp) -> bool {
        let Some(entry) = self.bridges.get(&target.account).map(|e| Arc::clone(e.value())) else {
            warn!("No bridge registered for {}, skipping", target);
            return false;
        };

        let mut lanes = entry.lanes.lock();
        let lane = lanes.entry(target.channel.clone()).or_insert_with(|| {
            Outbox::spawn(
                entry.bridge.clone(),
                target.clone(),
                self.relays.clone(),
                self.settings.send_timeout,
                self.settings.lane_capacity,
            )
        });
        lane.push(op)
    }
}
