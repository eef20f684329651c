//! Bridge channel management.
//!
//! Groups the channels connecting bridges, the router loop and the
//! shutdown controller.

use tokio::sync::{mpsc, watch};

use crate::bridge::EventSink;
use crate::common::InboundEvent;

/// Channels for the router loop.
pub struct RouterChannels {
    /// Merged inbound events from every bridge, in insertion order.
    pub events_rx: mpsc::UnboundedReceiver<InboundEvent>,
    /// Receiver for shutdown signal.
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Channels for the lifecycle supervisor.
pub struct SupervisorChannels {
    /// Handed (cloned) to every bridge on connect.
    pub events_tx: EventSink,
    /// Receiver for shutdown signal (stops reconnect loops).
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Control channels for shutdown coordination.
pub struct ControlChannels {
    /// Sender to trigger shutdown.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Bundle of all channels wiring the relay together.
pub struct ChannelBundle {
    pub router: RouterChannels,
    pub supervisor: SupervisorChannels,
    pub control: ControlChannels,
}

impl ChannelBundle {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            router: RouterChannels {
                events_rx,
                shutdown_rx: shutdown_rx.clone(),
            },
            supervisor: SupervisorChannels {
                events_tx,
                shutdown_rx,
            },
            control: ControlChannels { shutdown_tx },
        }
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new()
    }
}
