//! Bridge handle contract shared by every protocol adapter.
//!
//! ## Module Structure
//!
//! - `channels`: channel bundle wiring bridges, router and supervisor
//! - `factory`: builds protocol adapters from account config
//! - `mock` (tests only): scripted in-memory bridge

pub mod channels;
pub mod factory;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::common::{Account, BridgeResult, InboundEvent, OutboundMessage, RetryPolicy};

pub use channels::ChannelBundle;

/// Where a connected bridge pushes its inbound events.
pub type EventSink = mpsc::UnboundedSender<InboundEvent>;

/// Shared handle to any bridge implementation.
pub type SharedBridge = Arc<dyn Bridge>;

/// One connected account on one chat network.
///
/// The router only uses the account as a label; protocol logic lives
/// entirely behind this trait.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn account(&self) -> &Account;

    /// The bridge's own user ID on its network, once connected. Events sent
    /// by this ID are our own relayed messages echoing back.
    fn self_id(&self) -> Option<String>;

    /// Retry policy for transient send, edit and delete failures.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Connect and start pushing inbound events to `events`.
    ///
    /// The returned [`LinkClosed`] resolves when the connection drops.
    async fn connect(&self, events: EventSink) -> BridgeResult<LinkClosed>;

    async fn disconnect(&self) -> BridgeResult<()>;

    /// Send a message, returning the network's ID for it.
    async fn send(&self, channel: &str, message: &OutboundMessage) -> BridgeResult<String>;

    async fn edit(&self, channel: &str, message_id: &str, message: &OutboundMessage)
        -> BridgeResult<()>;

    async fn delete(&self, channel: &str, message_id: &str) -> BridgeResult<()>;
}

/// Create a linked closer/waiter pair for one connection.
pub fn link() -> (LinkCloser, LinkClosed) {
    let (tx, rx) = oneshot::channel();
    (LinkCloser { tx: Some(tx) }, LinkClosed { rx })
}

/// Held by the adapter for as long as its connection is alive. Dropping it
/// without calling [`LinkCloser::close`] also signals the close.
#[derive(Debug)]
pub struct LinkCloser {
    tx: Option<oneshot::Sender<Option<String>>>,
}

impl LinkCloser {
    /// Signal that the connection ended, with an optional reason.
    pub fn close(mut self, reason: Option<String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(reason);
        }
    }
}

/// Resolves when the connection it was created for ends.
#[derive(Debug)]
pub struct LinkClosed {
    rx: oneshot::Receiver<Option<String>>,
}

impl LinkClosed {
    /// Wait for the connection to end. Returns the reason if one was given.
    pub async fn wait(self) -> Option<String> {
        self.rx.await.unwrap_or(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_close_with_reason() {
        let (closer, closed) = link();
        closer.close(Some("socket reset".to_string()));
        assert_eq!(closed.wait().await.as_deref(), Some("socket reset"));
    }

    #[tokio::test]
    async fn test_link_dropped_closer_signals() {
        let (closer, closed) = link();
        drop(closer);
        assert_eq!(closed.wait().await, None);
    }
}
