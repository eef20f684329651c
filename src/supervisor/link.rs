//! Per-account connection state machine.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected -> ...`, driven by
//! one task per account. Reconnects back off exponentially without a limit
//! on the number of attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::bridge::{EventSink, LinkClosed, SharedBridge};
use crate::common::ReconnectConfig;
use crate::router::Router;

/// Connection state of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Everything one account's task needs.
pub(super) struct AccountLink {
    pub bridge: SharedBridge,
    pub router: Arc<Router>,
    pub events: EventSink,
    pub state: Arc<watch::Sender<LinkState>>,
    pub reconnect: ReconnectConfig,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl AccountLink {
    fn set(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    /// Connect once, registering with the router on success.
    pub async fn connect(&self) -> Option<LinkClosed> {
        let account = self.bridge.account();
        self.set(LinkState::Connecting);

        match self.bridge.connect(self.events.clone()).await {
            Ok(closed) => {
                self.router.register_bridge(self.bridge.clone());
                self.set(LinkState::Connected);
                info!("{} connected", account);
                Some(closed)
            }
            Err(e) => {
                self.set(LinkState::Disconnected);
                warn!("{} failed to connect: {}", account, e);
                None
            }
        }
    }

    /// Drive the state machine until shutdown. `closed` is the live
    /// connection if the account is already connected.
    pub async fn supervise(mut self, mut closed: Option<LinkClosed>) {
        loop {
            match closed.take() {
                Some(link) => {
                    let reason = tokio::select! {
                        reason = link.wait() => reason,
                        _ = wait_for_shutdown(&mut self.shutdown_rx) => return,
                    };
                    self.router.unregister_bridge(self.bridge.account());
                    self.set(LinkState::Disconnected);
                    warn!(
                        "{} disconnected: {}",
                        self.bridge.account(),
                        reason.as_deref().unwrap_or("connection closed")
                    );
                }
                None => {
                    closed = match self.retry_connect().await {
                        Some(link) => Some(link),
                        None => return,
                    };
                }
            }
        }
    }

    /// Retry until connected. Returns `None` on shutdown.
    async fn retry_connect(&self) -> Option<LinkClosed> {
        let mut delays = self.reconnect.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let delay: Duration = delays.next().unwrap_or_else(|| self.reconnect.max_delay());
            info!(
                "Reconnecting {} in {:?} (attempt {})",
                self.bridge.account(),
                delay,
                attempt
            );

            let mut shutdown_rx = self.shutdown_rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown_rx) => return None,
            }

            let connected = tokio::select! {
                connected = self.connect() => connected,
                _ = wait_for_shutdown(&mut shutdown_rx) => return None,
            };
            if connected.is_some() {
                return connected;
            }
        }
    }
}

/// Resolves once shutdown is requested or the controller is gone.
pub(super) async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
