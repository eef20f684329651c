//! Lifecycle supervisor.
//!
//! Starts every configured bridge, keeps each one connected with its own
//! reconnect task and shuts them all down with a bounded grace period.

mod link;

pub use link::LinkState;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::{EventSink, SharedBridge};
use crate::common::{Account, ReconnectConfig, StartError};
use crate::router::Router;

use link::AccountLink;

/// Owns the bridge handles and their connection tasks.
pub struct Supervisor {
    bridges: Vec<SharedBridge>,
    router: Arc<Router>,
    reconnect: ReconnectConfig,
    events: EventSink,
    shutdown_rx: watch::Receiver<bool>,
    states: HashMap<Account, Arc<watch::Sender<LinkState>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        bridges: Vec<SharedBridge>,
        router: Arc<Router>,
        reconnect: ReconnectConfig,
        events: EventSink,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let states = bridges
            .iter()
            .map(|b| {
                let (tx, _) = watch::channel(LinkState::Disconnected);
                (b.account().clone(), Arc::new(tx))
            })
            .collect();

        Self {
            bridges,
            router,
            reconnect,
            events,
            shutdown_rx,
            states,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn link(&self, bridge: &SharedBridge) -> Option<AccountLink> {
        let state = self.states.get(bridge.account())?.clone();
        Some(AccountLink {
            bridge: bridge.clone(),
            router: self.router.clone(),
            events: self.events.clone(),
            state,
            reconnect: self.reconnect.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        })
    }

    /// Connect every bridge.
    ///
    /// Accounts that fail are logged and keep retrying in the background.
    /// Fails only if no bridge connected at all. Returns how many did.
    pub async fn start_all(&self) -> Result<usize, StartError> {
        let links: Vec<AccountLink> = self.bridges.iter().filter_map(|b| self.link(b)).collect();
        let attempted = links.len();
        info!("Starting {} bridge(s)...", attempted);

        let results = join_all(links.iter().map(|link| link.connect())).await;
        let started = results.iter().filter(|r| r.is_some()).count();

        if started == 0 {
            return Err(StartError::NoneStarted { attempted });
        }

        let mut tasks = self.tasks.lock();
        for (link, closed) in links.into_iter().zip(results) {
            if closed.is_none() {
                warn!(
                    "{} is not connected, retrying in the background",
                    link.bridge.account()
                );
            }
            tasks.push(tokio::spawn(link.supervise(closed)));
        }

        info!("{} of {} bridge(s) started", started, attempted);
        Ok(started)
    }

    /// Flush and disconnect every bridge.
    ///
    /// Each bridge's pending sends get up to `grace` to drain, then every
    /// bridge is disconnected regardless.
    pub async fn stop_all(&self, grace: Duration) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        let flushed = join_all(self.bridges.iter().map(|bridge| async move {
            let account = bridge.account();
            if !self.router.flush(account, grace).await {
                warn!("{} did not finish pending sends within {:?}", account, grace);
            }
        }));
        flushed.await;

        join_all(self.bridges.iter().map(|bridge| async move {
            let account = bridge.account();
            self.router.unregister_bridge(account);
            if let Err(e) = bridge.disconnect().await {
                warn!("{} failed to disconnect cleanly: {}", account, e);
            }
            if let Some(state) = self.states.get(account) {
                state.send_replace(LinkState::Disconnected);
            }
            debug!("{} stopped", account);
        }))
        .await;

        info!("All bridges stopped");
    }

    /// Current state of every account, in configuration order.
    pub fn states(&self) -> Vec<(Account, LinkState)> {
        self.bridges
            .iter()
            .filter_map(|b| {
                let state = self.states.get(b.account())?;
                Some((b.account().clone(), *state.borrow()))
            })
            .collect()
    }

    #[cfg(test)]
    pub fn state(&self, account: &Account) -> Option<LinkState> {
        self.states.get(account).map(|s| *s.borrow())
    }

    /// Watch state changes of one account.
    #[cfg(test)]
    pub fn subscribe(&self, account: &Account) -> Option<watch::Receiver<LinkState>> {
        self.states.get(account).map(|s| s.subscribe())
    }

    pub fn connected(&self) -> usize {
        self.states
            .values()
            .filter(|s| *s.borrow() == LinkState::Connected)
            .count()
    }

    /// Whether at least one bridge is connected and relaying.
    pub fn is_ready(&self) -> bool {
        self.connected() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::{MockBridge, MockCall};
    use crate::bridge::Bridge;
    use crate::common::{ChannelRef, EventKind, InboundEvent};
    use crate::config::types::ChannelOptions;
    use crate::gateway::{Direction, Gateway, GatewayEntry, GatewaySet};
    use crate::router::RouterSettings;
    use tokio::sync::mpsc;

    struct Harness {
        supervisor: Supervisor,
        router: Arc<Router>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_secs: 1,
            max_delay_secs: 4,
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// All bridges in one bidirectional gateway, router loop running.
    fn harness(bridges: &[Arc<MockBridge>]) -> Harness {
        let entries = bridges
            .iter()
            .map(|b| GatewayEntry {
                direction: Direction::Both,
                channel: ChannelRef::new(b.account().clone(), "room"),
                options: ChannelOptions::default(),
            })
            .collect();
        let set = GatewaySet::new(vec![Gateway {
            name: "all".to_string(),
            entries,
        }]);
        let router = Arc::new(Router::new(set, RouterSettings::default()));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(router.clone().run(events_rx, shutdown_rx.clone()));

        let shared: Vec<SharedBridge> = bridges.iter().map(|b| b.clone() as SharedBridge).collect();
        let supervisor = Supervisor::new(shared, router.clone(), reconnect(), events_tx, shutdown_rx);
        Harness {
            supervisor,
            router,
            shutdown_tx,
        }
    }

    async fn wait_for_state(supervisor: &Supervisor, account: &Account, want: LinkState) {
        let mut rx = supervisor.subscribe(account).unwrap();
        tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == want))
            .await
            .expect("state change timed out")
            .unwrap();
    }

    fn message(bridge: &MockBridge, id: &str) -> InboundEvent {
        InboundEvent::new(
            ChannelRef::new(bridge.account().clone(), "room"),
            EventKind::Create,
            id,
        )
        .with_sender("alice", "u1")
        .with_text("hello")
    }

    #[tokio::test]
    async fn test_partial_failure_still_starts() {
        let (a, b, c) = (
            MockBridge::new("mock", "a"),
            MockBridge::new("mock", "b"),
            MockBridge::new("mock", "c"),
        );
        c.fail_connect(true);
        let h = harness(&[a.clone(), b.clone(), c.clone()]);

        assert_eq!(h.supervisor.start_all().await.unwrap(), 2);
        assert!(h.supervisor.is_ready());
        assert_eq!(h.supervisor.state(c.account()), Some(LinkState::Disconnected));
        assert!(!h.router.is_registered(c.account()));

        assert!(a.emit(message(&a, "m1")));
        let calls = b.wait_for_calls(1).await;
        assert!(matches!(&calls[0], MockCall::Send { channel, .. } if channel == "room"));
        assert!(c.calls().is_empty());

        h.shutdown_tx.send(true).unwrap();
        h.supervisor.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_zero_started_is_an_error() {
        let (a, b) = (MockBridge::new("mock", "a"), MockBridge::new("mock", "b"));
        a.fail_connect(true);
        b.fail_connect(true);
        let h = harness(&[a.clone(), b.clone()]);

        let err = h.supervisor.start_all().await.unwrap_err();
        assert!(matches!(err, StartError::NoneStarted { attempted: 2 }));
        assert!(!h.supervisor.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_bridge_reconnects() {
        let (a, b) = (MockBridge::new("mock", "a"), MockBridge::new("mock", "b"));
        let h = harness(&[a.clone(), b.clone()]);
        h.supervisor.start_all().await.unwrap();
        assert_eq!(b.connect_count(), 1);

        b.drop_connection();
        wait_for_state(&h.supervisor, b.account(), LinkState::Disconnected).await;
        wait_for_state(&h.supervisor, b.account(), LinkState::Connected).await;

        assert_eq!(b.connect_count(), 2);
        assert!(h.router.is_registered(b.account()));

        // Relaying resumes over the new connection
        assert!(a.emit(message(&a, "m1")));
        b.wait_for_calls(1).await;

        h.shutdown_tx.send(true).unwrap();
        h.supervisor.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_keeps_retrying() {
        let (a, b) = (MockBridge::new("mock", "a"), MockBridge::new("mock", "b"));
        let h = harness(&[a.clone(), b.clone()]);
        h.supervisor.start_all().await.unwrap();

        b.fail_connect(true);
        b.drop_connection();
        wait_for_state(&h.supervisor, b.account(), LinkState::Disconnected).await;

        // Backoff 1s, 2s, 4s, 4s... keeps going past the cap
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(b.connect_count() >= 5);
        assert_eq!(h.supervisor.state(b.account()), Some(LinkState::Disconnected));

        b.fail_connect(false);
        wait_for_state(&h.supervisor, b.account(), LinkState::Connected).await;

        h.shutdown_tx.send(true).unwrap();
        h.supervisor.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initially_failed_account_recovers() {
        let (a, b) = (MockBridge::new("mock", "a"), MockBridge::new("mock", "b"));
        b.fail_connect(true);
        let h = harness(&[a.clone(), b.clone()]);
        assert_eq!(h.supervisor.start_all().await.unwrap(), 1);

        b.fail_connect(false);
        wait_for_state(&h.supervisor, b.account(), LinkState::Connected).await;
        assert!(h.router.is_registered(b.account()));

        h.shutdown_tx.send(true).unwrap();
        h.supervisor.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stop_all_flushes_then_disconnects() {
        let (a, b) = (MockBridge::new("mock", "a"), MockBridge::new("mock", "b"));
        let h = harness(&[a.clone(), b.clone()]);
        h.supervisor.start_all().await.unwrap();
        b.set_send_delay(Duration::from_millis(20));

        for i in 0..3 {
            h.router.route(message(&a, &format!("m{}", i))).await;
        }
        h.shutdown_tx.send(true).unwrap();
        h.supervisor.stop_all(Duration::from_secs(1)).await;

        assert_eq!(b.calls().len(), 3);
        assert!(!a.is_connected());
        assert!(!b.is_connected());
        assert!(h
            .supervisor
            .states()
            .iter()
            .all(|(_, state)| *state == LinkState::Disconnected));
    }
}
