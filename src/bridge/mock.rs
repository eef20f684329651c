//! Scripted in-memory bridge for tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::bridge::{link, Bridge, EventSink, LinkCloser, LinkClosed};
use crate::common::{Account, BridgeError, BridgeResult, InboundEvent, OutboundMessage, RetryPolicy};

/// One recorded bridge operation.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Send { channel: String, text: String },
    Edit { channel: String, message_id: String, text: String },
    Delete { channel: String, message_id: String },
}

#[derive(Default)]
struct Script {
    fail_connect: AtomicBool,
    fail_sends: AtomicBool,
    /// Number of upcoming sends that fail with a transient error.
    transient_failures: AtomicUsize,
    send_delay: Mutex<Option<Duration>>,
}

pub struct MockBridge {
    account: Account,
    self_id: String,
    script: Script,
    next_id: AtomicU64,
    connects: AtomicUsize,
    calls: Mutex<Vec<MockCall>>,
    notify: Notify,
    link: Mutex<Option<LinkCloser>>,
    events: Mutex<Option<EventSink>>,
}

impl MockBridge {
    pub fn new(protocol: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            account: Account::new(protocol, name),
            self_id: format!("bot-{}", name),
            script: Script::default(),
            next_id: AtomicU64::new(1),
            connects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            notify: Notify::new(),
            link: Mutex::new(None),
            events: Mutex::new(None),
        })
    }

    pub fn bot_id(&self) -> &str {
        &self.self_id
    }

    pub fn fail_connect(&self, fail: bool) {
        self.script.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.script.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_sends_transiently(&self, count: usize) {
        self.script.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.script.send_delay.lock() = Some(delay);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Simulate the network dropping the connection.
    pub fn drop_connection(&self) {
        if let Some(closer) = self.link.lock().take() {
            closer.close(Some("connection reset".to_string()));
        }
        self.events.lock().take();
    }

    /// Push an inbound event as if it arrived from the network.
    pub fn emit(&self, event: InboundEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Wait until at least `count` calls were recorded, or panic after 2s.
    pub async fn wait_for_calls(&self, count: usize) -> Vec<MockCall> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let notified = self.notify.notified();
            {
                let calls = self.calls.lock();
                if calls.len() >= count {
                    return calls.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!(
                    "{} expected {} calls, saw {:?}",
                    self.account,
                    count,
                    self.calls()
                );
            }
        }
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
        self.notify.notify_waiters();
    }

    async fn scripted_delivery(&self) -> BridgeResult<()> {
        let delay = *self.script.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.link.lock().is_none() {
            return Err(BridgeError::NotConnected {
                account: self.account.to_string(),
            });
        }
        if self
            .script
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BridgeError::RateLimited);
        }
        if self.script.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::DeliveryFailed {
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Bridge for MockBridge {
    fn account(&self) -> &Account {
        &self.account
    }

    fn self_id(&self) -> Option<String> {
        Some(self.self_id.clone())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    async fn connect(&self, events: EventSink) -> BridgeResult<LinkClosed> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(BridgeError::ConnectFailed {
                account: self.account.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        let (closer, closed) = link();
        *self.link.lock() = Some(closer);
        *self.events.lock() = Some(events);
        Ok(closed)
    }

    async fn disconnect(&self) -> BridgeResult<()> {
        self.link.lock().take();
        self.events.lock().take();
        Ok(())
    }

    async fn send(&self, channel: &str, message: &OutboundMessage) -> BridgeResult<String> {
        self.scripted_delivery().await?;
        let id = format!(
            "{}-{}",
            self.account.name,
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        self.record(MockCall::Send {
            channel: channel.to_string(),
            text: message.rendered(),
        });
        Ok(id)
    }

    async fn edit(
        &self,
        channel: &str,
        message_id: &str,
        message: &OutboundMessage,
    ) -> BridgeResult<()> {
        self.scripted_delivery().await?;
        self.record(MockCall::Edit {
            channel: channel.to_string(),
            message_id: message_id.to_string(),
            text: message.rendered(),
        });
        Ok(())
    }

    async fn delete(&self, channel: &str, message_id: &str) -> BridgeResult<()> {
        self.scripted_delivery().await?;
        self.record(MockCall::Delete {
            channel: channel.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }
}
