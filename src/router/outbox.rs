//! Per-target send path.
//!
//! Every target channel gets its own bounded FIFO queue and worker task.
//! Operations for one target run strictly in the order they were queued,
//! while targets never wait on each other. A full queue drops new work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, SharedBridge};
use crate::common::{BridgeError, BridgeResult, ChannelRef};

use super::draft::Draft;
use super::relay::{RelayKey, RelayTable};

/// Queued operations per target before new ones are dropped.
pub const DEFAULT_LANE_CAPACITY: usize = 256;

/// One queued operation against a target channel.
#[derive(Debug)]
pub enum OutboundOp {
    /// Deliver a new copy. `key` is `None` for notices that are never
    /// correlated (join/leave lines).
    Send {
        key: Option<RelayKey>,
        message: Draft,
    },
    Edit {
        key: RelayKey,
        message: Draft,
    },
    Delete {
        key: RelayKey,
    },
}

impl OutboundOp {
    fn name(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Handle to the worker serving one target channel.
pub struct Outbox {
    target: ChannelRef,
    tx: mpsc::Sender<OutboundOp>,
    task: JoinHandle<()>,
}

impl Outbox {
    /// Spawn the worker for `target` on `bridge`.
    pub fn spawn(
        bridge: SharedBridge,
        target: ChannelRef,
        relays: Arc<RelayTable>,
        send_timeout: Duration,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = Worker {
            bridge,
            target: target.clone(),
            relays,
            send_timeout,
        };
        let task = tokio::spawn(worker.run(rx));
        Self { target, tx, task }
    }

    /// Queue an operation. Returns false if it was dropped because the
    /// queue is full or the worker has stopped.
    pub fn push(&self, op: OutboundOp) -> bool {
        match self.tx.try_send(op) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(op)) => {
                warn!("Send path for {} is full, dropping {}", self.target, op.name());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop accepting work and wait up to `grace` for the queue to drain.
    ///
    /// Pending operations are cancelled when the grace period runs out.
    /// Returns true if everything queued was processed.
    pub async fn close(self, grace: Duration) -> bool {
        let Outbox {
            target,
            tx,
            mut task,
        } = self;
        drop(tx);

        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                warn!("Cancelling pending operations for {} after {:?}", target, grace);
                task.abort();
                false
            }
        }
    }
}

struct Worker {
    bridge: SharedBridge,
    target: ChannelRef,
    relays: Arc<RelayTable>,
    send_timeout: Duration,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<OutboundOp>) {
        while let Some(op) = rx.recv().await {
            let name = op.name();
            if let Err(e) = self.execute(op).await {
                warn!("Failed to {} on {}: {}", name, self.target, e);
            }
        }
        debug!("Send path for {} stopped", self.target);
    }

    async fn execute(&self, op: OutboundOp) -> BridgeResult<()> {
        let bridge = self.bridge.as_ref();
        let channel = self.target.channel.as_str();

        match op {
            OutboundOp::Send { key, message } => {
                let message = message.finish().await;
                let message = &message;
                let delivered_id = with_retry(bridge, self.send_timeout, move || {
                    bridge.send(channel, message)
                })
                .await?;

                info!("{} -> {}: {}", self.origin_label(key.as_ref()), self.target, message.rendered());
                if !message.attachments.is_empty() {
                    debug!("{} linked {} attachment(s)", delivered_id, message.attachments.len());
                }

                if let Some(key) = key {
                    if !self.relays.record_delivery(&key, &self.target, &delivered_id) {
                        debug!(
                            "Relay record for {} expired before delivery to {} completed",
                            key.message_id, self.target
                        );
                    }
                }
                Ok(())
            }
            OutboundOp::Edit { key, message } => {
                let Some(delivered_id) = self.relays.delivered_id(&key, &self.target) else {
                    debug!("No delivered copy of {} on {}, skipping edit", key.message_id, self.target);
                    return Ok(());
                };
                let message = message.finish().await;
                let (message, delivered_id) = (&message, delivered_id.as_str());
                with_retry(bridge, self.send_timeout, move || {
                    bridge.edit(channel, delivered_id, message)
                })
                .await
            }
            OutboundOp::Delete { key } => {
                let Some(delivered_id) = self.relays.delivered_id(&key, &self.target) else {
                    debug!("No delivered copy of {} on {}, skipping delete", key.message_id, self.target);
                    return Ok(());
                };
                let delivered_id = delivered_id.as_str();
                with_retry(bridge, self.send_timeout, move || {
                    bridge.delete(channel, delivered_id)
                })
                .await
            }
        }
    }

    fn origin_label(&self, key: Option<&RelayKey>) -> String {
        match key {
            Some(key) => key.origin.to_string(),
            None => "notice".to_string(),
        }
    }
}

/// Run one bridge operation with a per-attempt timeout, retrying transient
/// failures along the bridge's own retry policy.
async fn with_retry<T, F, Fut>(bridge: &dyn Bridge, timeout: Duration, mut attempt: F) -> BridgeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    let mut delays = bridge.retry_policy().backoff();

    loop {
        let result = match tokio::time::timeout(timeout, attempt()).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(timeout)),
        };

        match result {
            Err(e) if e.is_transient() => match delays.next() {
                Some(delay) => {
                    debug!("{} transient failure ({}), retrying in {:?}", bridge.account(), e, delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            other => return other,
        }
    }
}
