//! Relay records: which copies of an origin message exist on which targets.
//!
//! The table is bounded both by capacity and by a retention window and
//! evicts oldest-first. It serves two lookups: by origin message (edit and
//! delete correlation) and by delivered copy (loop detection).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::ChannelRef;

/// Canonical identity of a relayed message: where it was first seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayKey {
    pub origin: ChannelRef,
    pub message_id: String,
}

impl RelayKey {
    pub fn new(origin: ChannelRef, message_id: impl Into<String>) -> Self {
        Self {
            origin,
            message_id: message_id.into(),
        }
    }
}

#[derive(Debug)]
struct RelayRecord {
    created: Instant,
    /// Targets the message was dispatched to, in dispatch order.
    targets: Vec<ChannelRef>,
    /// Target -> message ID returned by that target's bridge.
    delivered: HashMap<ChannelRef, String>,
}

#[derive(Debug, Default)]
struct RelayInner {
    records: HashMap<RelayKey, RelayRecord>,
    /// Insertion order for eviction.
    order: VecDeque<(Instant, RelayKey)>,
    /// Delivered copy -> record it belongs to.
    copies: HashMap<(ChannelRef, String), RelayKey>,
}

impl RelayInner {
    fn remove(&mut self, key: &RelayKey) {
        if let Some(record) = self.records.remove(key) {
            for (target, id) in record.delivered {
                self.copies.remove(&(target, id));
            }
        }
    }

    fn evict(&mut self, now: Instant, window: Duration, capacity: usize) {
        while let Some((created, key)) = self.order.front() {
            let expired = now.saturating_duration_since(*created) >= window;
            let over = self.records.len() > capacity;
            if !expired && !over {
                break;
            }
            let created = *created;
            let key = key.clone();
            self.order.pop_front();
            // Skip stale order entries left behind by re-created records
            if self.records.get(&key).map(|r| r.created) == Some(created) {
                debug!("Evicting relay record for {} {}", key.origin, key.message_id);
                self.remove(&key);
            }
        }
    }
}

/// Bounded, time-windowed table of relay records.
///
/// The lock is only held for the duration of a lookup or insert and never
/// across a network call.
#[derive(Debug)]
pub struct RelayTable {
    inner: Mutex<RelayInner>,
    window: Duration,
    capacity: usize,
}

impl RelayTable {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RelayInner::default()),
            window,
            capacity: capacity.max(1),
        }
    }

    /// Register dispatch of `key` to `targets`, creating the record if needed.
    pub fn begin(&self, key: &RelayKey, targets: &[ChannelRef]) {
        self.begin_at(key, targets, Instant::now());
    }

    pub(crate) fn begin_at(&self, key: &RelayKey, targets: &[ChannelRef], now: Instant) {
        let mut inner = self.inner.lock();
        inner.evict(now, self.window, self.capacity);

        if !inner.records.contains_key(key) {
            inner.order.push_back((now, key.clone()));
            inner.records.insert(
                key.clone(),
                RelayRecord {
                    created: now,
                    targets: Vec::new(),
                    delivered: HashMap::new(),
                },
            );
        }
        if let Some(record) = inner.records.get_mut(key) {
            for target in targets {
                if !record.targets.contains(target) {
                    record.targets.push(target.clone());
                }
            }
        }

        inner.evict(now, self.window, self.capacity);
    }

    /// Record the ID a target assigned to its copy.
    ///
    /// Returns false when the record has been evicted in the meantime.
    pub fn record_delivery(&self, key: &RelayKey, target: &ChannelRef, delivered_id: &str) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(record) = inner.records.get_mut(key) else {
            return false;
        };
        if let Some(previous) = record
            .delivered
            .insert(target.clone(), delivered_id.to_string())
        {
            inner.copies.remove(&(target.clone(), previous));
        }
        inner
            .copies
            .insert((target.clone(), delivered_id.to_string()), key.clone());
        true
    }

    /// The targets `key` was dispatched to, if the record is still live.
    pub fn targets(&self, key: &RelayKey) -> Option<Vec<ChannelRef>> {
        self.targets_at(key, Instant::now())
    }

    pub(crate) fn targets_at(&self, key: &RelayKey, now: Instant) -> Option<Vec<ChannelRef>> {
        let mut inner = self.inner.lock();
        inner.evict(now, self.window, self.capacity);
        inner.records.get(key).map(|r| r.targets.clone())
    }

    /// ID of the copy delivered to `target`, if any.
    pub fn delivered_id(&self, key: &RelayKey, target: &ChannelRef) -> Option<String> {
        self.inner
            .lock()
            .records
            .get(key)
            .and_then(|r| r.delivered.get(target).cloned())
    }

    /// Whether `message_id` on `channel` is one of our own relayed copies.
    pub fn is_relayed_copy(&self, channel: &ChannelRef, message_id: &str) -> bool {
        self.is_relayed_copy_at(channel, message_id, Instant::now())
    }

    pub(crate) fn is_relayed_copy_at(
        &self,
        channel: &ChannelRef,
        message_id: &str,
        now: Instant,
    ) -> bool {
        let mut inner = self.inner.lock();
        inner.evict(now, self.window, self.capacity);
        inner
            .copies
            .contains_key(&(channel.clone(), message_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
