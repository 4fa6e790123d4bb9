// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded outbound queue with explicit back-pressure.
//!
//! Terminal output is budgeted by bytes: once queued data crosses the
//! high-water mark the queue starts dropping the oldest data entries and
//! plants a gap marker in their place, and it keeps dropping on every push
//! until the consumer drains below the low-water mark. Drops are attributed
//! per stream key (one key per subscription) so each gap marker reports how
//! many bytes its stream lost. Control entries are never dropped; coalescible
//! entries are replaced in place while the queue is lagging.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Hard cap on queued control entries. A consumer that cannot keep up with
/// structural events is broken; the queue closes and the connection drops.
const CONTROL_LIMIT: usize = 4096;

/// An entry handed back by [`OutboundQueue::pop`].
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    Item(T),
    /// Bytes were dropped for the given stream while the consumer lagged.
    Gap { key: Arc<str>, missed: u64 },
}

enum Entry<T> {
    Data { item: T, cost: usize, key: Arc<str> },
    Control { item: T, coalesce: Option<String> },
    Gap { key: Arc<str>, missed: Arc<AtomicU64> },
}

struct Inner<T> {
    entries: VecDeque<Entry<T>>,
    queued_bytes: usize,
    control_count: usize,
    lagging: bool,
    /// Open drop episodes: stream key -> counter shared with the queued gap
    /// marker, so the marker keeps accumulating until it is delivered.
    episodes: HashMap<Arc<str>, Arc<AtomicU64>>,
    closed: bool,
}

pub struct OutboundQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    high_water: usize,
    low_water: usize,
}

impl<T> OutboundQueue<T> {
    pub fn new(high_water: usize, low_water: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                queued_bytes: 0,
                control_count: 0,
                lagging: false,
                episodes: HashMap::new(),
                closed: false,
            }),
            notify: Notify::new(),
            high_water,
            low_water,
        }
    }

    /// Enqueue terminal output for the given stream. Returns `false` once
    /// the queue is closed.
    pub fn push_data(&self, key: &Arc<str>, item: T, cost: usize) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            inner.entries.push_back(Entry::Data { item, cost, key: Arc::clone(key) });
            inner.queued_bytes += cost;

            while inner.queued_bytes > self.high_water {
                inner.lagging = true;
                if !evict_oldest_data(&mut inner) {
                    break;
                }
            }
        }
        self.notify.notify_one();
        true
    }

    /// Enqueue an entry that must never be dropped or reordered.
    pub fn push_control(&self, item: T) -> bool {
        self.push_control_inner(item, None)
    }

    /// Enqueue an entry that may be replaced by a newer one with the same
    /// coalesce key while the queue is lagging.
    pub fn push_coalesce(&self, coalesce_key: impl Into<String>, item: T) -> bool {
        self.push_control_inner(item, Some(coalesce_key.into()))
    }

    fn push_control_inner(&self, item: T, coalesce: Option<String>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }

            if let Some(ref ckey) = coalesce {
                if inner.lagging {
                    let found = inner.entries.iter_mut().rev().find(|e| {
                        matches!(e, Entry::Control { coalesce: Some(k), .. } if k == ckey)
                    });
                    if let Some(Entry::Control { item: slot, .. }) = found {
                        *slot = item;
                        return true;
                    }
                }
            }

            if inner.control_count >= CONTROL_LIMIT {
                inner.closed = true;
                self.notify.notify_waiters();
                return false;
            }
            inner.entries.push_back(Entry::Control { item, coalesce });
            inner.control_count += 1;
        }
        self.notify.notify_one();
        true
    }

    /// Dequeue the next entry, waiting until one is available. Returns `None`
    /// once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Popped<T>> {
        loop {
            let notified = self.notify.notified();
            if let Some(popped) = self.try_pop() {
                return Some(popped);
            }
            if self.inner.lock().closed {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<Popped<T>> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.pop_front()?;
        let popped = match entry {
            Entry::Data { item, cost, .. } => {
                inner.queued_bytes -= cost;
                Popped::Item(item)
            }
            Entry::Control { item, .. } => {
                inner.control_count -= 1;
                Popped::Item(item)
            }
            Entry::Gap { key, missed } => {
                // The episode is over for this marker: further drops on the
                // same stream open a fresh one.
                inner.episodes.remove(&key);
                Popped::Gap { key, missed: missed.load(Ordering::Relaxed) }
            }
        };
        if inner.lagging && inner.queued_bytes <= self.low_water {
            inner.lagging = false;
            inner.episodes.clear();
        }
        Some(popped)
    }

    /// Close the queue. Queued entries remain poppable; pushes are refused.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_lagging(&self) -> bool {
        self.inner.lock().lagging
    }

    pub fn queued_bytes(&self) -> usize {
        self.inner.lock().queued_bytes
    }
}

/// Drop the oldest data entry, crediting its bytes to the owning stream's
/// open episode (planting a gap marker at the drop position if none is open).
/// Returns `false` when no data entry remains to evict.
fn evict_oldest_data<T>(inner: &mut Inner<T>) -> bool {
    let idx = inner
        .entries
        .iter()
        .position(|e| matches!(e, Entry::Data { .. }));
    let Some(idx) = idx else {
        return false;
    };
    let Some(Entry::Data { cost, key, .. }) = inner.entries.remove(idx) else {
        return false;
    };
    inner.queued_bytes -= cost;

    match inner.episodes.get(&key) {
        Some(counter) => {
            counter.fetch_add(cost as u64, Ordering::Relaxed);
        }
        None => {
            let counter = Arc::new(AtomicU64::new(cost as u64));
            inner.episodes.insert(Arc::clone(&key), Arc::clone(&counter));
            inner.entries.insert(idx, Entry::Gap { key, missed: counter });
        }
    }
    true
}

#[cfg(test)]
#[path = "outbound_tests.rs"]
mod tests;
