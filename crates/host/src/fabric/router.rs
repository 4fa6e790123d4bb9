// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical event fan-out and request/response correlation.
//!
//! Subscribers register address patterns; a published event reaches every
//! matching subscriber in registration order. Correlated requests are
//! tracked with a deadline so every request gets exactly one response:
//! a success, a typed error, or `request_timeout`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::fabric::address::Pattern;

/// An event flowing through the fabric.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub address: String,
    pub event: String,
    pub payload: serde_json::Value,
}

struct RouterSub {
    id: u64,
    patterns: Arc<Mutex<Vec<Pattern>>>,
    tx: mpsc::UnboundedSender<RoutedEvent>,
}

/// Handle held by a subscriber to grow or shrink its pattern set (e.g. a
/// connection joining another workspace).
#[derive(Clone)]
pub struct SubscriptionHandle {
    pub id: u64,
    patterns: Arc<Mutex<Vec<Pattern>>>,
}

impl SubscriptionHandle {
    pub fn add_pattern(&self, pattern: Pattern) {
        self.patterns.lock().push(pattern);
    }

    pub fn remove_pattern(&self, pattern: &Pattern) {
        self.patterns.lock().retain(|p| p != pattern);
    }
}

/// Pattern-based event fan-out, in subscriber insertion order.
pub struct EventRouter {
    subs: Mutex<Vec<RouterSub>>,
    next_id: AtomicU64,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self { subs: Mutex::new(Vec::new()), next_id: AtomicU64::new(1) }
    }

    pub fn subscribe(
        &self,
        initial: Vec<Pattern>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<RoutedEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let patterns = Arc::new(Mutex::new(initial));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.lock().push(RouterSub { id, patterns: Arc::clone(&patterns), tx });
        (SubscriptionHandle { id, patterns }, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subs.lock().retain(|s| s.id != id);
    }

    /// Deliver to every matching subscriber. Subscribers whose receiver is
    /// gone are pruned.
    pub fn publish(&self, event: RoutedEvent) {
        let mut dead = Vec::new();
        {
            let subs = self.subs.lock();
            for sub in subs.iter() {
                let matched = sub.patterns.lock().iter().any(|p| p.matches(&event.address));
                if matched && sub.tx.send(event.clone()).is_err() {
                    dead.push(sub.id);
                }
            }
        }
        if !dead.is_empty() {
            self.subs.lock().retain(|s| !dead.contains(&s.id));
        }
    }
}

/// A response addressed back to the connection that issued the request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub event: String,
    pub request_id: String,
    pub payload: serde_json::Value,
}

struct PendingRequest {
    expected_event: String,
    deadline: Instant,
    tx: mpsc::UnboundedSender<Reply>,
}

/// In-flight correlated requests, keyed by (connection, request id).
pub struct Correlations {
    pending: Mutex<HashMap<(String, String), PendingRequest>>,
    timeout: Duration,
}

impl Correlations {
    pub fn new(timeout: Duration) -> Self {
        Self { pending: Mutex::new(HashMap::new()), timeout }
    }

    /// Track a request. Returns `false` when the same request id is already
    /// in flight on this connection (the caller should reject it).
    pub fn register(
        &self,
        connection_id: &str,
        request_id: &str,
        expected_event: &str,
        tx: mpsc::UnboundedSender<Reply>,
    ) -> bool {
        let key = (connection_id.to_owned(), request_id.to_owned());
        let mut pending = self.pending.lock();
        if pending.contains_key(&key) {
            warn!(connection = connection_id, request_id, "duplicate request_id in flight");
            return false;
        }
        pending.insert(
            key,
            PendingRequest {
                expected_event: expected_event.to_owned(),
                deadline: Instant::now() + self.timeout,
                tx,
            },
        );
        true
    }

    /// Fulfill a request with its single response. A second fulfillment for
    /// the same request id is dropped with a warning.
    pub fn fulfill(
        &self,
        connection_id: &str,
        request_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> bool {
        let key = (connection_id.to_owned(), request_id.to_owned());
        let entry = self.pending.lock().remove(&key);
        let Some(entry) = entry else {
            warn!(
                connection = connection_id,
                request_id, event, "dropping duplicate or expired response"
            );
            return false;
        };
        if entry.expected_event != event {
            debug!(
                connection = connection_id,
                request_id,
                expected = entry.expected_event,
                got = event,
                "response event differs from expected"
            );
        }
        let _ = entry.tx.send(Reply {
            event: event.to_owned(),
            request_id: request_id.to_owned(),
            payload,
        });
        true
    }

    /// Drop all pending requests for a closed connection.
    pub fn drop_connection(&self, connection_id: &str) {
        self.pending.lock().retain(|(conn, _), _| conn != connection_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Expire overdue requests, sending each issuer a `request_timeout`.
    pub fn expire(&self, now: Instant) -> usize {
        let overdue: Vec<((String, String), PendingRequest)> = {
            let mut pending = self.pending.lock();
            let keys: Vec<(String, String)> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter().filter_map(|k| pending.remove_entry(&k)).collect()
        };

        let count = overdue.len();
        for ((connection_id, request_id), entry) in overdue {
            warn!(connection = %connection_id, request_id = %request_id, "request timed out");
            let payload = serde_json::json!({
                "success": false,
                "error": {
                    "code": ErrorCode::RequestTimeout.as_str(),
                    "message": "no response before deadline",
                },
            });
            let _ = entry.tx.send(Reply {
                event: entry.expected_event,
                request_id,
                payload,
            });
        }
        count
    }

    /// Background task expiring overdue requests once a second.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let correlations = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }
                correlations.expire(Instant::now());
            }
        });
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
