// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authority state: the directive registry with monotonic ids, the table of
//! connected hosts, and the audit trail of acknowledgements and local
//! unblocks.
//!
//! Delivery is at-least-once: every directive is pushed to each connected
//! host, and a host that reconnects resynchronizes against the full set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::wire::{BusMessage, BusPayload, Directive, DirectiveAction, Scope, UnlockPolicy};

/// One connected host link.
pub struct HostLink {
    pub host_id: String,
    pub tx: mpsc::UnboundedSender<BusMessage>,
    pub terminals: RwLock<Vec<String>>,
    pub connected_at_ms: u64,
    pub last_ack: AtomicU64,
}

/// Serializable host snapshot for the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub host_id: String,
    pub terminals: Vec<String>,
    pub connected_at_ms: u64,
    pub last_ack: u64,
}

/// One audit record: issued directives, acks, local unblock reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at_ms: u64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive_id: Option<u64>,
    pub detail: String,
}

pub struct WardenState {
    next_msg_id: AtomicU64,
    directives: RwLock<IndexMap<u64, Directive>>,
    hosts: RwLock<HashMap<String, Arc<HostLink>>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl Default for WardenState {
    fn default() -> Self {
        Self::new()
    }
}

impl WardenState {
    pub fn new() -> Self {
        Self {
            next_msg_id: AtomicU64::new(1),
            directives: RwLock::new(IndexMap::new()),
            hosts: RwLock::new(HashMap::new()),
            audit: RwLock::new(Vec::new()),
        }
    }

    fn take_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Issue a block directive and broadcast it to every connected host.
    pub async fn issue_block(
        &self,
        scope: Scope,
        reason: String,
        unlock: UnlockPolicy,
        source: String,
    ) -> Directive {
        let id = self.take_msg_id();
        let directive = Directive {
            id,
            scope,
            reason,
            source,
            issued_at_ms: epoch_ms(),
            unlock,
        };
        self.directives.write().await.insert(id, directive.clone());
        self.push_audit("block_issued", None, Some(id), directive.reason.clone()).await;
        info!(directive = id, "block directive issued");

        self.broadcast(BusMessage {
            msg_id: id,
            payload: BusPayload::Directive {
                action: DirectiveAction::Block { directive: directive.clone() },
            },
        })
        .await;
        directive
    }

    /// Revoke a directive. Returns `false` when the id is unknown.
    pub async fn issue_unblock(&self, directive_id: u64) -> bool {
        let removed = self.directives.write().await.shift_remove(&directive_id).is_some();
        if !removed {
            return false;
        }
        let msg_id = self.take_msg_id();
        self.push_audit("unblock_issued", None, Some(directive_id), String::new()).await;
        info!(directive = directive_id, "unblock issued");

        self.broadcast(BusMessage {
            msg_id,
            payload: BusPayload::Directive { action: DirectiveAction::Unblock { directive_id } },
        })
        .await;
        true
    }

    /// Register (or replace) a host link.
    pub async fn register_host(
        &self,
        host_id: &str,
        terminals: Vec<String>,
        tx: mpsc::UnboundedSender<BusMessage>,
    ) -> Arc<HostLink> {
        let link = Arc::new(HostLink {
            host_id: host_id.to_owned(),
            tx,
            terminals: RwLock::new(terminals),
            connected_at_ms: epoch_ms(),
            last_ack: AtomicU64::new(0),
        });
        let replaced =
            self.hosts.write().await.insert(host_id.to_owned(), Arc::clone(&link)).is_some();
        if replaced {
            warn!(host = host_id, "host re-registered, dropping previous link");
        }
        self.push_audit("host_registered", Some(host_id.to_owned()), None, String::new()).await;
        info!(host = host_id, "host registered");
        link
    }

    /// Refresh the terminal set a host reported.
    pub async fn update_terminals(&self, host_id: &str, terminals: Vec<String>) {
        if let Some(link) = self.hosts.read().await.get(host_id) {
            *link.terminals.write().await = terminals;
        }
    }

    pub async fn deregister_host(&self, host_id: &str) {
        if self.hosts.write().await.remove(host_id).is_some() {
            self.push_audit("host_lost", Some(host_id.to_owned()), None, String::new()).await;
            info!(host = host_id, "host link closed");
        }
    }

    pub async fn record_ack(&self, host_id: &str, directive_id: u64) {
        if let Some(link) = self.hosts.read().await.get(host_id) {
            link.last_ack.store(directive_id, Ordering::Relaxed);
        }
        self.push_audit("ack", Some(host_id.to_owned()), Some(directive_id), String::new()).await;
    }

    /// A host reported a local Ctrl+D unblock. Recorded for audit; the
    /// operator may veto by issuing a stricter directive.
    pub async fn record_unblock_request(
        &self,
        host_id: &str,
        directive_id: u64,
        terminal_id: &str,
    ) {
        warn!(host = host_id, directive = directive_id, terminal = terminal_id, "local unblock");
        self.push_audit(
            "local_unblock",
            Some(host_id.to_owned()),
            Some(directive_id),
            format!("terminal {terminal_id}"),
        )
        .await;
    }

    /// Answer a host's sync request: the full active set, plus revocations
    /// for anything it applied that no longer exists.
    pub async fn sync_response_for(&self, applied: &[u64]) -> BusMessage {
        let directives = self.directives.read().await;
        let current: Vec<Directive> = directives.values().cloned().collect();
        let revoked: Vec<u64> =
            applied.iter().copied().filter(|id| !directives.contains_key(id)).collect();
        BusMessage {
            msg_id: self.take_msg_id(),
            payload: BusPayload::SyncResponse { directives: current, revoked },
        }
    }

    pub async fn active_directives(&self) -> Vec<Directive> {
        self.directives.read().await.values().cloned().collect()
    }

    pub async fn hosts_info(&self) -> Vec<HostInfo> {
        let hosts = self.hosts.read().await;
        let mut out = Vec::with_capacity(hosts.len());
        for link in hosts.values() {
            out.push(HostInfo {
                host_id: link.host_id.clone(),
                terminals: link.terminals.read().await.clone(),
                connected_at_ms: link.connected_at_ms,
                last_ack: link.last_ack.load(Ordering::Relaxed),
            });
        }
        out.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        out
    }

    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.read().await.clone()
    }

    pub async fn host_count(&self) -> usize {
        self.hosts.read().await.len()
    }

    async fn broadcast(&self, msg: BusMessage) {
        let hosts = self.hosts.read().await;
        for link in hosts.values() {
            if link.tx.send(msg.clone()).is_err() {
                warn!(host = %link.host_id, "host link send failed");
            }
        }
    }

    async fn push_audit(
        &self,
        kind: &str,
        host_id: Option<String>,
        directive_id: Option<u64>,
        detail: String,
    ) {
        self.audit.write().await.push(AuditEntry {
            at_ms: epoch_ms(),
            kind: kind.to_owned(),
            host_id,
            directive_id,
            detail,
        });
    }
}

pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
