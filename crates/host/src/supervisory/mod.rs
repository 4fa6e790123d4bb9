// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Block/unblock directives issued by the central authority, and the
//! host-local bookkeeping that applies them in authority order.

pub mod link;
pub mod wire;

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Which terminals a directive covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    All,
    Workspace { workspace_id: String },
    Terminal { terminal_id: String },
}

/// How a blocked terminal may become unblocked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnlockPolicy {
    /// The owner may clear the block locally by sending `0x04`.
    CtrlD,
    /// Only an explicit authority unblock (or supervisor override) clears it.
    SupervisorOnly,
    /// The block expires on its own.
    Timeout { ms: u64 },
}

/// An authority-issued block order. Ids are authority-assigned and strictly
/// monotonic; hosts apply in id order and ignore duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub id: u64,
    pub scope: Scope,
    pub reason: String,
    pub source: String,
    pub issued_at_ms: u64,
    pub unlock: UnlockPolicy,
}

impl Directive {
    /// Whether this directive covers a terminal living in the given
    /// workspace.
    pub fn covers(&self, workspace_id: Option<&str>, terminal_id: &str) -> bool {
        match &self.scope {
            Scope::All => true,
            Scope::Workspace { workspace_id: w } => workspace_id == Some(w.as_str()),
            Scope::Terminal { terminal_id: t } => t == terminal_id,
        }
    }
}

struct DirectiveInner {
    active: BTreeMap<u64, Directive>,
    last_seen_msg: u64,
}

/// The host's view of the authority's directive stream.
///
/// Single writer (the supervisory link task); terminals consult it at
/// creation so blocks installed before they existed still apply.
pub struct DirectiveSet {
    inner: Mutex<DirectiveInner>,
}

impl Default for DirectiveSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectiveSet {
    pub fn new() -> Self {
        Self { inner: Mutex::new(DirectiveInner { active: BTreeMap::new(), last_seen_msg: 0 }) }
    }

    /// Record a bus message id. Returns `false` for duplicates and
    /// out-of-order replays, which the caller must ignore.
    pub fn observe_msg(&self, msg_id: u64) -> bool {
        let mut inner = self.inner.lock();
        if msg_id <= inner.last_seen_msg {
            return false;
        }
        inner.last_seen_msg = msg_id;
        true
    }

    pub fn last_seen_msg(&self) -> u64 {
        self.inner.lock().last_seen_msg
    }

    pub fn insert(&self, directive: Directive) {
        self.inner.lock().active.insert(directive.id, directive);
    }

    pub fn remove(&self, directive_id: u64) -> Option<Directive> {
        self.inner.lock().active.remove(&directive_id)
    }

    /// Active directives in id order.
    pub fn active(&self) -> Vec<Directive> {
        self.inner.lock().active.values().cloned().collect()
    }

    pub fn applied_ids(&self) -> Vec<u64> {
        self.inner.lock().active.keys().copied().collect()
    }

    /// Directives that cover a terminal, in id order. Used when a terminal is
    /// created while blocks are already in force.
    pub fn matching(&self, workspace_id: Option<&str>, terminal_id: &str) -> Vec<Directive> {
        self.inner
            .lock()
            .active
            .values()
            .filter(|d| d.covers(workspace_id, terminal_id))
            .cloned()
            .collect()
    }

    /// Drop every directive eligible for fail-open (the authority link has
    /// been down past the configured window). `supervisor_only` directives
    /// are retained: those fail closed.
    pub fn fail_open(&self) -> Vec<Directive> {
        let mut inner = self.inner.lock();
        let open: Vec<u64> = inner
            .active
            .values()
            .filter(|d| matches!(d.unlock, UnlockPolicy::CtrlD))
            .map(|d| d.id)
            .collect();
        open.iter().filter_map(|id| inner.active.remove(id)).collect()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
