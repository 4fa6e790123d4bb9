// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisory bus message envelope shared by host and authority.
//!
//! Every message carries a monotonic `msg_id` assigned by its sender; the
//! authority's ids are the ordering hosts apply directives in.

use serde::{Deserialize, Serialize};

use super::Directive;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub msg_id: u64,
    #[serde(flatten)]
    pub payload: BusPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusPayload {
    /// Host -> authority, once per connection.
    Register { host_id: String, terminals: Vec<String> },
    /// Authority -> host.
    Directive {
        #[serde(flatten)]
        action: DirectiveAction,
    },
    /// Host -> authority: a directive was applied.
    Ack { directive_id: u64, host_id: String },
    /// Host -> authority: a local Ctrl+D unblock happened (audit).
    UnblockRequest { directive_id: u64, terminal_id: String, host_id: String },
    /// Host -> authority after reconnect: ids it has applied.
    SyncRequest { host_id: String, applied: Vec<u64> },
    /// Authority -> host: current directive set plus ids revoked since.
    SyncResponse { directives: Vec<Directive>, revoked: Vec<u64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DirectiveAction {
    Block { directive: Directive },
    Unblock { directive_id: u64 },
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
