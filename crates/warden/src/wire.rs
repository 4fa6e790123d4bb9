// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisory bus wire contract, authority side.
//!
//! These types must stay JSON-compatible with the host's `supervisory::wire`
//! module; the two services share no code, only this contract.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    All,
    Workspace { workspace_id: String },
    Terminal { terminal_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnlockPolicy {
    CtrlD,
    SupervisorOnly,
    Timeout { ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub id: u64,
    pub scope: Scope,
    pub reason: String,
    pub source: String,
    pub issued_at_ms: u64,
    pub unlock: UnlockPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub msg_id: u64,
    #[serde(flatten)]
    pub payload: BusPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusPayload {
    Register { host_id: String, terminals: Vec<String> },
    Directive {
        #[serde(flatten)]
        action: DirectiveAction,
    },
    Ack { directive_id: u64, host_id: String },
    UnblockRequest { directive_id: u64, terminal_id: String, host_id: String },
    SyncRequest { host_id: String, applied: Vec<u64> },
    SyncResponse { directives: Vec<Directive>, revoked: Vec<u64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DirectiveAction {
    Block { directive: Directive },
    Unblock { directive_id: u64 },
}
