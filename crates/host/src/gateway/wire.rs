// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames for the browser / shell-wrapper protocol.
//!
//! Every frame is a JSON object `{event, address?, request_id?, payload}`.
//! Requests carry their ids in the payload (or, for terminal ops, in the
//! hierarchical address); every request with a `request_id` receives exactly
//! one `<event>:response` frame with `success` and, on failure, a typed
//! error.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, OpError};
use crate::fabric::address::Address;
use crate::fabric::model::{SplitDirection, TabKind, WorkspaceShape};
use crate::terminal::{ExitStatus, SubscriptionMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Frame {
    pub fn response_event(&self) -> String {
        format!("{}:response", self.event)
    }
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    WorkspaceOpen,
    WorkspaceResume { workspace_id: String },
    TabCreate {
        workspace_id: String,
        kind: TabKind,
        title: Option<String>,
        shell: Option<String>,
        cols: Option<u16>,
        rows: Option<u16>,
    },
    TabSwitch { workspace_id: String, tab_id: String },
    TabClose { tab_id: String },
    PaneSplit { pane_id: String, direction: SplitDirection },
    PaneClose { pane_id: String },
    TerminalCreate {
        pane_id: String,
        shell: Option<String>,
        cols: Option<u16>,
        rows: Option<u16>,
    },
    TerminalAttach { pane_id: String, mode: SubscriptionMode },
    TerminalInput { pane_id: String, data: Bytes },
    TerminalResize { pane_id: String, cols: u16, rows: u16 },
    TerminalClose { pane_id: String },
}

#[derive(Debug, Deserialize)]
struct WorkspaceResumePayload {
    workspace_id: String,
}

#[derive(Debug, Deserialize)]
struct TabCreatePayload {
    workspace_id: String,
    kind: String,
    title: Option<String>,
    shell: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TabSwitchPayload {
    workspace_id: String,
    tab_id: String,
}

#[derive(Debug, Deserialize)]
struct TabClosePayload {
    tab_id: String,
}

#[derive(Debug, Deserialize)]
struct PaneSplitPayload {
    pane_id: String,
    direction: SplitDirection,
}

#[derive(Debug, Deserialize)]
struct PaneClosePayload {
    pane_id: String,
}

#[derive(Debug, Deserialize)]
struct TerminalCreatePayload {
    pane_id: String,
    shell: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TerminalAttachPayload {
    pane_id: String,
    #[serde(default = "default_attach_mode")]
    mode: SubscriptionMode,
}

fn default_attach_mode() -> SubscriptionMode {
    SubscriptionMode::ReadWrite
}

#[derive(Debug, Deserialize)]
struct TerminalInputPayload {
    bytes_b64: String,
}

#[derive(Debug, Deserialize)]
struct TerminalResizePayload {
    cols: u16,
    rows: u16,
}

/// Parse a client frame into a typed request.
pub fn parse_request(frame: &Frame) -> Result<ClientRequest, OpError> {
    match frame.event.as_str() {
        "workspace:open" => Ok(ClientRequest::WorkspaceOpen),
        "workspace:resume" => {
            let p: WorkspaceResumePayload = payload(frame)?;
            Ok(ClientRequest::WorkspaceResume { workspace_id: p.workspace_id })
        }
        "tab:create" => {
            let p: TabCreatePayload = payload(frame)?;
            let kind = TabKind::parse(&p.kind)
                .ok_or_else(|| OpError::bad_request(format!("unknown tab kind: {}", p.kind)))?;
            Ok(ClientRequest::TabCreate {
                workspace_id: p.workspace_id,
                kind,
                title: p.title,
                shell: p.shell,
                cols: p.cols,
                rows: p.rows,
            })
        }
        "tab:switch" => {
            let p: TabSwitchPayload = payload(frame)?;
            Ok(ClientRequest::TabSwitch { workspace_id: p.workspace_id, tab_id: p.tab_id })
        }
        "tab:close" => {
            let p: TabClosePayload = payload(frame)?;
            Ok(ClientRequest::TabClose { tab_id: p.tab_id })
        }
        "pane:split" => {
            let p: PaneSplitPayload = payload(frame)?;
            Ok(ClientRequest::PaneSplit { pane_id: p.pane_id, direction: p.direction })
        }
        "pane:close" => {
            let p: PaneClosePayload = payload(frame)?;
            Ok(ClientRequest::PaneClose { pane_id: p.pane_id })
        }
        "terminal:create" => {
            let p: TerminalCreatePayload = payload(frame)?;
            Ok(ClientRequest::TerminalCreate {
                pane_id: p.pane_id,
                shell: p.shell,
                cols: p.cols,
                rows: p.rows,
            })
        }
        "terminal:attach" => {
            let p: TerminalAttachPayload = payload(frame)?;
            Ok(ClientRequest::TerminalAttach { pane_id: p.pane_id, mode: p.mode })
        }
        "terminal:input" => {
            let pane_id = pane_from_address(frame)?;
            let p: TerminalInputPayload = payload(frame)?;
            let data = base64::engine::general_purpose::STANDARD
                .decode(&p.bytes_b64)
                .map_err(|_| OpError::bad_request("invalid base64 input"))?;
            Ok(ClientRequest::TerminalInput { pane_id, data: Bytes::from(data) })
        }
        "terminal:resize" => {
            let pane_id = pane_from_address(frame)?;
            let p: TerminalResizePayload = payload(frame)?;
            Ok(ClientRequest::TerminalResize { pane_id, cols: p.cols, rows: p.rows })
        }
        "terminal:close" => {
            let pane_id = pane_from_address(frame)?;
            Ok(ClientRequest::TerminalClose { pane_id })
        }
        other => Err(OpError::bad_request(format!("unknown event: {other}"))),
    }
}

fn payload<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T, OpError> {
    serde_json::from_value(frame.payload.clone())
        .map_err(|e| OpError::bad_request(format!("invalid payload for {}: {e}", frame.event)))
}

/// Terminal ops address their pane hierarchically.
fn pane_from_address(frame: &Frame) -> Result<String, OpError> {
    let address = frame
        .address
        .as_deref()
        .ok_or_else(|| OpError::bad_request(format!("{} requires an address", frame.event)))?;
    match Address::parse(address) {
        Some(Address::Terminal { pane, .. }) | Some(Address::Pane { pane, .. }) => Ok(pane),
        _ => Err(OpError::bad_request(format!("invalid terminal address: {address}"))),
    }
}

// -- server frame builders ---------------------------------------------------

/// Merge `success: true` into a response payload.
pub fn success_payload(payload: serde_json::Value) -> serde_json::Value {
    let mut payload = match payload {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("result".to_owned(), other);
            map
        }
    };
    payload.insert("success".to_owned(), serde_json::Value::Bool(true));
    serde_json::Value::Object(payload)
}

/// Response payload for a typed error.
pub fn error_payload(code: ErrorCode, message: &str) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "error": { "code": code.as_str(), "message": message },
    })
}

/// Successful `<event>:response`. The payload gains `success: true`.
pub fn ok_response(event: &str, request_id: &str, payload: serde_json::Value) -> Frame {
    Frame {
        event: event.to_owned(),
        address: None,
        request_id: Some(request_id.to_owned()),
        payload: success_payload(payload),
    }
}

/// Failed `<event>:response` carrying a typed error.
pub fn err_response(event: &str, request_id: &str, code: ErrorCode, message: &str) -> Frame {
    Frame {
        event: event.to_owned(),
        address: None,
        request_id: Some(request_id.to_owned()),
        payload: error_payload(code, message),
    }
}

/// Out-of-band error for frames that carried no request id.
pub fn error_frame(code: ErrorCode, message: &str) -> Frame {
    Frame {
        event: "error".to_owned(),
        address: None,
        request_id: None,
        payload: error_payload(code, message),
    }
}

/// A server-initiated event at a hierarchical address.
pub fn server_event(event: &str, address: String, payload: serde_json::Value) -> Frame {
    Frame { event: event.to_owned(), address: Some(address), request_id: None, payload }
}

pub fn terminal_data(address: String, offset: u64, data: &[u8]) -> Frame {
    server_event(
        "terminal:data",
        address,
        serde_json::json!({
            "bytes_b64": base64::engine::general_purpose::STANDARD.encode(data),
            "offset": offset,
        }),
    )
}

pub fn terminal_gap(address: String, missed_bytes_estimate: u64) -> Frame {
    server_event(
        "terminal:gap",
        address,
        serde_json::json!({ "missed_bytes_estimate": missed_bytes_estimate }),
    )
}

pub fn terminal_blocked(address: String, directive_id: u64, reason: &str) -> Frame {
    server_event(
        "terminal:blocked",
        address,
        serde_json::json!({ "directive_id": directive_id, "reason": reason }),
    )
}

pub fn terminal_unblocked(address: String, directive_id: u64) -> Frame {
    server_event("terminal:unblocked", address, serde_json::json!({ "directive_id": directive_id }))
}

pub fn terminal_closed(address: String, exit: Option<ExitStatus>) -> Frame {
    let exit_status = exit.and_then(|e| e.code);
    let signal = exit.and_then(|e| e.signal);
    server_event(
        "terminal:closed",
        address,
        serde_json::json!({ "exit_status": exit_status, "signal": signal }),
    )
}

pub fn workspace_state(shape: &WorkspaceShape) -> Frame {
    let address = Address::workspace(&shape.workspace_id).render();
    let payload = serde_json::to_value(shape).unwrap_or_default();
    server_event("workspace:state", address, payload)
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
