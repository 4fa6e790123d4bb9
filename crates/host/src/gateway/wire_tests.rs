// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn frame(event: &str, payload: serde_json::Value) -> Frame {
    Frame { event: event.to_owned(), address: None, request_id: Some("r1".to_owned()), payload }
}

#[test]
fn workspace_open_parses_with_empty_payload() -> anyhow::Result<()> {
    let parsed = parse_request(&frame("workspace:open", serde_json::json!({})))?;
    assert_eq!(parsed, ClientRequest::WorkspaceOpen);

    // Null payload (field omitted on the wire) is also fine.
    let parsed = parse_request(&frame("workspace:open", serde_json::Value::Null))?;
    assert_eq!(parsed, ClientRequest::WorkspaceOpen);
    Ok(())
}

#[test]
fn tab_create_parses_kind_and_options() -> anyhow::Result<()> {
    let parsed = parse_request(&frame(
        "tab:create",
        serde_json::json!({"workspace_id": "ws-1", "kind": "terminal", "title": "work", "cols": 120, "rows": 40}),
    ))?;
    assert_eq!(
        parsed,
        ClientRequest::TabCreate {
            workspace_id: "ws-1".to_owned(),
            kind: TabKind::Terminal,
            title: Some("work".to_owned()),
            shell: None,
            cols: Some(120),
            rows: Some(40),
        }
    );
    Ok(())
}

#[test]
fn unknown_tab_kind_is_bad_request() {
    let err = parse_request(&frame(
        "tab:create",
        serde_json::json!({"workspace_id": "ws-1", "kind": "browser"}),
    ));
    assert_eq!(err.err().map(|e| e.code), Some(ErrorCode::BadRequest));
}

#[test]
fn terminal_input_takes_pane_from_address() -> anyhow::Result<()> {
    let mut f = frame(
        "terminal:input",
        serde_json::json!({"bytes_b64": base64::engine::general_purpose::STANDARD.encode(b"echo hi\n")}),
    );
    f.address = Some("workspace:w-1:tab:t-1:pane:p-1:terminal:input".to_owned());

    let parsed = parse_request(&f)?;
    assert_eq!(
        parsed,
        ClientRequest::TerminalInput {
            pane_id: "p-1".to_owned(),
            data: Bytes::from_static(b"echo hi\n"),
        }
    );
    Ok(())
}

#[test]
fn terminal_input_without_address_is_bad_request() {
    let err = parse_request(&frame("terminal:input", serde_json::json!({"bytes_b64": "aGk="})));
    assert_eq!(err.err().map(|e| e.code), Some(ErrorCode::BadRequest));
}

#[test]
fn terminal_input_rejects_bad_base64() {
    let mut f = frame("terminal:input", serde_json::json!({"bytes_b64": "not base64!!!"}));
    f.address = Some("workspace:w:tab:t:pane:p:terminal:input".to_owned());
    let err = parse_request(&f);
    assert_eq!(err.err().map(|e| e.code), Some(ErrorCode::BadRequest));
}

#[test]
fn unknown_event_is_bad_request() {
    let err = parse_request(&frame("workspace:rename", serde_json::json!({})));
    assert_eq!(err.err().map(|e| e.code), Some(ErrorCode::BadRequest));
}

#[test]
fn attach_defaults_to_read_write() -> anyhow::Result<()> {
    let parsed = parse_request(&frame("terminal:attach", serde_json::json!({"pane_id": "p-1"})))?;
    assert_eq!(
        parsed,
        ClientRequest::TerminalAttach {
            pane_id: "p-1".to_owned(),
            mode: SubscriptionMode::ReadWrite,
        }
    );

    let parsed = parse_request(&frame(
        "terminal:attach",
        serde_json::json!({"pane_id": "p-1", "mode": "read"}),
    ))?;
    assert_eq!(
        parsed,
        ClientRequest::TerminalAttach { pane_id: "p-1".to_owned(), mode: SubscriptionMode::Read }
    );
    Ok(())
}

#[test]
fn ok_response_merges_success_flag() {
    let f = ok_response(
        "workspace:open:response",
        "r1",
        serde_json::json!({"workspace_id": "ws-1"}),
    );
    assert_eq!(f.payload["success"], true);
    assert_eq!(f.payload["workspace_id"], "ws-1");
    assert_eq!(f.request_id.as_deref(), Some("r1"));
}

#[test]
fn err_response_carries_typed_error() {
    let f = err_response("pane:split:response", "r2", ErrorCode::NotFound, "pane p-9");
    assert_eq!(f.payload["success"], false);
    assert_eq!(f.payload["error"]["code"], "not_found");
    assert_eq!(f.payload["error"]["message"], "pane p-9");
}

#[test]
fn frame_wire_shape_is_stable() -> anyhow::Result<()> {
    let f = terminal_data(
        "workspace:w:tab:t:pane:p:terminal:data".to_owned(),
        42,
        b"hi",
    );
    let json = serde_json::to_value(&f)?;
    assert_eq!(json["event"], "terminal:data");
    assert_eq!(json["address"], "workspace:w:tab:t:pane:p:terminal:data");
    assert_eq!(json["payload"]["offset"], 42);
    assert!(json.get("request_id").is_none());

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(json["payload"]["bytes_b64"].as_str().unwrap_or_default())?;
    assert_eq!(decoded, b"hi");
    Ok(())
}

#[test]
fn gap_and_closed_frames() -> anyhow::Result<()> {
    let gap = terminal_gap("workspace:w:tab:t:pane:p:terminal:gap".to_owned(), 4096);
    assert_eq!(gap.payload["missed_bytes_estimate"], 4096);

    let closed = terminal_closed(
        "workspace:w:tab:t:pane:p:terminal:closed".to_owned(),
        Some(ExitStatus { code: Some(0), signal: None }),
    );
    assert_eq!(closed.payload["exit_status"], 0);

    let killed = terminal_closed(
        "workspace:w:tab:t:pane:p:terminal:closed".to_owned(),
        Some(ExitStatus { code: None, signal: Some(9) }),
    );
    assert_eq!(killed.payload["signal"], 9);
    assert_eq!(killed.payload["exit_status"], serde_json::Value::Null);
    Ok(())
}
