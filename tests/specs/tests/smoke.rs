// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary smoke tests: the shipped `weft` and `weftwarden` executables,
//! exercised over their public surfaces.

use std::time::Duration;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use weft_specs::{await_healthy, http_get, spawn_warden, spawn_weft};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const WAIT: Duration = Duration::from_secs(10);

async fn ws_connect(port: u16) -> anyhow::Result<WsStream> {
    let (stream, _) =
        tokio_tungstenite::connect_async(&format!("ws://127.0.0.1:{port}/ws?principal=smoke"))
            .await?;
    Ok(stream)
}

async fn send_json(ws: &mut WsStream, value: &serde_json::Value) -> anyhow::Result<()> {
    ws.send(WsMessage::Text(serde_json::to_string(value)?.into())).await?;
    Ok(())
}

async fn recv_json(ws: &mut WsStream) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
            .ok_or_else(|| anyhow::anyhow!("ws closed"))??;
        if let WsMessage::Text(text) = msg {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

async fn await_response(ws: &mut WsStream, request_id: &str) -> anyhow::Result<serde_json::Value> {
    loop {
        let frame = recv_json(ws).await?;
        if frame["request_id"] == request_id {
            anyhow::ensure!(frame["payload"]["success"] == true, "request failed: {frame}");
            return Ok(frame);
        }
    }
}

#[tokio::test]
async fn weft_binary_serves_health() -> anyhow::Result<()> {
    let weft = spawn_weft(&[])?;
    await_healthy(&weft.addr()).await?;

    let (status, body) = http_get(&weft.addr(), "/healthz").await?;
    assert_eq!(status, 200);
    anyhow::ensure!(body.contains("\"status\":\"ok\""), "unexpected health body: {body}");
    Ok(())
}

#[tokio::test]
async fn weft_binary_runs_a_shell_end_to_end() -> anyhow::Result<()> {
    let weft = spawn_weft(&[])?;
    await_healthy(&weft.addr()).await?;

    let mut ws = ws_connect(weft.port).await?;
    send_json(
        &mut ws,
        &serde_json::json!({"event": "workspace:open", "request_id": "r1", "payload": {}}),
    )
    .await?;
    let open = await_response(&mut ws, "r1").await?;
    let workspace = open["payload"]["workspace_id"].as_str().unwrap_or_default().to_owned();

    send_json(
        &mut ws,
        &serde_json::json!({
            "event": "tab:create",
            "request_id": "r2",
            "payload": {"workspace_id": workspace, "kind": "terminal"},
        }),
    )
    .await?;
    let created = await_response(&mut ws, "r2").await?;
    let tab = created["payload"]["tab"]["tab_id"].as_str().unwrap_or_default().to_owned();
    let pane =
        created["payload"]["tab"]["panes"][0]["pane_id"].as_str().unwrap_or_default().to_owned();

    send_json(
        &mut ws,
        &serde_json::json!({
            "event": "terminal:input",
            "address": format!("workspace:{workspace}:tab:{tab}:pane:{pane}:terminal:input"),
            "payload": {
                "bytes_b64": base64::engine::general_purpose::STANDARD.encode(b"echo smoke-ok\n"),
            },
        }),
    )
    .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    let mut collected = Vec::new();
    loop {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "shell output never arrived: {:?}",
            String::from_utf8_lossy(&collected)
        );
        let frame = recv_json(&mut ws).await?;
        if frame["event"] == "terminal:data" {
            if let Some(encoded) = frame["payload"]["bytes_b64"].as_str() {
                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded) {
                    collected.extend_from_slice(&bytes);
                }
            }
            if collected.windows(8).any(|w| w == b"smoke-ok") {
                break;
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn warden_binary_serves_health_and_directives() -> anyhow::Result<()> {
    let warden = spawn_warden(&[])?;
    await_healthy(&warden.addr()).await?;

    let (status, body) = http_get(&warden.addr(), "/api/v1/directives").await?;
    assert_eq!(status, 200);
    anyhow::ensure!(body.contains("directives"), "unexpected body: {body}");
    Ok(())
}

#[tokio::test]
async fn weft_registers_with_warden() -> anyhow::Result<()> {
    let warden = spawn_warden(&[])?;
    await_healthy(&warden.addr()).await?;

    let supervisor_url = format!("ws://127.0.0.1:{}/ws/host", warden.port);
    let weft = spawn_weft(&["--supervisor-url", &supervisor_url, "--host-id", "smoke-host"])?;
    await_healthy(&weft.addr()).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let (status, body) = http_get(&warden.addr(), "/api/v1/hosts").await?;
        assert_eq!(status, 200);
        if body.contains("smoke-host") {
            break;
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "host never registered: {body}"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}
