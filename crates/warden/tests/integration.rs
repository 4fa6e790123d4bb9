// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warden integration: a scripted host link plus the admin HTTP API.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use weftwarden::config::Config;
use weftwarden::run::{prepare, RunningWarden};
use weftwarden::wire::{BusMessage, BusPayload, DirectiveAction};

const WAIT: Duration = Duration::from_secs(10);

fn test_config() -> Config {
    Config {
        bind_host: "127.0.0.1".to_owned(),
        bind_port: 0,
        auth_token: None,
        log_format: "text".to_owned(),
        log_level: "warn".to_owned(),
    }
}

/// Minimal HTTP/1.1 client; good enough for the admin API.
async fn http_request(
    addr: &SocketAddr,
    method: &str,
    path: &str,
    auth: Option<&str>,
    body: Option<&serde_json::Value>,
) -> anyhow::Result<(u16, serde_json::Value)> {
    let mut stream = tokio::net::TcpStream::connect(addr).await?;
    let body_text = body.map(serde_json::to_string).transpose()?.unwrap_or_default();

    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    if let Some(token) = auth {
        request.push_str(&format!("Authorization: Bearer {token}\r\n"));
    }
    if !body_text.is_empty() {
        request.push_str("Content-Type: application/json\r\n");
        request.push_str(&format!("Content-Length: {}\r\n", body_text.len()));
    }
    request.push_str("\r\n");
    request.push_str(&body_text);

    stream.write_all(request.as_bytes()).await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    let response = String::from_utf8(response)?;

    let status: u16 = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("bad http response: {response}"))?;
    let body = response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");
    // Strip a chunked-encoding frame if present.
    let json_start = body.find('{');
    let json_end = body.rfind('}');
    let parsed = match (json_start, json_end) {
        (Some(start), Some(end)) if end >= start => {
            serde_json::from_str(&body[start..=end]).unwrap_or(serde_json::Value::Null)
        }
        _ => serde_json::Value::Null,
    };
    Ok((status, parsed))
}

type HostWs =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_host(addr: &SocketAddr, host_id: &str) -> anyhow::Result<HostWs> {
    let (mut stream, _) =
        tokio_tungstenite::connect_async(&format!("ws://{addr}/ws/host")).await?;
    let register = BusMessage {
        msg_id: 1,
        payload: BusPayload::Register {
            host_id: host_id.to_owned(),
            terminals: vec!["term-1".to_owned()],
        },
    };
    stream.send(WsMessage::Text(serde_json::to_string(&register)?.into())).await?;
    Ok(stream)
}

async fn recv_bus(stream: &mut HostWs) -> anyhow::Result<BusMessage> {
    loop {
        let msg = tokio::time::timeout(WAIT, stream.next())
            .await
            .map_err(|_| anyhow::anyhow!("no bus message"))?
            .ok_or_else(|| anyhow::anyhow!("link closed"))??;
        if let WsMessage::Text(text) = msg {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

async fn send_bus(stream: &mut HostWs, msg: &BusMessage) -> anyhow::Result<()> {
    stream.send(WsMessage::Text(serde_json::to_string(msg)?.into())).await?;
    Ok(())
}

/// Poll an admin endpoint until the predicate holds.
async fn poll_until(
    addr: &SocketAddr,
    path: &str,
    mut pred: impl FnMut(&serde_json::Value) -> bool,
) -> anyhow::Result<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let (status, body) = http_request(addr, "GET", path, None, None).await?;
        anyhow::ensure!(status == 200, "GET {path} -> {status}");
        if pred(&body) {
            return Ok(body);
        }
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "{path} never matched: {body}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_warden(config: Config) -> anyhow::Result<RunningWarden> {
    prepare(config).await
}

#[tokio::test]
async fn block_flow_across_link_and_admin_api() -> anyhow::Result<()> {
    let warden = spawn_warden(test_config()).await?;
    let addr = warden.local_addr;

    let mut host = connect_host(&addr, "host-a").await?;
    poll_until(&addr, "/api/v1/hosts", |b| {
        b["hosts"].as_array().map(Vec::len) == Some(1)
    })
    .await?;

    // Issue a block over the admin API.
    let (status, body) = http_request(
        &addr,
        "POST",
        "/api/v1/directives",
        None,
        Some(&serde_json::json!({
            "scope": {"kind": "all"},
            "reason": "drill",
            "unlock_policy": {"kind": "ctrl_d"},
        })),
    )
    .await?;
    anyhow::ensure!(status == 200, "block issue failed: {status} {body}");
    let directive_id = body["directive"]["id"].as_u64().unwrap_or_default();
    anyhow::ensure!(directive_id > 0);

    // The host link receives it; ack back.
    let msg = recv_bus(&mut host).await?;
    match msg.payload {
        BusPayload::Directive { action: DirectiveAction::Block { ref directive } } => {
            assert_eq!(directive.id, directive_id);
            assert_eq!(directive.reason, "drill");
        }
        other => anyhow::bail!("expected block directive, got {other:?}"),
    }
    send_bus(
        &mut host,
        &BusMessage {
            msg_id: 2,
            payload: BusPayload::Ack { directive_id, host_id: "host-a".to_owned() },
        },
    )
    .await?;

    poll_until(&addr, "/api/v1/hosts", |b| {
        b["hosts"][0]["last_ack"].as_u64() == Some(directive_id)
    })
    .await?;

    // A local unblock report lands in the audit trail.
    send_bus(
        &mut host,
        &BusMessage {
            msg_id: 3,
            payload: BusPayload::UnblockRequest {
                directive_id,
                terminal_id: "term-1".to_owned(),
                host_id: "host-a".to_owned(),
            },
        },
    )
    .await?;
    poll_until(&addr, "/api/v1/audit", |b| {
        b["audit"]
            .as_array()
            .is_some_and(|entries| entries.iter().any(|e| e["kind"] == "local_unblock"))
    })
    .await?;

    // Revoking pushes an unblock down the link.
    let (status, _) = http_request(
        &addr,
        "DELETE",
        &format!("/api/v1/directives/{directive_id}"),
        None,
        None,
    )
    .await?;
    anyhow::ensure!(status == 200);
    let msg = recv_bus(&mut host).await?;
    assert_eq!(
        msg.payload,
        BusPayload::Directive { action: DirectiveAction::Unblock { directive_id } }
    );

    // Sync after the revoke reports it as revoked.
    send_bus(
        &mut host,
        &BusMessage {
            msg_id: 4,
            payload: BusPayload::SyncRequest {
                host_id: "host-a".to_owned(),
                applied: vec![directive_id],
            },
        },
    )
    .await?;
    let msg = recv_bus(&mut host).await?;
    match msg.payload {
        BusPayload::SyncResponse { directives, revoked } => {
            assert!(directives.is_empty());
            assert_eq!(revoked, vec![directive_id]);
        }
        other => anyhow::bail!("expected sync_response, got {other:?}"),
    }

    warden.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn admin_api_requires_bearer_token_when_configured() -> anyhow::Result<()> {
    let mut config = test_config();
    config.auth_token = Some("sesame".to_owned());
    let warden = spawn_warden(config).await?;
    let addr = warden.local_addr;

    let (status, _) = http_request(&addr, "GET", "/api/v1/directives", None, None).await?;
    assert_eq!(status, 401);

    let (status, _) =
        http_request(&addr, "GET", "/api/v1/directives", Some("wrong"), None).await?;
    assert_eq!(status, 401);

    let (status, body) =
        http_request(&addr, "GET", "/api/v1/directives", Some("sesame"), None).await?;
    assert_eq!(status, 200);
    assert!(body["directives"].as_array().is_some());

    // Health stays open for probes.
    let (status, _) = http_request(&addr, "GET", "/healthz", None, None).await?;
    assert_eq!(status, 200);

    warden.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn unknown_directive_delete_is_404() -> anyhow::Result<()> {
    let warden = spawn_warden(test_config()).await?;
    let (status, _) =
        http_request(&warden.local_addr, "DELETE", "/api/v1/directives/999", None, None).await?;
    assert_eq!(status, 404);
    warden.shutdown.cancel();
    Ok(())
}
