// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `weft` / `weftwarden` binaries as subprocesses and
//! exercises them over HTTP and WebSocket.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Resolve the path to a compiled workspace binary.
pub fn workspace_binary(name: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join(name)
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A spawned binary that is killed on drop.
pub struct ManagedProcess {
    child: Child,
    pub port: u16,
}

impl ManagedProcess {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.port))
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Spawn the `weft` host binary on a free port.
pub fn spawn_weft(extra_args: &[&str]) -> anyhow::Result<ManagedProcess> {
    let binary = workspace_binary("weft");
    anyhow::ensure!(binary.exists(), "weft binary not found at {}", binary.display());

    let port = free_port()?;
    let mut cmd = Command::new(binary);
    cmd.arg("--bind-port")
        .arg(port.to_string())
        .arg("--shell")
        .arg("/bin/sh")
        .arg("--log-format")
        .arg("text")
        .arg("--log-level")
        .arg("warn")
        .args(extra_args)
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = cmd.spawn()?;
    Ok(ManagedProcess { child, port })
}

/// Spawn the `weftwarden` binary on a free port.
pub fn spawn_warden(extra_args: &[&str]) -> anyhow::Result<ManagedProcess> {
    let binary = workspace_binary("weftwarden");
    anyhow::ensure!(binary.exists(), "weftwarden binary not found at {}", binary.display());

    let port = free_port()?;
    let mut cmd = Command::new(binary);
    cmd.arg("--bind-port")
        .arg(port.to_string())
        .arg("--log-format")
        .arg("text")
        .arg("--log-level")
        .arg("warn")
        .args(extra_args)
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = cmd.spawn()?;
    Ok(ManagedProcess { child, port })
}

/// Minimal HTTP GET returning (status, body).
pub async fn http_get(addr: &SocketAddr, path: &str) -> anyhow::Result<(u16, String)> {
    let mut stream = tokio::net::TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;
    let status: u16 = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("bad http response"))?;
    let body = response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("").to_owned();
    Ok((status, body))
}

/// Poll the health endpoint until the process answers.
pub async fn await_healthy(addr: &SocketAddr) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        if let Ok((200, _)) = http_get(addr, "/healthz").await {
            return Ok(());
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "process never became healthy on {addr}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
