// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `weft wrap` — the shell wrapper: an async client speaking the same wire
//! protocol as browsers.
//!
//! Opens a workspace and a terminal tab sized to the local terminal, puts
//! the local terminal in raw mode, and proxies bytes both ways. Detach with
//! Ctrl+] (0x1d). SIGWINCH propagates as `terminal:resize`.

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use nix::sys::termios;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::gateway::wire::Frame;

/// Detach key: Ctrl+] (ASCII 0x1d), same as telnet.
const DETACH_KEY: u8 = 0x1d;

/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a setup response.
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, clap::Args)]
pub struct WrapArgs {
    /// Gateway WebSocket URL.
    #[arg(long, env = "WEFT_URL", default_value = "ws://127.0.0.1:8717/ws")]
    pub url: String,

    /// Bearer token, if the gateway requires one.
    #[arg(long, env = "WEFT_AUTH_TOKEN")]
    pub token: Option<String>,

    /// Principal id to connect as (defaults to $USER).
    #[arg(long)]
    pub principal: Option<String>,

    /// Shell command to run remotely (defaults to the host's configured
    /// shell).
    #[arg(long)]
    pub shell: Option<String>,

    /// Tab title.
    #[arg(long, default_value = "wrapped shell")]
    pub title: String,
}

/// Run the wrapper; the return value is the process exit code.
pub async fn run(args: WrapArgs) -> i32 {
    match wrap_session(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("weft wrap: {e:#}");
            1
        }
    }
}

async fn wrap_session(args: WrapArgs) -> anyhow::Result<i32> {
    let principal = args
        .principal
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "wrapper".to_owned());
    let url = build_url(&args, &principal);

    let (cols, rows) = local_window().unwrap_or((80, 24));

    let (stream, _) = tokio_tungstenite::connect_async(&url).await?;
    let (mut ws_tx, mut ws_rx) = stream.split();

    // Setup handshake: open a workspace, then a terminal tab at local size.
    send(&mut ws_tx, &request("workspace:open", "wrap-open", None, serde_json::json!({}))).await?;
    let open = await_response(&mut ws_rx, "wrap-open").await?;
    let workspace_id = open.payload["workspace_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("workspace:open returned no workspace_id"))?
        .to_owned();

    let mut create = serde_json::json!({
        "workspace_id": workspace_id,
        "kind": "terminal",
        "title": args.title,
        "cols": cols,
        "rows": rows,
    });
    if let Some(ref shell) = args.shell {
        create["shell"] = serde_json::Value::String(shell.clone());
    }
    send(&mut ws_tx, &request("tab:create", "wrap-tab", None, create)).await?;
    let created = await_response(&mut ws_rx, "wrap-tab").await?;

    let tab_id = created.payload["tab"]["tab_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("tab:create returned no tab"))?
        .to_owned();
    let pane_id = created.payload["tab"]["panes"][0]["pane_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("tab:create returned no pane"))?
        .to_owned();
    let input_address =
        format!("workspace:{workspace_id}:tab:{tab_id}:pane:{pane_id}:terminal:input");
    let resize_address =
        format!("workspace:{workspace_id}:tab:{tab_id}:pane:{pane_id}:terminal:resize");

    // Local terminal goes raw only after the session is up.
    let _tty = LocalTty::raw()?;
    let mut stdout = std::io::stdout();

    // Blocking stdin reads happen off the async loop.
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(32);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut winch =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change()).ok();
    let mut ping = tokio::time::interval(PING_INTERVAL);

    let exit_code: i32 = loop {
        tokio::select! {
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break 1;
                }
            }

            _ = async {
                match winch {
                    Some(ref mut s) => { s.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if let Some((cols, rows)) = local_window() {
                    let frame = Frame {
                        event: "terminal:resize".to_owned(),
                        address: Some(resize_address.clone()),
                        request_id: None,
                        payload: serde_json::json!({ "cols": cols, "rows": rows }),
                    };
                    if send(&mut ws_tx, &frame).await.is_err() {
                        break 1;
                    }
                }
            }

            chunk = stdin_rx.recv() => {
                let Some(chunk) = chunk else { break 0 };
                if chunk.contains(&DETACH_KEY) {
                    break 0;
                }
                let frame = Frame {
                    event: "terminal:input".to_owned(),
                    address: Some(input_address.clone()),
                    request_id: None,
                    payload: serde_json::json!({
                        "bytes_b64": base64::engine::general_purpose::STANDARD.encode(&chunk),
                    }),
                };
                if send(&mut ws_tx, &frame).await.is_err() {
                    break 1;
                }
            }

            msg = ws_rx.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => frame,
                            Err(_) => continue,
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break 0,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break 1,
                };
                match frame.event.as_str() {
                    "terminal:data" => {
                        if let Some(encoded) = frame.payload["bytes_b64"].as_str() {
                            if let Ok(bytes) =
                                base64::engine::general_purpose::STANDARD.decode(encoded)
                            {
                                let _ = stdout.write_all(&bytes);
                                let _ = stdout.flush();
                            }
                        }
                    }
                    "terminal:gap" => {
                        let missed = frame.payload["missed_bytes_estimate"].as_u64().unwrap_or(0);
                        let _ = write!(stdout, "\r\n[weft: {missed} bytes dropped]\r\n");
                        let _ = stdout.flush();
                    }
                    "terminal:blocked" => {
                        let _ = write!(stdout, "\r\n[weft: input blocked]\r\n");
                        let _ = stdout.flush();
                    }
                    "terminal:unblocked" => {
                        let _ = write!(stdout, "\r\n[weft: input unblocked]\r\n");
                        let _ = stdout.flush();
                    }
                    "terminal:closed" => {
                        break frame.payload["exit_status"].as_i64().unwrap_or(0) as i32;
                    }
                    _ => {}
                }
            }
        }
    };

    let _ = ws_tx.send(Message::Close(None)).await;
    Ok(exit_code)
}

fn build_url(args: &WrapArgs, principal: &str) -> String {
    let mut url = format!("{}?principal={principal}&role=owner&client=wrapper", args.url);
    if let Some(ref token) = args.token {
        url.push_str(&format!("&token={token}"));
    }
    url
}

fn request(
    event: &str,
    request_id: &str,
    address: Option<String>,
    payload: serde_json::Value,
) -> Frame {
    Frame {
        event: event.to_owned(),
        address,
        request_id: Some(request_id.to_owned()),
        payload,
    }
}

type WrapTx = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WrapRx = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

async fn send(tx: &mut WrapTx, frame: &Frame) -> anyhow::Result<()> {
    let text = serde_json::to_string(frame)?;
    tx.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Read frames until the response matching `request_id` arrives.
async fn await_response(rx: &mut WrapRx, request_id: &str) -> anyhow::Result<Frame> {
    let deadline = tokio::time::Instant::now() + SETUP_TIMEOUT;
    loop {
        let msg = tokio::time::timeout_at(deadline, rx.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for {request_id}"))?;
        let frame = match msg {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<Frame>(&text)?,
            Some(Ok(_)) => continue,
            Some(Err(e)) => anyhow::bail!("connection error: {e}"),
            None => anyhow::bail!("connection closed during setup"),
        };
        if frame.request_id.as_deref() == Some(request_id) {
            if frame.payload["success"] == serde_json::Value::Bool(false) {
                anyhow::bail!(
                    "{} failed: {}",
                    frame.event,
                    frame.payload["error"]["message"].as_str().unwrap_or("unknown error")
                );
            }
            return Ok(frame);
        }
    }
}

/// Keeps the local terminal in raw mode for the life of the session.
///
/// `std::io::Stdin` implements `AsFd`, so the termios calls need no raw-fd
/// juggling; the saved attributes come back on drop, including the unwind
/// paths out of the proxy loop.
struct LocalTty {
    saved: termios::Termios,
}

impl LocalTty {
    fn raw() -> anyhow::Result<Self> {
        let saved =
            termios::tcgetattr(std::io::stdin()).context("stdin is not a terminal")?;
        let mut attrs = saved.clone();
        termios::cfmakeraw(&mut attrs);
        termios::tcsetattr(std::io::stdin(), termios::SetArg::TCSADRAIN, &attrs)
            .context("failed to enter raw mode")?;
        Ok(Self { saved })
    }
}

impl Drop for LocalTty {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(std::io::stdin(), termios::SetArg::TCSADRAIN, &self.saved);
    }
}

/// Window size of the controlling terminal, when stdin is one.
fn local_window() -> Option<(u16, u16)> {
    use std::os::fd::AsRawFd;

    let mut size = nix::pty::Winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };
    // SAFETY: TIOCGWINSZ only writes into `size`, a stack value with the
    // layout the kernel expects for this ioctl.
    #[allow(unsafe_code)]
    let rc = unsafe {
        nix::libc::ioctl(std::io::stdin().as_raw_fd(), nix::libc::TIOCGWINSZ, &mut size)
    };
    (rc == 0 && size.ws_col != 0 && size.ws_row != 0).then_some((size.ws_col, size.ws_row))
}
