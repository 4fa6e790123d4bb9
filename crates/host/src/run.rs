// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level wiring: every component is constructed explicitly and handed
//! its collaborators, then the servers and background tasks are spawned.
//! Shared by `main` and the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::agent::AgentBridge;
use crate::config::Config;
use crate::fabric::router::Correlations;
use crate::fabric::shapes::ShapeStore;
use crate::fabric::{Fabric, FabricSettings};
use crate::gateway::{self, Gateway, GatewaySettings};
use crate::supervisory::link::{self, LinkSettings};
use crate::supervisory::DirectiveSet;
use crate::terminal::{HostSettings, TerminalHost};

/// Gateway heartbeat cadence; two missed pongs terminate a connection.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// A fully wired host with its servers running.
pub struct RunningHost {
    pub gateway: Arc<Gateway>,
    pub fabric: Arc<Fabric>,
    pub bridge: Arc<AgentBridge>,
    pub local_addr: SocketAddr,
    pub shutdown: CancellationToken,
}

/// Initialize tracing from config.
///
/// Uses `try_init` so repeated calls (tests) are harmless.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / WEFT_LOG_LEVEL > RUST_LOG > "info".
    let filter = if std::env::var("WEFT_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Construct everything and start serving. The caller decides when to wait
/// on shutdown (see [`run`]).
pub async fn prepare(config: Config) -> anyhow::Result<RunningHost> {
    init_tracing(&config);
    let shutdown = CancellationToken::new();

    // Terminal ownership.
    let host = TerminalHost::new(HostSettings {
        max_terminals: config.max_terminals_per_host,
        ring_bytes: config.output_ring_bytes,
        grace: config.terminal_grace(),
    });
    host.spawn_retention_reaper(shutdown.clone());

    // Session graph + routing.
    let directives = Arc::new(DirectiveSet::new());
    let correlations = Arc::new(Correlations::new(config.request_timeout()));
    correlations.spawn_sweeper(shutdown.clone());

    let fabric = Fabric::new(
        Arc::clone(&host),
        Arc::clone(&directives),
        Arc::clone(&correlations),
        ShapeStore::new(config.shapes_dir.clone()),
        FabricSettings {
            default_shell: config.shell.clone(),
            default_cols: config.default_cols,
            default_rows: config.default_rows,
        },
    );
    fabric.spawn_notice_task(shutdown.clone());

    // Supervisory link (only when an authority is configured).
    if let Some(ref url) = config.supervisor_url {
        let (unblock_tx, unblock_rx) = mpsc::unbounded_channel();
        host.set_unblock_reporter(unblock_tx);
        let settings = LinkSettings {
            url: url.clone(),
            host_id: config.effective_host_id(),
            backoff_max: config.reconnect_backoff_max(),
            fail_open_after: config.fail_open_timeout(),
        };
        let link_fabric = Arc::clone(&fabric);
        let link_directives = Arc::clone(&directives);
        let link_cancel = shutdown.clone();
        tokio::spawn(async move {
            link::run_link(settings, link_fabric, link_directives, unblock_rx, link_cancel).await;
        });
    }

    // Edge gateway.
    let gateway = Gateway::new(
        Arc::clone(&fabric),
        GatewaySettings {
            auth_token: config.auth_token.clone(),
            high_water_bytes: config.subscription_high_water_bytes,
            low_water_bytes: config.subscription_low_water_bytes,
            heartbeat: HEARTBEAT,
        },
        shutdown.clone(),
    );
    let router = gateway::build_router(Arc::clone(&gateway));

    let listener = TcpListener::bind((config.bind_host.as_str(), config.bind_port)).await?;
    let local_addr = listener.local_addr()?;

    match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let acceptor = gateway::tls_acceptor(cert, key)?;
            let sd = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway::serve_tls(listener, acceptor, router, sd).await {
                    error!("TLS server error: {e:#}");
                }
            });
        }
        _ => {
            if config.require_tls {
                anyhow::bail!("--require-tls is set but no TLS material is configured");
            }
            let sd = shutdown.clone();
            tokio::spawn(async move {
                let _ = gateway::serve_plain(listener, router, sd).await;
            });
        }
    }

    let bridge = AgentBridge::new(Arc::clone(&fabric));

    Ok(RunningHost { gateway, fabric, bridge, local_addr, shutdown })
}

/// Run the host until a shutdown signal arrives, then close every terminal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let running = prepare(config).await?;
    spawn_signal_handler(running.shutdown.clone());
    info!(addr = %running.local_addr, "weft host ready");

    running.shutdown.cancelled().await;
    running.fabric.host().close_all("host shutdown");
    // Give SIGHUPs a moment to land before the process exits.
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("weft host stopped");
    Ok(())
}

/// First signal cancels gracefully; a second forces exit.
pub fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
