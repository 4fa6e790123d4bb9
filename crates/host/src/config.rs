// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Real-time terminal session fabric host.
#[derive(Debug, Clone, Parser)]
#[command(name = "weft", version, about)]
pub struct Config {
    /// Address to bind the gateway to.
    #[arg(long, env = "WEFT_BIND_HOST", default_value = "127.0.0.1")]
    pub bind_host: String,

    /// Gateway port (0 picks an ephemeral port).
    #[arg(long, env = "WEFT_BIND_PORT", default_value = "8717")]
    pub bind_port: u16,

    /// PEM certificate chain for TLS termination.
    #[arg(long, env = "WEFT_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for TLS termination.
    #[arg(long, env = "WEFT_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Refuse to serve plaintext.
    #[arg(long, env = "WEFT_REQUIRE_TLS")]
    pub require_tls: bool,

    /// Central authority WebSocket URL (e.g. ws://warden:8718/ws/host).
    #[arg(long, env = "WEFT_SUPERVISOR_URL")]
    pub supervisor_url: Option<String>,

    /// Static bearer token required on gateway connections.
    #[arg(long, env = "WEFT_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Stable host identifier reported to the authority.
    #[arg(long, env = "WEFT_HOST_ID")]
    pub host_id: Option<String>,

    /// Default shell command for new terminals.
    #[arg(long, env = "WEFT_SHELL", default_value = "/bin/bash")]
    pub shell: String,

    /// PTY cap for this host.
    #[arg(long, env = "WEFT_MAX_TERMINALS", default_value = "64")]
    pub max_terminals_per_host: usize,

    /// Output ring capacity per terminal, in bytes (minimum 64 KiB).
    #[arg(long, env = "WEFT_OUTPUT_RING_BYTES", default_value = "262144")]
    pub output_ring_bytes: usize,

    /// Outbound queue high-water mark per connection, in bytes.
    #[arg(long, env = "WEFT_SUB_HIGH_WATER_BYTES", default_value = "1048576")]
    pub subscription_high_water_bytes: usize,

    /// Outbound queue low-water mark per connection, in bytes.
    #[arg(long, env = "WEFT_SUB_LOW_WATER_BYTES", default_value = "262144")]
    pub subscription_low_water_bytes: usize,

    /// Deadline for correlated fabric requests.
    #[arg(long, env = "WEFT_REQUEST_TIMEOUT_MS", default_value = "15000")]
    pub request_timeout_ms: u64,

    /// Cap on supervisor reconnect backoff.
    #[arg(long, env = "WEFT_RECONNECT_BACKOFF_MAX_MS", default_value = "60000")]
    pub reconnect_backoff_max_ms: u64,

    /// How long closed-terminal output stays available for reconnect.
    #[arg(long, env = "WEFT_TERMINAL_GRACE_MS", default_value = "30000")]
    pub terminal_grace_ms: u64,

    /// Supervisor outage span after which ctrl_d directives fail open.
    #[arg(long, env = "WEFT_FAIL_OPEN_TIMEOUT_MS", default_value = "120000")]
    pub fail_open_timeout_ms: u64,

    /// Directory for persisted workspace shapes (unset disables resume
    /// across gateway restarts).
    #[arg(long, env = "WEFT_SHAPES_DIR")]
    pub shapes_dir: Option<PathBuf>,

    /// Default terminal columns when a request omits them.
    #[arg(long, env = "WEFT_COLS", default_value = "80")]
    pub default_cols: u16,

    /// Default terminal rows when a request omits them.
    #[arg(long, env = "WEFT_ROWS", default_value = "24")]
    pub default_rows: u16,

    /// Log format (json or text).
    #[arg(long, env = "WEFT_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WEFT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.output_ring_bytes < 64 * 1024 {
            anyhow::bail!("--output-ring-bytes must be at least 65536");
        }
        if self.subscription_low_water_bytes >= self.subscription_high_water_bytes {
            anyhow::bail!("--subscription-low-water-bytes must be below the high-water mark");
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("--request-timeout-ms must be positive");
        }
        match (&self.tls_cert, &self.tls_key) {
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("--tls-cert and --tls-key must be set together");
            }
            (None, None) if self.require_tls => {
                anyhow::bail!("--require-tls needs --tls-cert and --tls-key");
            }
            _ => {}
        }
        if self.default_cols == 0 || self.default_rows == 0 {
            anyhow::bail!("terminal defaults must be positive");
        }
        Ok(())
    }

    /// Host id from config, or a generated one.
    pub fn effective_host_id(&self) -> String {
        self.host_id.clone().unwrap_or_else(|| format!("host-{}", uuid::Uuid::new_v4()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_millis(self.terminal_grace_ms)
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_max_ms)
    }

    pub fn fail_open_timeout(&self) -> Duration {
        Duration::from_millis(self.fail_open_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
