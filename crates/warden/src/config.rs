// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

/// Central authority for weft session hosts.
#[derive(Debug, Clone, Parser)]
#[command(name = "weftwarden", version, about)]
pub struct Config {
    /// Address to bind to.
    #[arg(long, env = "WEFTWARDEN_BIND_HOST", default_value = "127.0.0.1")]
    pub bind_host: String,

    /// Port for the admin API and host links (0 picks an ephemeral port).
    #[arg(long, env = "WEFTWARDEN_BIND_PORT", default_value = "8718")]
    pub bind_port: u16,

    /// Bearer token required on the admin API and host links.
    #[arg(long, env = "WEFTWARDEN_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "WEFTWARDEN_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WEFTWARDEN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
