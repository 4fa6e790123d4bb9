// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use weft::config::Config;

#[derive(Parser)]
#[command(name = "weft", version, about = "Real-time terminal session fabric.")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Wrap the local terminal around a remote weft session.
    Wrap(weft::wrap::WrapArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.subcommand {
        Some(Commands::Wrap(args)) => {
            std::process::exit(weft::wrap::run(args).await);
        }
        None => {
            let config = cli.config;
            if let Err(e) = config.validate() {
                eprintln!("error: {e}");
                std::process::exit(2);
            }
            if let Err(e) = weft::run::run(config).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
    }
}
