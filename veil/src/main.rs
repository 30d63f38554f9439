//! # Veil Entry Point
//!
//! The executable for the veil proxy. It drives the application lifecycle:
//!
//! 1. **Initialization**: installs the tracing subscriber and parses the CLI.
//! 2. **Validation**: turns the CLI into a checked [`config::ProxyConfig`].
//! 3. **Serving**: hands off to [`proxy::serve`], which builds the descriptor
//!    state and runs the accept loop until interrupted.

mod cli;
mod config;
mod proxy;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("veil=info,veil_core=info")),
        )
        .init();

    let args = cli::Cli::parse();
    let config = config::ProxyConfig::from_cli(args)?;
    proxy::serve(config).await
}
