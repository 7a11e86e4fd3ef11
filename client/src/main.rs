//! # Tunnel Client
//!
//! Connects a local service to a tunnel gateway: creates a tunnel via the
//! control API, opens the duplex channel, and serves requests forwarded
//! from the public internet against `http://<host>:<port>`.

mod cli;
mod client;

use clap::Parser;

use crate::cli::Cli;
use crate::client::TunnelClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    TunnelClient::new(cli).run().await
}
