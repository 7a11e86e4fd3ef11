//! Command-line flags, mirroring the flag surface of the reference
//! client this was distilled from (`--server`, `--api-key`, `--port`,
//! `--host`, `--name`, `--https`).

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "tunnel-client", about = "Connect a local service to a tunnel gateway")]
pub struct Cli {
    /// Gateway address, e.g. `tunnel.example.com` or `localhost:8989`.
    #[arg(long)]
    pub server: String,

    /// API key presented to the control API when creating the tunnel.
    #[arg(long = "api-key")]
    pub api_key: String,

    /// Local port the tunneled requests are re-issued against.
    #[arg(long)]
    pub port: u16,

    /// Local host the tunneled requests are re-issued against.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Friendly label attached to the tunnel.
    #[arg(long)]
    pub name: Option<String>,

    /// Use HTTPS/WSS to reach the gateway instead of HTTP/WS.
    #[arg(long)]
    pub https: bool,
}
