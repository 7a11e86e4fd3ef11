//! Binary entry point: loads configuration from the environment, builds
//! the router, spawns the expiry sweeper, and serves until shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use tunnel_gateway_server::config::Config;
use tunnel_gateway_server::state::AppState;
use tunnel_gateway_server::{build_router, sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_gateway_server=info".into()),
        )
        .init();

    let config = Config::from_env();
    let bind_host = config.bind_host.clone();
    let api_port = config.api_port;
    let sweeper_interval = config.sweeper_interval;
    let idle_threshold = config.idle_threshold;

    let state = AppState::new(config);
    let app = build_router(state.clone());

    let cancel = CancellationToken::new();
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(sweeper::run(
        state.registry.clone(),
        sweeper_interval,
        idle_threshold,
        sweeper_cancel,
    ));

    let addr = SocketAddr::from((
        bind_host.parse::<std::net::IpAddr>().unwrap_or([0, 0, 0, 0].into()),
        api_port,
    ));
    info!(%addr, "tunnel gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
