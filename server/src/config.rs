//! # Configuration
//!
//! Loads the gateway's runtime settings from the environment, with
//! defaults for everything so the server boots with no configuration at
//! all — the same posture as `original_source/settings/settings.py`,
//! rendered as a typed struct instead of module-level globals.

use std::env;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Gateway configuration, loaded once at startup and shared read-only
/// across every handler and background task.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment tag (`LOCAL`, `SANDBOX`, `PROD`, ...), informational.
    pub environment: String,
    pub app_name: String,
    pub version: String,

    /// Port the control API and ingress proxy listen on.
    pub api_port: u16,
    /// Host to bind the listener to.
    pub bind_host: String,

    /// Shared secret tunnel owners present when minting/managing tunnels.
    pub owner_api_key: String,
    /// A second shared secret with the same privileges, for rotation.
    pub admin_api_key: String,

    /// Bound on the ingress proxy's wait for a response.
    pub request_timeout: Duration,
    /// Soft cap on concurrently live tunnels (informational; enforced as
    /// a `CapacityExhausted` condition by the registry under sustained
    /// id-collision retries, see `registry::TunnelRegistry::create`).
    pub max_tunnels: usize,
    /// Heartbeat ping interval on the duplex channel.
    pub heartbeat_interval: Duration,
    /// Expiry sweep period.
    pub sweeper_interval: Duration,
    /// Idle threshold past which the sweeper deletes a tunnel.
    pub idle_threshold: Duration,

    pub log_level: String,
    /// Carried through for parity with the system this was distilled
    /// from; `tracing`'s own formatter logs in UTC regardless.
    pub log_timezone: String,

    /// Scheme/host used to compose the public tunnel URL.
    pub public_scheme: String,
    pub public_host: String,
}

impl Config {
    pub fn from_env() -> Self {
        let api_port = env_or("API_PORT", 8989u16);
        let request_timeout_secs = env_or("TUNNEL_TIMEOUT_SECONDS", 30u64);
        let sweeper_interval_secs = env_or("TUNNEL_CLEANUP_INTERVAL", 60u64);
        // Reference behavior: idle threshold defaults to 2x the request
        // timeout unless explicitly overridden.
        let idle_threshold_secs =
            env::var("TUNNEL_IDLE_THRESHOLD_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(request_timeout_secs * 2);

        let environment = env_string_or("ENVIRONMENT_TYPE", "LOCAL");
        let public_host = env::var("PUBLIC_HOST")
            .unwrap_or_else(|_| format!("localhost:{api_port}"));
        let public_scheme = if environment == "PROD" { "https" } else { "http" }.to_string();
        let bind_host = if environment == "PROD" {
            "0.0.0.0".to_string()
        } else {
            env_string_or("SERVER_HOST", "0.0.0.0")
        };

        Self {
            app_name: env_string_or("APP_NAME", "TUNNEL_GATEWAY"),
            version: env_string_or("VERSION", "v1.0.0"),
            api_port,
            bind_host,
            owner_api_key: env_string_or("REQUIRED_MATCHING_KEY", ""),
            admin_api_key: env_string_or("REQUIRED_MATCHING_ADMIN_KEY", ""),
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_tunnels: env_or("TUNNEL_MAX_CONNECTIONS", 100usize),
            heartbeat_interval: Duration::from_secs(env_or("TUNNEL_HEARTBEAT_INTERVAL", 10u64)),
            sweeper_interval: Duration::from_secs(sweeper_interval_secs),
            idle_threshold: Duration::from_secs(idle_threshold_secs),
            log_level: env_string_or("LOG_LEVEL", "INFO"),
            log_timezone: env_string_or("LOG_TIMEZONE", "US/Pacific"),
            public_scheme,
            public_host,
            environment,
        }
    }

    /// Valid shared secrets for the control API's `x-api-key` header.
    pub fn api_keys(&self) -> [&str; 2] {
        [&self.owner_api_key, &self.admin_api_key]
    }

    pub fn public_url(&self, tunnel_id: &str) -> String {
        format!("{}://{}/{}", self.public_scheme, self.public_host, tunnel_id)
    }
}
