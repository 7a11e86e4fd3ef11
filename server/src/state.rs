//! # Shared Application State
//!
//! Handed to every axum handler via `State`: a small `Clone` wrapper
//! around `Arc`s so handlers never need their own copies of the
//! registry or config.

use std::sync::Arc;

use crate::config::Config;
use crate::registry::TunnelRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TunnelRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(TunnelRegistry::new()),
            config: Arc::new(config),
        }
    }
}
