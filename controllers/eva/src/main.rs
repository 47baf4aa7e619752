//! Eva Controller
//!
//! Runs each Eva workload to completion as exactly one owned batch Job and
//! publishes a normalized phase and `Available` condition on the Eva status.

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod server;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Eva Controller");

    // Load configuration from environment variables
    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Finalizer: {}", config.reconciler.finalizer);
    info!("  Owner index: {}", config.reconciler.owner_index_key);
    info!("  Image pull observation: {:?}", config.reconciler.image_pull_policy);
    info!("  Concurrency: {}, debounce: {:?}", config.concurrency, config.debounce);
    info!("  Metrics: {}", config.metrics_addr);

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
