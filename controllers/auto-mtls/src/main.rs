//! auto-mtls Controller
//!
//! Automates mutual-TLS bootstrapping on top of cert-manager:
//! - keeps a cluster CA (self-signed root, CA certificate, CA issuer) in place
//! - issues a leaf certificate for every Service annotated
//!   `auto-mtls.kupher.io/enabled=true`
//! - copies the CA public certificate into each consuming namespace
//! - mounts the leaf secret and the CA copy into the backing Deployment
//! - removes the leaf certificate and secret when the Service goes away

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod mounts;
mod reconciler;
mod selector;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use anyhow::Context as _;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube uses rustls; pick the ring provider before any client is built.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting auto-mtls Controller");

    let config = Config::from_env().context("loading configuration from environment")?;

    info!("Configuration:");
    info!("  CA namespace: {}", config.ca_namespace);
    info!("  Cluster domain: {}", config.cluster_domain);
    info!("  CA reconcile interval: {:?}", config.ca_reconcile_interval);
    info!(
        "  Leaf certificate: {}h validity, renew {}h before expiry",
        config.leaf_duration_hours, config.leaf_renew_before_hours
    );
    info!("  Mounts: leaf at {}, CA at {}", config.tls_mount_path, config.ca_mount_path);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config)
        .await
        .context("initializing controller")?;
    controller.run().await.context("controller terminated")?;

    Ok(())
}
