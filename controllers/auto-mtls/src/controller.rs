//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the cluster client,
//! reconciler, watchers, CA timer and metrics endpoint together.

use crate::backoff::RetryTracker;
use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::{Context, Watcher, run_ca_pass};
use cluster_client::KubeClusterClient;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for auto-mtls.
#[derive(Debug)]
pub struct Controller {
    service_watcher: JoinHandle<Result<(), ControllerError>>,
    deployment_watcher: JoinHandle<Result<(), ControllerError>>,
    ca_timer: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

fn flatten(name: &str, joined: Result<Result<(), ControllerError>, tokio::task::JoinError>) -> Result<(), ControllerError> {
    joined
        .map_err(|e| ControllerError::Watch(format!("{name} panicked: {e}")))?
        .map_err(|e| ControllerError::Watch(format!("{name} error: {e}")))
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing auto-mtls controller");

        let kube_client = Client::try_default().await?;
        let cluster_client = KubeClusterClient::new(kube_client.clone());

        let metrics = Arc::new(Metrics::new()?);
        let namespace = config.watch_namespace.clone();
        let concurrency = config.concurrency;
        let ca_period = config.ca_reconcile_interval;
        let metrics_addr = config.metrics_addr;

        let reconciler = Arc::new(Reconciler::new(cluster_client, config));
        let ctx = Arc::new(Context {
            reconciler,
            retries: RetryTracker::default(),
            metrics: Arc::clone(&metrics),
        });

        // Startup pass so leaf certificates have an issuer as early as possible.
        info!("Performing startup CA infrastructure reconciliation...");
        if run_ca_pass(&ctx).await {
            info!("Startup CA infrastructure reconciliation completed");
        } else {
            warn!("Startup CA infrastructure reconciliation failed (will continue)");
        }

        let watcher_instance = Watcher::new(ctx, kube_client, namespace, concurrency);

        let metrics_server = tokio::spawn(metrics::serve(metrics_addr, metrics));

        let service_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_services().await })
        };

        let deployment_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_ca_public_cert_deployments().await })
        };

        let ca_timer = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_ca_infrastructure(ca_period).await })
        };

        Ok(Self {
            service_watcher,
            deployment_watcher,
            ca_timer,
            metrics_server,
        })
    }

    /// Runs the controller until shutdown.
    ///
    /// Returns when any background task exits or on Ctrl-C. The object
    /// watchers also stop on SIGTERM; in-flight reconciles are dropped and
    /// picked up again by the next process.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("auto-mtls controller running");

        let result = tokio::select! {
            r = &mut self.service_watcher => flatten("Service watcher", r),
            r = &mut self.deployment_watcher => flatten("Deployment watcher", r),
            r = &mut self.ca_timer => flatten("CA timer", r),
            r = &mut self.metrics_server => flatten("Metrics server", r),
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                Ok(())
            }
        };

        self.service_watcher.abort();
        self.deployment_watcher.abort();
        self.ca_timer.abort();
        self.metrics_server.abort();

        info!("auto-mtls controller stopped");
        result
    }
}
