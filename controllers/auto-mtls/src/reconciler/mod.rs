//! Reconciliation logic for auto-mtls.
//!
//! This module is organized by the resource each step owns:
//! - `ca_infra`: cluster-wide self-signed root, CA certificate and CA issuer
//! - `trust`: per-namespace copy of the CA public certificate
//! - `leaf_cert`: per-service leaf certificate
//! - `service`: orchestration for annotated Services, including cleanup
//! - `workload`: CA trust mounting for annotated Deployments
//!
//! Every step reads current state from the store and creates or patches only
//! what is missing, so any step can be re-run at any time.

pub mod ca_infra;
pub mod leaf_cert;
pub mod service;
pub mod trust;
pub mod workload;

#[cfg(test)]
mod trust_test;

pub use service::ServiceOutcome;
pub use workload::WorkloadOutcome;

use crate::config::Config;
use crate::error::ControllerError;
use crate::mounts::{SecretMount, deployment_mount_patch};
use cluster_client::{ClusterClientTrait, ClusterError};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info, warn};

/// Attempts at a resourceVersion-locked write before surfacing the conflict.
pub(crate) const MAX_CONFLICT_ATTEMPTS: usize = 3;

/// Reconciles auto-mtls resources.
pub struct Reconciler {
    pub(crate) client: Box<dyn ClusterClientTrait + Send + Sync>,
    pub(crate) config: Config,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(client: impl ClusterClientTrait + Send + Sync + 'static, config: Config) -> Self {
        Self {
            client: Box::new(client),
            config,
        }
    }

    /// Mount for the namespace trust copy at the canonical CA path.
    pub(crate) fn trust_mount(&self) -> SecretMount {
        SecretMount::new(crds::TRUST_COPY_SECRET_NAME, &self.config.ca_mount_path)
    }

    /// Adds `mounts` to a Deployment's pod template.
    ///
    /// The first attempt patches against `deployment` as given; on a
    /// resourceVersion conflict the Deployment is re-read and the patch
    /// recomputed, so a concurrent writer that already added the mounts turns
    /// this into a no-op. Returns whether a patch was applied.
    pub(crate) async fn patch_workload_mounts(
        &self,
        deployment: &Deployment,
        mounts: &[SecretMount],
    ) -> Result<bool, ControllerError> {
        let namespace = deployment.metadata.namespace.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("Deployment missing namespace".to_string())
        })?;
        let name = deployment.metadata.name.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("Deployment missing name".to_string())
        })?;

        let mut current = deployment.clone();
        for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
            let Some(patch) = deployment_mount_patch(&current, mounts) else {
                debug!("Deployment {}/{} already mounts all secrets", namespace, name);
                return Ok(false);
            };

            match self.client.patch_deployment(namespace, name, &patch).await {
                Ok(_) => {
                    info!("Patched Deployment {}/{} with {} secret mount(s)", namespace, name, mounts.len());
                    return Ok(true);
                }
                Err(ClusterError::Conflict(msg)) if attempt < MAX_CONFLICT_ATTEMPTS => {
                    warn!(
                        "Deployment {}/{} changed during patch (attempt {}): {}; re-reading",
                        namespace, name, attempt, msg
                    );
                    match self.client.get_deployment(namespace, name).await? {
                        Some(fresh) => current = fresh,
                        None => {
                            debug!("Deployment {}/{} disappeared before patch", namespace, name);
                            return Ok(false);
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ClusterError::Conflict(format!("Deployment {namespace}/{name}")).into())
    }
}
