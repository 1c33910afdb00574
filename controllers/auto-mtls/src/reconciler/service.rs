//! Service reconciliation.
//!
//! For an annotated Service: request the leaf certificate, distribute the
//! namespace trust copy, find the backing Deployment and mount both secrets.
//! For a Service being deleted (or no longer annotated): delete the leaf
//! certificate and its secret, then release the cleanup finalizer.
//!
//! Progress is never stored; each run infers it from the cluster.

use crate::error::ControllerError;
use crate::mounts::SecretMount;
use crate::reconciler::{MAX_CONFLICT_ATTEMPTS, Reconciler};
use crate::selector::find_backing_workload;
use cluster_client::ClusterError;
use crds::{
    CLEANUP_FINALIZER, ENABLED_ANNOTATION, MtlsRole, annotation_is_true, leaf_certificate_name,
    leaf_secret_name,
};
use k8s_openapi::api::core::v1::Service;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// What a Service reconcile achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Not opted in and nothing left to clean up
    Ignored,
    /// Certificate requested and mounts in place; the leaf secret exists
    Ready { patched: bool },
    /// Mounts in place, cert-manager has not written the leaf secret yet
    SecretPending { patched: bool },
    /// Role `Both`: the server identity is in place, the client identity is
    /// not implemented and was skipped
    ServerOnly { patched: bool, secret_ready: bool },
    /// No Deployment matches the Service selector yet
    NoWorkload,
    /// Leaf certificate and secret removed
    CleanedUp,
}

impl ServiceOutcome {
    /// Whether the Service can wait for its next change event.
    pub fn is_settled(self) -> bool {
        !matches!(
            self,
            Self::SecretPending { .. } | Self::ServerOnly { secret_ready: false, .. }
        )
    }

    fn without_client_identity(self) -> Self {
        match self {
            Self::Ready { patched } => Self::ServerOnly { patched, secret_ready: true },
            Self::SecretPending { patched } => Self::ServerOnly { patched, secret_ready: false },
            other => other,
        }
    }
}

fn has_finalizer(service: &Service) -> bool {
    service
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == CLEANUP_FINALIZER))
}

impl Reconciler {
    /// Reconciles one Service.
    #[instrument(
        skip(self, service),
        fields(namespace = ?service.metadata.namespace, name = ?service.metadata.name)
    )]
    pub async fn reconcile_service(&self, service: &Service) -> Result<ServiceOutcome, ControllerError> {
        let namespace = service.metadata.namespace.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("Service missing namespace".to_string())
        })?;
        let name = service.metadata.name.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("Service missing name".to_string())
        })?;

        if service.metadata.deletion_timestamp.is_some() {
            if !has_finalizer(service) {
                return Ok(ServiceOutcome::Ignored);
            }
            info!("Service {}/{} is being deleted, removing its certificate", namespace, name);
            self.cleanup_service(namespace, name).await?;
            self.remove_finalizer(service).await?;
            return Ok(ServiceOutcome::CleanedUp);
        }

        if !annotation_is_true(service.metadata.annotations.as_ref(), ENABLED_ANNOTATION) {
            if !has_finalizer(service) {
                debug!("Service {}/{} is not opted in", namespace, name);
                return Ok(ServiceOutcome::Ignored);
            }
            info!("Service {}/{} opted out, removing its certificate", namespace, name);
            self.cleanup_service(namespace, name).await?;
            self.remove_finalizer(service).await?;
            return Ok(ServiceOutcome::CleanedUp);
        }

        let role = MtlsRole::from_annotations(service.metadata.annotations.as_ref())
            .map_err(|e| ControllerError::InvalidConfig(format!("Service {namespace}/{name}: {e}")))?;

        if role == MtlsRole::Client {
            return Err(ControllerError::Unimplemented(format!(
                "client-only identity for Service {namespace}/{name}"
            )));
        }

        self.add_finalizer(service).await?;
        let outcome = self
            .reconcile_server_identity(namespace, name, service.spec.as_ref().and_then(|s| s.selector.as_ref()))
            .await?;

        if role == MtlsRole::Both {
            warn!(
                "Service {}/{} has role Both; client identity is not implemented, provisioned the server identity only",
                namespace, name
            );
            return Ok(outcome.without_client_identity());
        }
        Ok(outcome)
    }

    /// Server arm: leaf certificate, trust copy, then mounts on the backing workload.
    pub async fn reconcile_server_identity(
        &self,
        namespace: &str,
        name: &str,
        selector: Option<&BTreeMap<String, String>>,
    ) -> Result<ServiceOutcome, ControllerError> {
        self.ensure_leaf_certificate(namespace, name).await?;
        self.ensure_trust_copy(namespace).await?;

        let deployments = self.client.list_deployments(namespace).await?;
        let Some(deployment) = find_backing_workload(selector, &deployments) else {
            info!("No Deployment backs Service {}/{} yet", namespace, name);
            return Ok(ServiceOutcome::NoWorkload);
        };

        let secret_name = leaf_secret_name(name);
        let mounts = [
            SecretMount::new(&secret_name, &self.config.tls_mount_path),
            self.trust_mount(),
        ];
        let patched = self.patch_workload_mounts(deployment, &mounts).await?;

        if self.client.get_secret(namespace, &secret_name).await?.is_none() {
            debug!("Secret {}/{} not issued yet", namespace, secret_name);
            return Ok(ServiceOutcome::SecretPending { patched });
        }
        Ok(ServiceOutcome::Ready { patched })
    }

    /// Deletes the leaf certificate, then its secret. Either may already be gone.
    ///
    /// The namespace trust copy and the workload's volumes are left in place.
    #[instrument(skip(self))]
    pub async fn cleanup_service(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let certificate = leaf_certificate_name(name);
        if self.client.delete_certificate(namespace, &certificate).await? {
            info!("Deleted Certificate {}/{}", namespace, certificate);
        } else {
            debug!("Certificate {}/{} already absent", namespace, certificate);
        }

        let secret = leaf_secret_name(name);
        if self.client.delete_secret(namespace, &secret).await? {
            info!("Deleted Secret {}/{}", namespace, secret);
        } else {
            debug!("Secret {}/{} already absent", namespace, secret);
        }
        Ok(())
    }

    pub(crate) async fn add_finalizer(&self, service: &Service) -> Result<(), ControllerError> {
        self.update_finalizers(service, |finalizers| {
            if finalizers.iter().any(|f| f == CLEANUP_FINALIZER) {
                return false;
            }
            finalizers.push(CLEANUP_FINALIZER.to_string());
            true
        })
        .await
    }

    pub(crate) async fn remove_finalizer(&self, service: &Service) -> Result<(), ControllerError> {
        self.update_finalizers(service, |finalizers| {
            let before = finalizers.len();
            finalizers.retain(|f| f != CLEANUP_FINALIZER);
            finalizers.len() != before
        })
        .await
    }

    /// Applies `edit` to the Service's finalizer list with a resourceVersion
    /// locked merge patch, re-reading the Service on conflict.
    async fn update_finalizers<F>(&self, service: &Service, edit: F) -> Result<(), ControllerError>
    where
        F: Fn(&mut Vec<String>) -> bool,
    {
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let name = service.metadata.name.as_deref().unwrap_or_default();

        let mut current = service.clone();
        for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
            let mut finalizers = current.metadata.finalizers.clone().unwrap_or_default();
            if !edit(&mut finalizers) {
                return Ok(());
            }

            let patch = json!({
                "metadata": {
                    "resourceVersion": current.metadata.resource_version,
                    "finalizers": finalizers,
                }
            });
            match self.client.patch_service(namespace, name, &patch).await {
                Ok(_) => {
                    debug!("Updated finalizers on Service {}/{}", namespace, name);
                    return Ok(());
                }
                Err(ClusterError::NotFound(_)) => return Ok(()),
                Err(ClusterError::Conflict(msg)) if attempt < MAX_CONFLICT_ATTEMPTS => {
                    warn!("Service {}/{} changed during finalizer update: {}", namespace, name, msg);
                    match self.client.get_service(namespace, name).await? {
                        Some(fresh) => current = fresh,
                        None => return Ok(()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ClusterError::Conflict(format!("Service {namespace}/{name}")).into())
    }
}
