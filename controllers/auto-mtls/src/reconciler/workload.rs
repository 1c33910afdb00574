//! CA trust for Deployments annotated `auto-mtls.kupher.io/ca-public-cert=true`,
//! independent of any Service.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{CA_PUBLIC_CERT_ANNOTATION, annotation_is_true};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, instrument};

/// What a Deployment reconcile achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadOutcome {
    Ignored,
    Mounted { patched: bool },
}

impl Reconciler {
    #[instrument(
        skip(self, deployment),
        fields(namespace = ?deployment.metadata.namespace, name = ?deployment.metadata.name)
    )]
    pub async fn reconcile_ca_public_cert_deployment(
        &self,
        deployment: &Deployment,
    ) -> Result<WorkloadOutcome, ControllerError> {
        if deployment.metadata.deletion_timestamp.is_some()
            || !annotation_is_true(deployment.metadata.annotations.as_ref(), CA_PUBLIC_CERT_ANNOTATION)
        {
            return Ok(WorkloadOutcome::Ignored);
        }
        let namespace = deployment.metadata.namespace.as_deref().ok_or_else(|| {
            ControllerError::InvalidConfig("Deployment missing namespace".to_string())
        })?;

        self.ensure_trust_copy(namespace).await?;
        let patched = self.patch_workload_mounts(deployment, &[self.trust_mount()]).await?;
        if !patched {
            debug!("Deployment already mounts the CA trust copy");
        }
        Ok(WorkloadOutcome::Mounted { patched })
    }
}
