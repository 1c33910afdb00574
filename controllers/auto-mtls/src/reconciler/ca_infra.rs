//! Cluster CA infrastructure.
//!
//! Three independent ensure-exists steps, run on a timer and at startup:
//! the self-signed root `ClusterIssuer`, the CA `Certificate` it signs, and
//! the CA-backed `ClusterIssuer` every leaf certificate references.
//! The steps never wait for cert-manager to populate the CA secret.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use cluster_client::ClusterError;
use crds::{
    CA_CERTIFICATE_NAME, CA_COMMON_NAME, CA_ISSUER_NAME, CA_SECRET_NAME, Certificate, CertificateSpec,
    ClusterIssuer, ClusterIssuerSpec, IssuerRef, SELF_SIGNED_ISSUER_NAME,
};
use kube::api::ObjectMeta;
use tracing::{debug, error, info, instrument, warn};

/// Result of one ensure-exists step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyPresent,
}

/// Maps a create result, treating a lost creation race as success.
pub(crate) fn tolerate_already_exists<T>(
    result: Result<T, ClusterError>,
    what: &str,
) -> Result<Ensured, ClusterError> {
    match result {
        Ok(_) => {
            info!("Created {}", what);
            Ok(Ensured::Created)
        }
        Err(ClusterError::AlreadyExists(_)) => {
            warn!("{} was created concurrently, continuing", what);
            Ok(Ensured::AlreadyPresent)
        }
        Err(e) => Err(e),
    }
}

fn self_signed_issuer() -> ClusterIssuer {
    ClusterIssuer {
        metadata: ObjectMeta {
            name: Some(SELF_SIGNED_ISSUER_NAME.to_string()),
            ..Default::default()
        },
        spec: ClusterIssuerSpec::self_signed(),
    }
}

fn ca_issuer() -> ClusterIssuer {
    ClusterIssuer {
        metadata: ObjectMeta {
            name: Some(CA_ISSUER_NAME.to_string()),
            ..Default::default()
        },
        spec: ClusterIssuerSpec::ca(CA_SECRET_NAME),
    }
}

fn ca_certificate(namespace: &str) -> Certificate {
    Certificate {
        metadata: ObjectMeta {
            name: Some(CA_CERTIFICATE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: CertificateSpec {
            secret_name: CA_SECRET_NAME.to_string(),
            common_name: Some(CA_COMMON_NAME.to_string()),
            is_ca: Some(true),
            issuer_ref: IssuerRef::cluster_issuer(SELF_SIGNED_ISSUER_NAME),
            ..Default::default()
        },
    }
}

impl Reconciler {
    /// Ensures the self-signed root issuer exists.
    pub async fn ensure_self_signed_issuer(&self) -> Result<Ensured, ControllerError> {
        if self.client.get_cluster_issuer(SELF_SIGNED_ISSUER_NAME).await?.is_some() {
            debug!("ClusterIssuer {} already exists", SELF_SIGNED_ISSUER_NAME);
            return Ok(Ensured::AlreadyPresent);
        }
        let result = self.client.create_cluster_issuer(&self_signed_issuer()).await;
        Ok(tolerate_already_exists(result, &format!("ClusterIssuer {SELF_SIGNED_ISSUER_NAME}"))?)
    }

    /// Ensures the CA certificate exists in the signing namespace.
    pub async fn ensure_ca_certificate(&self) -> Result<Ensured, ControllerError> {
        let namespace = &self.config.ca_namespace;
        if self.client.get_certificate(namespace, CA_CERTIFICATE_NAME).await?.is_some() {
            debug!("Certificate {}/{} already exists", namespace, CA_CERTIFICATE_NAME);
            return Ok(Ensured::AlreadyPresent);
        }
        let result = self.client.create_certificate(&ca_certificate(namespace)).await;
        Ok(tolerate_already_exists(
            result,
            &format!("Certificate {namespace}/{CA_CERTIFICATE_NAME}"),
        )?)
    }

    /// Ensures the CA-backed cluster issuer exists.
    pub async fn ensure_ca_issuer(&self) -> Result<Ensured, ControllerError> {
        if self.client.get_cluster_issuer(CA_ISSUER_NAME).await?.is_some() {
            debug!("ClusterIssuer {} already exists", CA_ISSUER_NAME);
            return Ok(Ensured::AlreadyPresent);
        }
        let result = self.client.create_cluster_issuer(&ca_issuer()).await;
        Ok(tolerate_already_exists(result, &format!("ClusterIssuer {CA_ISSUER_NAME}"))?)
    }

    /// Runs all three steps. A failing step does not stop the others; the
    /// first error is returned after every step had its chance.
    #[instrument(skip(self), fields(ca_namespace = %self.config.ca_namespace))]
    pub async fn reconcile_ca_infrastructure(&self) -> Result<(), ControllerError> {
        let results = [
            ("self-signed issuer", self.ensure_self_signed_issuer().await),
            ("CA certificate", self.ensure_ca_certificate().await),
            ("CA issuer", self.ensure_ca_issuer().await),
        ];

        let mut first_error = None;
        for (step, result) in results {
            if let Err(e) = result {
                error!("Failed to ensure {}: {}", step, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
