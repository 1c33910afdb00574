//! Per-service leaf certificate issuance.

use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::ca_infra::Ensured;
use cluster_client::ClusterError;
use crds::{
    CA_ISSUER_NAME, Certificate, CertificateSpec, GENERATED_FOR_ANNOTATION, IssuerRef, MANAGED_LABEL,
    SecretTemplate, generated_for, leaf_certificate_name, leaf_secret_name, service_dns_names,
    service_fqdn,
};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Hours rendered the way cert-manager prints durations (`8760h0m0s`).
pub fn go_duration_hours(hours: u64) -> String {
    format!("{hours}h0m0s")
}

/// The leaf `Certificate` for `service` in `namespace`.
///
/// Names and DNS identities depend only on the service name, namespace and
/// cluster domain.
pub fn leaf_certificate(namespace: &str, service: &str, config: &Config) -> Certificate {
    let provenance = BTreeMap::from([(
        GENERATED_FOR_ANNOTATION.to_string(),
        generated_for(namespace, service),
    )]);
    let managed = BTreeMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]);

    Certificate {
        metadata: ObjectMeta {
            name: Some(leaf_certificate_name(service)),
            namespace: Some(namespace.to_string()),
            annotations: Some(provenance.clone()),
            labels: Some(managed.clone()),
            ..Default::default()
        },
        spec: CertificateSpec {
            secret_name: leaf_secret_name(service),
            common_name: Some(service_fqdn(service, namespace, &config.cluster_domain)),
            dns_names: service_dns_names(service, namespace, &config.cluster_domain),
            duration: Some(go_duration_hours(config.leaf_duration_hours)),
            renew_before: Some(go_duration_hours(config.leaf_renew_before_hours)),
            is_ca: None,
            issuer_ref: IssuerRef::cluster_issuer(CA_ISSUER_NAME),
            secret_template: Some(SecretTemplate {
                annotations: provenance,
                labels: managed,
            }),
        },
    }
}

impl Reconciler {
    /// Ensures `<service>-cert` exists in `namespace`.
    ///
    /// Any create failure other than a lost race is reported as
    /// [`ControllerError::IssuanceFailed`].
    #[instrument(skip(self))]
    pub async fn ensure_leaf_certificate(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Ensured, ControllerError> {
        let name = leaf_certificate_name(service);
        if self.client.get_certificate(namespace, &name).await?.is_some() {
            debug!("Certificate {}/{} already exists", namespace, name);
            return Ok(Ensured::AlreadyPresent);
        }

        let certificate = leaf_certificate(namespace, service, &self.config);
        match self.client.create_certificate(&certificate).await {
            Ok(_) => {
                info!(
                    "Requested Certificate {}/{} (secret {})",
                    namespace, name, certificate.spec.secret_name
                );
                Ok(Ensured::Created)
            }
            Err(ClusterError::AlreadyExists(_)) => {
                warn!("Certificate {}/{} was created concurrently", namespace, name);
                Ok(Ensured::AlreadyPresent)
            }
            Err(source) => Err(ControllerError::IssuanceFailed {
                certificate: format!("{namespace}/{name}"),
                source,
            }),
        }
    }
}
