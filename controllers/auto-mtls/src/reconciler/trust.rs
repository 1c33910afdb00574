//! Namespace trust distribution.
//!
//! Copies only `ca.crt` from the CA secret in the signing namespace into a
//! namespace-local secret. The copy is made once; an existing copy is never
//! compared with or refreshed from the source.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::ca_infra::{Ensured, tolerate_already_exists};
use cluster_client::ClusterError;
use crds::{CA_CERT_KEY, CA_SECRET_NAME, MANAGED_LABEL, TRUST_COPY_SECRET_NAME};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Builds the trust copy for `namespace` from the CA public certificate bytes.
pub fn trust_copy_secret(namespace: &str, ca_cert: ByteString) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(TRUST_COPY_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(CA_CERT_KEY.to_string(), ca_cert)])),
        ..Default::default()
    }
}

impl Reconciler {
    /// Ensures `auto-mtls-ca-cert` exists in `namespace`.
    ///
    /// Fails with [`ControllerError::MissingField`] and creates nothing when the
    /// CA secret exists but has no `ca.crt` yet.
    #[instrument(skip(self))]
    pub async fn ensure_trust_copy(&self, namespace: &str) -> Result<Ensured, ControllerError> {
        if self.client.get_secret(namespace, TRUST_COPY_SECRET_NAME).await?.is_some() {
            debug!("Trust copy already present in {}", namespace);
            return Ok(Ensured::AlreadyPresent);
        }

        let ca_namespace = &self.config.ca_namespace;
        let source = self
            .client
            .get_secret(ca_namespace, CA_SECRET_NAME)
            .await?
            .ok_or_else(|| {
                ClusterError::NotFound(format!(
                    "CA secret {ca_namespace}/{CA_SECRET_NAME} not issued yet"
                ))
            })?;

        let ca_cert = source
            .data
            .and_then(|mut data| data.remove(CA_CERT_KEY))
            .filter(|bytes| !bytes.0.is_empty())
            .ok_or_else(|| {
                warn!("CA secret {}/{} has no {}", ca_namespace, CA_SECRET_NAME, CA_CERT_KEY);
                ControllerError::MissingField(format!(
                    "{CA_CERT_KEY} in secret {ca_namespace}/{CA_SECRET_NAME}"
                ))
            })?;

        let result = self
            .client
            .create_secret(&trust_copy_secret(namespace, ca_cert))
            .await;
        Ok(tolerate_already_exists(
            result,
            &format!("Secret {namespace}/{TRUST_COPY_SECRET_NAME}"),
        )?)
    }
}
