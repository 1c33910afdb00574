//! `kube::Api` backed implementation of [`ClusterClientTrait`].

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crds::{Certificate, ClusterIssuer};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use std::fmt;
use tracing::debug;

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "auto-mtls-controller";

/// Cluster store client talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

fn namespace_of<K: Resource>(obj: &K, kind: &str) -> Result<String, ClusterError> {
    obj.meta().namespace.clone().ok_or_else(|| {
        ClusterError::InvalidRequest(format!(
            "{} {} has no namespace",
            kind,
            obj.meta().name.as_deref().unwrap_or("<unnamed>")
        ))
    })
}

/// Delete and report whether the object existed.
async fn delete_tolerant<K>(api: &Api<K>, name: &str) -> Result<bool, ClusterError>
where
    K: Resource + Clone + serde::de::DeserializeOwned + fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(e) => match ClusterError::from(e) {
            ClusterError::NotFound(_) => Ok(false),
            other => Err(other),
        },
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn get_certificate(&self, namespace: &str, name: &str) -> Result<Option<Certificate>, ClusterError> {
        let api: Api<Certificate> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_certificate(&self, certificate: &Certificate) -> Result<Certificate, ClusterError> {
        let namespace = namespace_of(certificate, "Certificate")?;
        let api: Api<Certificate> = Api::namespaced(self.client.clone(), &namespace);
        debug!("Creating Certificate {}/{:?}", namespace, certificate.metadata.name);
        Ok(api.create(&Self::post_params(), certificate).await?)
    }

    async fn delete_certificate(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Certificate> = Api::namespaced(self.client.clone(), namespace);
        delete_tolerant(&api, name).await
    }

    async fn get_cluster_issuer(&self, name: &str) -> Result<Option<ClusterIssuer>, ClusterError> {
        let api: Api<ClusterIssuer> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_cluster_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer, ClusterError> {
        let api: Api<ClusterIssuer> = Api::all(self.client.clone());
        debug!("Creating ClusterIssuer {:?}", issuer.metadata.name);
        Ok(api.create(&Self::post_params(), issuer).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let namespace = namespace_of(secret, "Secret")?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        debug!("Creating Secret {}/{:?}", namespace, secret.metadata.name);
        Ok(api.create(&Self::post_params(), secret).await?)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        delete_tolerant(&api, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_service(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Service, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.patch(name, &Self::patch_params(), &Patch::Merge(patch)).await?)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Deployment, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.patch(name, &Self::patch_params(), &Patch::Strategic(patch)).await?)
    }
}
