//! ClusterClient trait for mocking
//!
//! Reconcilers only talk to the cluster through this trait. The concrete
//! [`KubeClusterClient`](crate::KubeClusterClient) implements it over `kube::Api`,
//! and tests use the in-memory mock.

use crate::error::ClusterError;
use crds::{Certificate, ClusterIssuer};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};

/// Trait for cluster store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // cert-manager
    async fn get_certificate(&self, namespace: &str, name: &str) -> Result<Option<Certificate>, ClusterError>;
    async fn create_certificate(&self, certificate: &Certificate) -> Result<Certificate, ClusterError>;
    async fn delete_certificate(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;
    async fn get_cluster_issuer(&self, name: &str) -> Result<Option<ClusterIssuer>, ClusterError>;
    async fn create_cluster_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer, ClusterError>;

    // Secrets
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError>;
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    // Services
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError>;
    async fn patch_service(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Service, ClusterError>;

    // Deployments
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError>;
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError>;
    /// Strategic merge patch: `volumes`, `containers` and `volumeMounts` entries
    /// are merged by key, so a patch only needs to carry what it adds.
    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Deployment, ClusterError>;
}
