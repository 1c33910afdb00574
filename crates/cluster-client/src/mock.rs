//! Mock ClusterClient for unit testing
//!
//! In-memory implementation of [`ClusterClientTrait`] with the API server
//! semantics the reconcilers depend on: create conflicts, resourceVersion
//! preconditions on patches, strategic merge of Deployment pod template lists,
//! finalizer-gated deletion of Services, and one-shot fault injection.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crds::{Certificate, ClusterIssuer};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, String);
type ObjectMap<K> = Arc<Mutex<BTreeMap<ObjectKey, K>>>;

/// Operation a [`Fault`] is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    GetCertificate,
    CreateCertificate,
    DeleteCertificate,
    GetClusterIssuer,
    CreateClusterIssuer,
    GetSecret,
    CreateSecret,
    DeleteSecret,
    GetService,
    PatchService,
    GetDeployment,
    ListDeployments,
    PatchDeployment,
}

/// Error returned by the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    AlreadyExists,
    Conflict,
    /// The API server rejects the object (HTTP 422)
    Invalid,
}

impl Fault {
    fn into_error(self, op: MockOp) -> ClusterError {
        let message = format!("injected fault on {op:?}");
        match self {
            Self::NotFound => ClusterError::NotFound(message),
            Self::AlreadyExists => ClusterError::AlreadyExists(message),
            Self::Conflict => ClusterError::Conflict(message),
            Self::Invalid => ClusterError::InvalidRequest(message),
        }
    }
}

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    certificates: ObjectMap<Certificate>,
    cluster_issuers: ObjectMap<ClusterIssuer>,
    secrets: ObjectMap<Secret>,
    services: ObjectMap<Service>,
    deployments: ObjectMap<Deployment>,
    faults: Arc<Mutex<Vec<(MockOp, Fault)>>>,
    next_resource_version: Arc<AtomicU64>,
    writes: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("writes", &self.write_count())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type MergeFn = fn(&mut serde_json::Value, &serde_json::Value);

/// Merge keys the API server uses for the pod template lists a Deployment patch touches.
fn list_merge_key(field: &str) -> Option<&'static str> {
    match field {
        "containers" | "initContainers" | "volumes" => Some("name"),
        "volumeMounts" => Some("mountPath"),
        _ => None,
    }
}

/// Strategic merge restricted to the keyed lists in [`list_merge_key`]:
/// list items are merged by key or appended, everything else follows RFC 7386.
fn strategic_merge(doc: &mut serde_json::Value, patch: &serde_json::Value) {
    use serde_json::Value;

    let (Value::Object(target), Value::Object(changes)) = (&mut *doc, patch) else {
        *doc = patch.clone();
        return;
    };
    for (field, change) in changes {
        if change.is_null() {
            target.remove(field);
            continue;
        }
        let Some(existing) = target.get_mut(field) else {
            target.insert(field.clone(), change.clone());
            continue;
        };
        match (existing, list_merge_key(field), change) {
            (Value::Array(items), Some(merge_key), Value::Array(incoming)) => {
                for item in incoming {
                    let id = item.get(merge_key);
                    match items.iter_mut().find(|current| id.is_some() && current.get(merge_key) == id) {
                        Some(current) => strategic_merge(current, item),
                        None => items.push(item.clone()),
                    }
                }
            }
            (other, _, _) => strategic_merge(other, change),
        }
    }
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    let meta = obj.meta();
    key(
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `fault`. Faults queue per operation.
    pub fn fail_next(&self, op: MockOp, fault: Fault) {
        lock(&self.faults).push((op, fault));
    }

    /// Successful creates, patches and deletes since construction.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: MockOp) -> Result<(), ClusterError> {
        // Let concurrent callers interleave between read and write.
        tokio::task::yield_now().await;
        let mut faults = lock(&self.faults);
        if let Some(pos) = faults.iter().position(|(o, _)| *o == op) {
            let (_, fault) = faults.remove(pos);
            return Err(fault.into_error(op));
        }
        Ok(())
    }

    fn bump(&self) -> String {
        (self.next_resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn seed<K: Resource + Clone>(&self, map: &ObjectMap<K>, mut obj: K) {
        obj.meta_mut().resource_version = Some(self.bump());
        lock(map).insert(key_of(&obj), obj);
    }

    fn create<K: Resource + Clone>(&self, map: &ObjectMap<K>, obj: &K, kind: &str) -> Result<K, ClusterError> {
        let k = key_of(obj);
        if k.1.is_empty() {
            return Err(ClusterError::InvalidRequest(format!("{kind} without a name")));
        }
        let mut objects = lock(map);
        if objects.contains_key(&k) {
            return Err(ClusterError::AlreadyExists(format!("{kind} {}/{}", k.0, k.1)));
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(self.bump());
        objects.insert(k, stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    fn patch<K>(
        &self,
        map: &ObjectMap<K>,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
        merge: MergeFn,
        kind: &str,
    ) -> Result<K, ClusterError>
    where
        K: Resource + Clone + Serialize + DeserializeOwned,
    {
        let k = key(namespace, name);
        let mut objects = lock(map);
        let current = objects
            .get(&k)
            .ok_or_else(|| ClusterError::NotFound(format!("{kind} {namespace}/{name}")))?;

        let expected = patch.pointer("/metadata/resourceVersion").and_then(|v| v.as_str());
        if let Some(expected) = expected {
            if current.meta().resource_version.as_deref() != Some(expected) {
                return Err(ClusterError::Conflict(format!(
                    "{kind} {namespace}/{name} changed since resourceVersion {expected}"
                )));
            }
        }

        let mut doc = serde_json::to_value(current)?;
        merge(&mut doc, patch);
        let mut updated: K = serde_json::from_value(doc)?;
        updated.meta_mut().resource_version = Some(self.bump());
        objects.insert(k, updated.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    fn delete<K: Resource>(&self, map: &ObjectMap<K>, namespace: &str, name: &str) -> bool {
        let removed = lock(map).remove(&key(namespace, name)).is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    // Test setup helpers. Seeding does not count as a write.

    pub fn add_certificate(&self, certificate: Certificate) {
        self.seed(&self.certificates, certificate);
    }

    pub fn add_cluster_issuer(&self, issuer: ClusterIssuer) {
        self.seed(&self.cluster_issuers, issuer);
    }

    pub fn add_secret(&self, secret: Secret) {
        self.seed(&self.secrets, secret);
    }

    pub fn add_service(&self, service: Service) {
        self.seed(&self.services, service);
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        self.seed(&self.deployments, deployment);
    }

    /// Simulate a user deleting a Service. With finalizers pending the object
    /// only gets a deletion timestamp, otherwise it is removed.
    pub fn request_service_deletion(&self, namespace: &str, name: &str) {
        let mut services = lock(&self.services);
        let k = key(namespace, name);
        let Some(service) = services.get(&k) else {
            return;
        };
        if service.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            services.remove(&k);
            return;
        }
        let mut doc = serde_json::to_value(service).unwrap_or_default();
        json_patch::merge(
            &mut doc,
            &serde_json::json!({"metadata": {"deletionTimestamp": "2026-01-01T00:00:00Z"}}),
        );
        if let Ok(mut marked) = serde_json::from_value::<Service>(doc) {
            marked.metadata.resource_version = Some(self.bump());
            services.insert(k, marked);
        }
    }

    pub fn certificate(&self, namespace: &str, name: &str) -> Option<Certificate> {
        lock(&self.certificates).get(&key(namespace, name)).cloned()
    }

    pub fn certificates(&self) -> Vec<Certificate> {
        lock(&self.certificates).values().cloned().collect()
    }

    pub fn cluster_issuer(&self, name: &str) -> Option<ClusterIssuer> {
        lock(&self.cluster_issuers).get(&key("", name)).cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        lock(&self.secrets).get(&key(namespace, name)).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        lock(&self.services).get(&key(namespace, name)).cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        lock(&self.deployments).get(&key(namespace, name)).cloned()
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_certificate(&self, namespace: &str, name: &str) -> Result<Option<Certificate>, ClusterError> {
        self.enter(MockOp::GetCertificate).await?;
        Ok(self.certificate(namespace, name))
    }

    async fn create_certificate(&self, certificate: &Certificate) -> Result<Certificate, ClusterError> {
        self.enter(MockOp::CreateCertificate).await?;
        if certificate.metadata.namespace.is_none() {
            return Err(ClusterError::InvalidRequest("Certificate has no namespace".to_string()));
        }
        self.create(&self.certificates, certificate, "Certificate")
    }

    async fn delete_certificate(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.enter(MockOp::DeleteCertificate).await?;
        Ok(self.delete(&self.certificates, namespace, name))
    }

    async fn get_cluster_issuer(&self, name: &str) -> Result<Option<ClusterIssuer>, ClusterError> {
        self.enter(MockOp::GetClusterIssuer).await?;
        Ok(self.cluster_issuer(name))
    }

    async fn create_cluster_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer, ClusterError> {
        self.enter(MockOp::CreateClusterIssuer).await?;
        self.create(&self.cluster_issuers, issuer, "ClusterIssuer")
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        self.enter(MockOp::GetSecret).await?;
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        self.enter(MockOp::CreateSecret).await?;
        if secret.metadata.namespace.is_none() {
            return Err(ClusterError::InvalidRequest("Secret has no namespace".to_string()));
        }
        self.create(&self.secrets, secret, "Secret")
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.enter(MockOp::DeleteSecret).await?;
        Ok(self.delete(&self.secrets, namespace, name))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        self.enter(MockOp::GetService).await?;
        Ok(self.service(namespace, name))
    }

    async fn patch_service(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Service, ClusterError> {
        self.enter(MockOp::PatchService).await?;
        let updated = self.patch(&self.services, namespace, name, patch, json_patch::merge, "Service")?;
        // The API server drops a terminating object once its last finalizer is gone.
        if updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty)
        {
            lock(&self.services).remove(&key(namespace, name));
        }
        Ok(updated)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError> {
        self.enter(MockOp::GetDeployment).await?;
        Ok(self.deployment(namespace, name))
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError> {
        self.enter(MockOp::ListDeployments).await?;
        Ok(lock(&self.deployments)
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<Deployment, ClusterError> {
        self.enter(MockOp::PatchDeployment).await?;
        self.patch(&self.deployments, namespace, name, patch, strategic_merge, "Deployment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secret(namespace: &str, name: &str) -> Secret {
        let mut s = Secret::default();
        s.metadata.namespace = Some(namespace.to_string());
        s.metadata.name = Some(name.to_string());
        s
    }

    fn deployment(namespace: &str, name: &str) -> Deployment {
        let mut d = Deployment::default();
        d.metadata.namespace = Some(namespace.to_string());
        d.metadata.name = Some(name.to_string());
        d
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() {
        let client = MockClusterClient::new();
        client.create_secret(&secret("ns", "a")).await.unwrap();
        let err = client.create_secret(&secret("ns", "a")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(client.write_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let client = MockClusterClient::new();
        client.add_deployment(deployment("ns", "web"));
        let rv = client.deployment("ns", "web").unwrap().metadata.resource_version.unwrap();

        let patch = json!({"metadata": {"resourceVersion": rv, "labels": {"a": "b"}}});
        let updated = client.patch_deployment("ns", "web", &patch).await.unwrap();
        assert_ne!(updated.metadata.resource_version.as_deref(), Some(rv.as_str()));
        assert_eq!(updated.metadata.labels.unwrap()["a"], "b");

        let err = client.patch_deployment("ns", "web", &patch).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_deployment_patch_merges_pod_template_lists_by_key() {
        let client = MockClusterClient::new();
        let mut d = deployment("ns", "web");
        d.spec = serde_json::from_value(json!({
            "selector": {},
            "template": {"spec": {
                "volumes": [{"name": "data", "emptyDir": {}}],
                "containers": [
                    {"name": "app", "image": "app:1", "volumeMounts": [{"name": "data", "mountPath": "/data"}]},
                    {"name": "proxy", "image": "proxy:1"}
                ]
            }}
        }))
        .unwrap();
        client.add_deployment(d);

        let patch = json!({"spec": {"template": {"spec": {
            "volumes": [{"name": "tls", "secret": {"secretName": "tls"}}],
            "containers": [{"name": "app", "volumeMounts": [{"name": "tls", "mountPath": "/etc/tls"}]}]
        }}}});
        let updated = client.patch_deployment("ns", "web", &patch).await.unwrap();

        let pod = updated.spec.unwrap().template.spec.unwrap();
        let volumes: Vec<_> = pod.volumes.unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(volumes, vec!["data", "tls"]);
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].image.as_deref(), Some("app:1"));
        let mounts: Vec<_> = pod.containers[0]
            .volume_mounts
            .clone()
            .unwrap()
            .into_iter()
            .map(|m| m.mount_path)
            .collect();
        assert_eq!(mounts, vec!["/data", "/etc/tls"]);
        assert_eq!(pod.containers[1].image.as_deref(), Some("proxy:1"));
        assert!(pod.containers[1].volume_mounts.is_none());
    }

    #[tokio::test]
    async fn test_list_is_namespace_scoped_and_sorted() {
        let client = MockClusterClient::new();
        client.add_deployment(deployment("ns", "b"));
        client.add_deployment(deployment("ns", "a"));
        client.add_deployment(deployment("other", "c"));

        let names: Vec<_> = client
            .list_deployments("ns")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.metadata.name.unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fault_fires_once() {
        let client = MockClusterClient::new();
        client.fail_next(MockOp::GetSecret, Fault::Conflict);
        assert!(client.get_secret("ns", "x").await.unwrap_err().is_conflict());
        assert!(client.get_secret("ns", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let client = MockClusterClient::new();
        client.add_secret(secret("ns", "a"));
        assert!(client.delete_secret("ns", "a").await.unwrap());
        assert!(!client.delete_secret("ns", "a").await.unwrap());
    }
}
