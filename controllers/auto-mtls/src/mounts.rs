//! Secret volume and mount injection for workload pod templates.
//!
//! Pure functions: they compute the patched pod spec and the strategic merge
//! patch, the reconcilers do the I/O.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodSpec, SecretVolumeSource, Volume, VolumeMount};
use serde_json::json;

/// Pod volume names are DNS labels.
const MAX_VOLUME_NAME_LEN: usize = 63;

/// `secret_name` cut down to a valid volume name.
fn volume_name_for(secret_name: &str) -> String {
    let mut name: String = secret_name.chars().take(MAX_VOLUME_NAME_LEN).collect();
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// One secret to project into every container of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMount {
    pub volume_name: String,
    pub secret_name: String,
    pub mount_path: String,
    pub read_only: bool,
    /// Let pods start before the secret exists (or after it is deleted)
    pub optional: bool,
}

impl SecretMount {
    /// Read-only, optional mount of `secret_name`. The volume is named after
    /// the secret, truncated to 63 characters.
    pub fn new(secret_name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        let secret_name = secret_name.into();
        Self {
            volume_name: volume_name_for(&secret_name),
            secret_name,
            mount_path: mount_path.into(),
            read_only: true,
            optional: true,
        }
    }

    fn volume(&self) -> Volume {
        Volume {
            name: self.volume_name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(self.secret_name.clone()),
                optional: Some(self.optional),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: self.volume_name.clone(),
            mount_path: self.mount_path.clone(),
            read_only: Some(self.read_only),
            ..Default::default()
        }
    }
}

/// Returns `pod_spec` with every requested volume and per-container mount
/// present, or `None` when nothing was missing.
///
/// Existing volumes and mounts with a requested name are left as they are,
/// even if they point somewhere else.
pub fn ensure_secret_mounts(pod_spec: &PodSpec, mounts: &[SecretMount]) -> Option<PodSpec> {
    let mut patched = pod_spec.clone();
    let mut changed = false;

    for mount in mounts {
        let volumes = patched.volumes.get_or_insert_with(Vec::new);
        if !volumes.iter().any(|v| v.name == mount.volume_name) {
            volumes.push(mount.volume());
            changed = true;
        }

        for container in &mut patched.containers {
            let container_mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            if !container_mounts.iter().any(|m| m.name == mount.volume_name) {
                container_mounts.push(mount.volume_mount());
                changed = true;
            }
        }
    }

    changed.then_some(patched)
}

/// Strategic merge patch adding `mounts` to the Deployment's pod template,
/// locked to the Deployment's current resourceVersion. `None` when already in place.
///
/// The patch carries only the new volumes and, per container name, the new
/// mounts. Everything else in the pod template is left to the API server.
pub fn deployment_mount_patch(deployment: &Deployment, mounts: &[SecretMount]) -> Option<serde_json::Value> {
    let pod_spec = deployment.spec.as_ref()?.template.spec.as_ref()?;
    let patched = ensure_secret_mounts(pod_spec, mounts)?;

    let existing_volumes: Vec<&str> = pod_spec
        .volumes
        .iter()
        .flatten()
        .map(|v| v.name.as_str())
        .collect();
    let volumes: Vec<&Volume> = patched
        .volumes
        .iter()
        .flatten()
        .filter(|v| !existing_volumes.contains(&v.name.as_str()))
        .collect();

    let containers: Vec<serde_json::Value> = pod_spec
        .containers
        .iter()
        .zip(&patched.containers)
        .filter_map(|(before, after)| {
            let added: Vec<&VolumeMount> = after
                .volume_mounts
                .iter()
                .flatten()
                .filter(|m| !before.volume_mounts.iter().flatten().any(|b| b.name == m.name))
                .collect();
            (!added.is_empty()).then(|| json!({ "name": after.name, "volumeMounts": added }))
        })
        .collect();

    let mut template_spec = serde_json::Map::new();
    if !volumes.is_empty() {
        template_spec.insert("volumes".to_string(), json!(volumes));
    }
    if !containers.is_empty() {
        template_spec.insert("containers".to_string(), json!(containers));
    }

    Some(json!({
        "metadata": {
            "resourceVersion": deployment.metadata.resource_version,
        },
        "spec": {
            "template": {
                "spec": template_spec,
            }
        }
    }))
}
