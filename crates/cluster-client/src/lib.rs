//! Cluster store client
//!
//! The narrow slice of the Kubernetes API the auto-mtls reconcilers need:
//! typed get/list/create/patch/delete for cert-manager resources, Secrets,
//! Services and Deployments.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let secret = client.get_secret("cert-manager", "auto-mtls-cluster-ca-cert-secret").await?;
//! println!("CA secret present: {}", secret.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Semantics
//!
//! - `get_*` returns `Ok(None)` for a missing object instead of an error
//! - `create_*` fails with [`ClusterError::AlreadyExists`] on a name collision
//! - `patch_*` applies a JSON merge patch; a `metadata.resourceVersion` in the
//!   patch turns it into a conditional write that fails with
//!   [`ClusterError::Conflict`] when the object moved on
//! - `delete_*` returns `Ok(false)` when the object was already gone

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
#[cfg(feature = "test-util")]
pub use mock::{Fault, MockClusterClient, MockOp};
