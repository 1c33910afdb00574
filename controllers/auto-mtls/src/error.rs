//! Controller-specific error types.
//!
//! Reconcilers return these classified errors; the dispatch layer in
//! [`crate::watcher`] turns them into requeue decisions.

use cluster_client::ClusterError;
use kube::Error as KubeError;
use std::time::Duration;
use thiserror::Error;

/// Delay before retrying a write rejected by a resourceVersion precondition.
pub const CONFLICT_RETRY: Duration = Duration::from_secs(1);

/// Errors that can occur in the auto-mtls controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client construction or watch error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster store call failed
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// A dependency exists but lacks a required data field
    #[error("Missing field: {0}")]
    MissingField(String),

    /// The leaf certificate could not be created
    #[error("Certificate issuance failed for {certificate}: {source}")]
    IssuanceFailed {
        certificate: String,
        #[source]
        source: ClusterError,
    },

    /// Invalid configuration or malformed annotation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requested behavior has no defined semantics yet
    #[error("Not implemented: {0}")]
    Unimplemented(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Health/metrics listener failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Whether requeueing the object can make progress.
    ///
    /// Malformed input and unimplemented branches are terminal until the
    /// object itself changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cluster(e) | Self::IssuanceFailed { source: e, .. } => !matches!(
                e,
                ClusterError::InvalidRequest(_) | ClusterError::Serialization(_)
            ),
            Self::Kube(_) | Self::MissingField(_) | Self::Watch(_) | Self::Io(_) => true,
            Self::InvalidConfig(_) | Self::Unimplemented(_) | Self::Metrics(_) => false,
        }
    }

    /// Fixed retry delay for errors that should skip the backoff sequence.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Cluster(e) if e.is_conflict() => Some(CONFLICT_RETRY),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ControllerError::MissingField("ca.crt".into()).is_retryable());
        assert!(ControllerError::Cluster(ClusterError::NotFound("x".into())).is_retryable());
        assert!(!ControllerError::InvalidConfig("role".into()).is_retryable());
        assert!(!ControllerError::Unimplemented("client".into()).is_retryable());
        assert!(
            !ControllerError::Cluster(ClusterError::InvalidRequest("no ns".into())).is_retryable()
        );
    }

    #[test]
    fn test_conflict_retries_quickly() {
        let conflict = ControllerError::Cluster(ClusterError::Conflict("stale".into()));
        assert!(conflict.is_retryable());
        assert_eq!(conflict.retry_after(), Some(CONFLICT_RETRY));
        assert_eq!(ControllerError::MissingField("ca.crt".into()).retry_after(), None);
    }
}
