//! Cluster store errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster store.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with another writer that got there first
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Conditional write rejected because the object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request could not be built (e.g., object without a namespace) or the
    /// API server rejected the object as invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other API or transport failure
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        if let kube::Error::Api(response) = &err {
            let message = response.message.clone();
            match response.code {
                404 => return Self::NotFound(message),
                409 if response.reason == "AlreadyExists" => return Self::AlreadyExists(message),
                409 => return Self::Conflict(message),
                422 => return Self::InvalidRequest(message),
                _ => {}
            }
        }
        Self::Kube(err)
    }
}
