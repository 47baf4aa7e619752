//! Cluster store errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write lost an optimistic-concurrency race (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create collided with an existing object of the same name
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Store unreachable or returned an unexpected error
    #[error("Kubernetes API error: {0}")]
    Kube(kube::Error),

    /// Store unreachable (raised by non-kube backends)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Object is missing metadata required for the call
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Owner index could not be constructed
    #[error("Invalid owner index: {0}")]
    InvalidIndex(String),
}

impl StoreError {
    /// Returns true if the object was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Returns true if a write lost a concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message.clone()),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(ae.message.clone())
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message.clone()),
            other => StoreError::Kube(other),
        }
    }
}
