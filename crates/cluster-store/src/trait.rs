//! ClusterStore trait for mocking
//!
//! This trait abstracts the Kubernetes API to enable mocking in unit tests.
//! The concrete KubeClusterStore implements this trait, and tests can use the
//! in-memory store.

use crate::error::StoreError;
use crds::Eva;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;

/// Trait for cluster object store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch an Eva by namespace and name
    async fn get_eva(&self, namespace: &str, name: &str) -> Result<Eva, StoreError>;

    /// Replace an Eva's metadata and spec (finalizer edits)
    ///
    /// Fails with `Conflict` when the object's resourceVersion is stale.
    async fn update_eva(&self, eva: &Eva) -> Result<Eva, StoreError>;

    /// Write an Eva's status subresource
    ///
    /// Guarded by the object's resourceVersion, so a concurrent writer
    /// produces `Conflict`.
    async fn update_eva_status(&self, eva: &Eva) -> Result<Eva, StoreError>;

    /// Create a Job; `AlreadyExists` when the name is taken
    async fn create_job(&self, job: &Job) -> Result<Job, StoreError>;

    /// List Jobs in a namespace whose controller owner has the given UID
    async fn list_jobs_by_owner(&self, namespace: &str, owner_uid: &str) -> Result<Vec<Job>, StoreError>;

    /// List Pods in a namespace matching every label pair
    async fn list_pods(&self, namespace: &str, labels: &[(&str, &str)]) -> Result<Vec<Pod>, StoreError>;
}
