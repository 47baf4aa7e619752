//! Cluster Object Store
//!
//! The narrow slice of the Kubernetes API the Eva controller needs: fetch and
//! update Evas, write their status, create Jobs, and list Jobs and Pods.
//!
//! # Example
//!
//! ```no_run
//! use cluster_store::{ClusterStore, KubeClusterStore, OwnerIndex};
//! use k8s_openapi::api::batch::v1::Job;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let job_index = OwnerIndex::<Job>::new(".metadata.controller", "Eva")?;
//! let store = KubeClusterStore::new(client, job_index, "app=eva-controller");
//!
//! let eva = store.get_eva("default", "unit-01").await?;
//! let uid = eva.metadata.uid.clone().unwrap_or_default();
//! let jobs = store.list_jobs_by_owner("default", &uid).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod owner_index;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeClusterStore;
pub use error::StoreError;
pub use owner_index::OwnerIndex;
pub use store_trait::ClusterStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{CallCounts, FailureKind, MockClusterStore, Operation};
