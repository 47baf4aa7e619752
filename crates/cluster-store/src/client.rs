//! Kubernetes-backed cluster store

use crate::error::StoreError;
use crate::owner_index::OwnerIndex;
use crate::store_trait::ClusterStore;
use crds::Eva;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

/// Cluster store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
    job_index: OwnerIndex<Job>,
    job_selector: String,
}

impl std::fmt::Debug for KubeClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterStore")
            .field("job_index", &self.job_index)
            .field("job_selector", &self.job_selector)
            .finish_non_exhaustive()
    }
}

impl KubeClusterStore {
    /// Creates a store using `client`, resolving owned Jobs through `job_index`.
    ///
    /// `job_selector` narrows the Job listing used while the index has not
    /// synced yet; it should match the selector the index is maintained with.
    pub fn new(client: Client, job_index: OwnerIndex<Job>, job_selector: impl Into<String>) -> Self {
        Self {
            client,
            job_index,
            job_selector: job_selector.into(),
        }
    }

    fn evas(&self, namespace: &str) -> Api<Eva> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Extracts namespace and name, which every write needs.
fn namespaced_name<'a>(meta: &'a ObjectMeta, kind: &str) -> Result<(&'a str, &'a str), StoreError> {
    let namespace = meta
        .namespace
        .as_deref()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} has no namespace", kind)))?;
    let name = meta
        .name
        .as_deref()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} has no name", kind)))?;
    Ok((namespace, name))
}

/// Renders label pairs as a Kubernetes equality selector.
pub fn label_selector(labels: &[(&str, &str)]) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait::async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_eva(&self, namespace: &str, name: &str) -> Result<Eva, StoreError> {
        Ok(self.evas(namespace).get(name).await?)
    }

    async fn update_eva(&self, eva: &Eva) -> Result<Eva, StoreError> {
        let (namespace, name) = namespaced_name(&eva.metadata, "Eva")?;
        debug!("Replacing Eva {}/{}", namespace, name);
        Ok(self.evas(namespace).replace(name, &PostParams::default(), eva).await?)
    }

    async fn update_eva_status(&self, eva: &Eva) -> Result<Eva, StoreError> {
        let (namespace, name) = namespaced_name(&eva.metadata, "Eva")?;
        debug!("Patching Eva {}/{} status", namespace, name);

        // resourceVersion in a merge patch makes the write conditional
        let status_patch = json!({
            "metadata": { "resourceVersion": eva.metadata.resource_version },
            "status": eva.status,
        });
        let pp = PatchParams::default();
        Ok(self
            .evas(namespace)
            .patch_status(name, &pp, &Patch::Merge(&status_patch))
            .await?)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        let (namespace, name) = namespaced_name(&job.metadata, "Job")?;
        debug!("Creating Job {}/{}", namespace, name);
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), job).await?)
    }

    async fn list_jobs_by_owner(&self, namespace: &str, owner_uid: &str) -> Result<Vec<Job>, StoreError> {
        if self.job_index.is_synced() {
            return Ok(self.job_index.get(namespace, owner_uid));
        }

        debug!("Job index not synced, listing Jobs in {} with selector {:?}", namespace, self.job_selector);
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let jobs = api.list(&ListParams::default().labels(&self.job_selector)).await?;
        Ok(self.job_index.lookup(jobs.items, namespace, owner_uid))
    }

    async fn list_pods(&self, namespace: &str, labels: &[(&str, &str)]) -> Result<Vec<Pod>, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&lp).await?.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_joins_pairs() {
        let selector = label_selector(&[("app", "eva-controller"), ("eva-name", "unit-01")]);
        assert_eq!(selector, "app=eva-controller,eva-name=unit-01");
    }

    #[test]
    fn test_label_selector_empty() {
        assert_eq!(label_selector(&[]), "");
    }

    #[test]
    fn test_namespaced_name_requires_namespace() {
        let meta = ObjectMeta {
            name: Some("unit-01".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            namespaced_name(&meta, "Eva"),
            Err(StoreError::InvalidObject(_))
        ));
    }
}
