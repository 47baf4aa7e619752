//! Mock ClusterStore for unit testing
//!
//! In-memory implementation of `ClusterStore` that mimics the API server
//! behaviours the controller relies on: resourceVersion conflicts, status
//! subresource isolation, finalizer-gated deletion and name collisions on
//! create. Call counts and failure injection let tests assert exactly which
//! writes a reconcile performed.

use crate::error::StoreError;
use crate::owner_index::OwnerIndex;
use crate::store_trait::ClusterStore;
use chrono::{SecondsFormat, Utc};
use crds::Eva;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store operations, used to address failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetEva,
    UpdateEva,
    UpdateEvaStatus,
    CreateJob,
    ListJobsByOwner,
    ListPods,
}

/// Error class an injected failure produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Conflict,
    AlreadyExists,
    Unavailable,
}

impl FailureKind {
    fn to_error(self, op: Operation) -> StoreError {
        let message = format!("injected failure on {:?}", op);
        match self {
            FailureKind::NotFound => StoreError::NotFound(message),
            FailureKind::Conflict => StoreError::Conflict(message),
            FailureKind::AlreadyExists => StoreError::AlreadyExists(message),
            FailureKind::Unavailable => StoreError::Unavailable(message),
        }
    }
}

/// Number of calls made to each store operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_eva: usize,
    pub update_eva: usize,
    pub update_eva_status: usize,
    pub create_job: usize,
    pub list_jobs_by_owner: usize,
    pub list_pods: usize,
}

type Key = (String, String);

/// Mock ClusterStore for testing
#[derive(Debug, Clone)]
pub struct MockClusterStore {
    evas: Arc<Mutex<HashMap<Key, Eva>>>,
    jobs: Arc<Mutex<HashMap<Key, Job>>>,
    pods: Arc<Mutex<Vec<Pod>>>,
    failures: Arc<Mutex<HashMap<Operation, FailureKind>>>,
    calls: Arc<Mutex<CallCounts>>,
    latency: Arc<Mutex<Option<Duration>>>,
    // Counter for generating resource versions
    next_resource_version: Arc<Mutex<u64>>,
    job_index: OwnerIndex<Job>,
}

impl MockClusterStore {
    /// Create an empty mock store resolving owned Jobs through `job_index`
    ///
    /// The index is reset and marked synced; Jobs added or created later are
    /// applied to it the way a watch event would.
    pub fn new(job_index: OwnerIndex<Job>) -> Self {
        job_index.replace(Vec::new());
        Self {
            evas: Arc::new(Mutex::new(HashMap::new())),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            pods: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(CallCounts::default())),
            latency: Arc::new(Mutex::new(None)),
            next_resource_version: Arc::new(Mutex::new(1)),
            job_index,
        }
    }

    /// Add an Eva to the mock store (for test setup)
    ///
    /// Assigns a UID and resourceVersion when the object has none.
    pub fn add_eva(&self, mut eva: Eva) {
        if eva.metadata.uid.is_none() {
            eva.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        eva.metadata.resource_version = Some(self.next_resource_version());
        let key = key_of(&eva.metadata);
        self.evas.lock().unwrap().insert(key, eva);
    }

    /// Add a Job to the mock store (for test setup)
    pub fn add_job(&self, mut job: Job) {
        if job.metadata.uid.is_none() {
            job.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        let key = key_of(&job.metadata);
        self.job_index.apply(job.clone());
        self.jobs.lock().unwrap().insert(key, job);
    }

    /// Add a Pod to the mock store (for test setup)
    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    /// Current stored copy of an Eva
    pub fn eva(&self, namespace: &str, name: &str) -> Option<Eva> {
        self.evas
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// All stored Jobs
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    /// Make every subsequent call to `op` fail with `kind`
    pub fn fail_on(&self, op: Operation, kind: FailureKind) {
        self.failures.lock().unwrap().insert(op, kind);
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, op: Operation) {
        self.failures.lock().unwrap().remove(&op);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Snapshot of call counts
    pub fn calls(&self) -> CallCounts {
        self.calls.lock().unwrap().clone()
    }

    fn next_resource_version(&self) -> String {
        let mut rv = self.next_resource_version.lock().unwrap();
        let current = *rv;
        *rv += 1;
        current.to_string()
    }

    /// Counts the call, applies latency and returns any injected failure.
    async fn enter(&self, op: Operation) -> Result<(), StoreError> {
        {
            let mut calls = self.calls.lock().unwrap();
            match op {
                Operation::GetEva => calls.get_eva += 1,
                Operation::UpdateEva => calls.update_eva += 1,
                Operation::UpdateEvaStatus => calls.update_eva_status += 1,
                Operation::CreateJob => calls.create_job += 1,
                Operation::ListJobsByOwner => calls.list_jobs_by_owner += 1,
                Operation::ListPods => calls.list_pods += 1,
            }
        }

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match self.failures.lock().unwrap().get(&op) {
            Some(kind) => Err(kind.to_error(op)),
            None => Ok(()),
        }
    }

    fn check_resource_version(stored: &Eva, incoming: &Eva, key: &Key) -> Result<(), StoreError> {
        match (&stored.metadata.resource_version, &incoming.metadata.resource_version) {
            (Some(current), Some(given)) if current != given => Err(StoreError::Conflict(format!(
                "Eva {}/{} has resourceVersion {}, got {}",
                key.0, key.1, current, given
            ))),
            _ => Ok(()),
        }
    }
}

fn key_of(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

/// Parses an RFC 3339 timestamp into a Kubernetes `Time` (for test setup)
pub fn parse_time(rfc3339: &str) -> Option<Time> {
    serde_json::from_value(serde_json::Value::String(rfc3339.to_string())).ok()
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    async fn get_eva(&self, namespace: &str, name: &str) -> Result<Eva, StoreError> {
        self.enter(Operation::GetEva).await?;
        self.eva(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("Eva {}/{}", namespace, name)))
    }

    async fn update_eva(&self, eva: &Eva) -> Result<Eva, StoreError> {
        self.enter(Operation::UpdateEva).await?;
        let key = key_of(&eva.metadata);
        let mut evas = self.evas.lock().unwrap();
        let stored = evas
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("Eva {}/{}", key.0, key.1)))?;
        Self::check_resource_version(stored, eva, &key)?;

        // Status is owned by the status subresource and ignored here
        let mut updated = eva.clone();
        updated.status = stored.status.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        updated.metadata.resource_version = Some(self.next_resource_version());

        let finalizers_empty = updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
        if updated.metadata.deletion_timestamp.is_some() && finalizers_empty {
            evas.remove(&key);
        } else {
            evas.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_eva_status(&self, eva: &Eva) -> Result<Eva, StoreError> {
        self.enter(Operation::UpdateEvaStatus).await?;
        let key = key_of(&eva.metadata);
        let mut evas = self.evas.lock().unwrap();
        let stored = evas
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("Eva {}/{}", key.0, key.1)))?;
        Self::check_resource_version(stored, eva, &key)?;

        stored.status = eva.status.clone();
        stored.metadata.resource_version = Some(self.next_resource_version());
        Ok(stored.clone())
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        self.enter(Operation::CreateJob).await?;
        let key = key_of(&job.metadata);
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("Job {}/{}", key.0, key.1)));
        }

        let mut created = job.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.creation_timestamp =
            parse_time(&Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        created.metadata.resource_version = Some(self.next_resource_version());
        jobs.insert(key, created.clone());
        self.job_index.apply(created.clone());
        Ok(created)
    }

    async fn list_jobs_by_owner(&self, namespace: &str, owner_uid: &str) -> Result<Vec<Job>, StoreError> {
        self.enter(Operation::ListJobsByOwner).await?;
        Ok(self.job_index.get(namespace, owner_uid))
    }

    async fn list_pods(&self, namespace: &str, labels: &[(&str, &str)]) -> Result<Vec<Pod>, StoreError> {
        self.enter(Operation::ListPods).await?;
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| {
                labels.iter().all(|(key, value)| {
                    pod.metadata
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(*key))
                        .is_some_and(|v| v == value)
                })
            })
            .cloned()
            .collect())
    }
}
