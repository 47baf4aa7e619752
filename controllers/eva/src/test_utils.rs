//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use crate::metrics::Metrics;
#[cfg(test)]
use cluster_store::{MockClusterStore, OwnerIndex};
#[cfg(test)]
use crds::{Eva, EvaSpec};
#[cfg(test)]
use k8s_openapi::api::batch::v1::{Job, JobStatus};
#[cfg(test)]
use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodStatus};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use kube::{Resource, ResourceExt};
#[cfg(test)]
use std::collections::BTreeMap;

/// Mock store with the default Job owner index
#[cfg(test)]
pub fn mock_store() -> MockClusterStore {
    MockClusterStore::new(OwnerIndex::new(".metadata.controller", "Eva").unwrap())
}

#[cfg(test)]
pub fn test_metrics() -> Metrics {
    Metrics::new().unwrap()
}

/// Helper to create a test Eva at generation 1 without finalizers or status
#[cfg(test)]
pub fn create_test_eva(name: &str, namespace: &str, image: &str) -> Eva {
    let mut eva = Eva::new(
        name,
        EvaSpec {
            image: image.to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), "echo sync ratio 400%".to_string()],
            image_pull_secret: None,
        },
    );
    eva.metadata.namespace = Some(namespace.to_string());
    eva.metadata.generation = Some(1);
    eva
}

/// Attach the default finalizer
#[cfg(test)]
pub fn with_finalizer(mut eva: Eva) -> Eva {
    eva.finalizers_mut().push(crate::config::DEFAULT_FINALIZER.to_string());
    eva
}

/// Helper to create the Job owned by `eva` with the given status counters
#[cfg(test)]
pub fn create_test_job(eva: &Eva, active: i32, succeeded: i32, failed: i32) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(format!("{}-job", eva.name_any())),
            namespace: eva.namespace(),
            owner_references: Some(vec![eva.controller_owner_ref(&()).unwrap()]),
            ..Default::default()
        },
        spec: None,
        status: Some(JobStatus {
            active: Some(active),
            succeeded: Some(succeeded),
            failed: Some(failed),
            ..Default::default()
        }),
    }
}

/// Helper to create a pod of `job_name`, optionally waiting with `reason`
#[cfg(test)]
pub fn create_test_pod(name: &str, namespace: &str, job_name: &str, reason: Option<&str>) -> Pod {
    let state = reason.map(|reason| ContainerState {
        waiting: Some(ContainerStateWaiting {
            reason: Some(reason.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([("job-name".to_string(), job_name.to_string())])),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            container_statuses: Some(vec![ContainerStatus {
                name: "main".to_string(),
                state,
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}
