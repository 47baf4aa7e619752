//! State observer
//!
//! Read-only view of the children an Eva owns: its Job (resolved through the
//! owner index) and that Job's pods, scanned for image pull failures.

use super::cancellable;
use crate::config::ImagePullObservationPolicy;
use crate::error::ControllerError;
use cluster_store::ClusterStore;
use crds::Eva;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Label the Job controller stamps on the pods it creates
pub const JOB_NAME_LABEL: &str = "job-name";

const IMAGE_PULL_REASONS: [&str; 2] = ["ImagePullBackOff", "ErrImagePull"];

/// Observed state of the owned Job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobState {
    pub exists: bool,
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
    pub image_pull_failed: bool,
}

/// Observed state of an owned Service (not reconciled yet)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceState {
    pub exists: bool,
}

/// Observed state of an owned Deployment (not reconciled yet)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploymentState {
    pub exists: bool,
    pub ready: bool,
}

/// Everything observed about an Eva's children in one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedState {
    pub job: JobState,
    pub service: ServiceState,
    pub deployment: DeploymentState,
}

/// Observes an Eva's children through the cluster store
pub struct StateObserver<'a> {
    store: &'a dyn ClusterStore,
    policy: ImagePullObservationPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> StateObserver<'a> {
    pub fn new(store: &'a dyn ClusterStore, policy: ImagePullObservationPolicy, cancel: &'a CancellationToken) -> Self {
        Self { store, policy, cancel }
    }

    /// Observe the Job owned by `eva`.
    ///
    /// Job listing failures propagate; pod listing failures are resolved by
    /// the configured policy.
    pub async fn observe(&self, eva: &Eva) -> Result<ObservedState, ControllerError> {
        let namespace = eva
            .namespace()
            .ok_or_else(|| ControllerError::MissingMetadata(format!("Eva {} has no namespace", eva.name_any())))?;
        let uid = eva
            .uid()
            .ok_or_else(|| ControllerError::MissingMetadata(format!("Eva {}/{} has no uid", namespace, eva.name_any())))?;

        let jobs = cancellable(self.cancel, self.store.list_jobs_by_owner(&namespace, &uid)).await?;
        let Some(job) = select_job(jobs) else {
            debug!("No Job owned by Eva {}/{}", namespace, eva.name_any());
            return Ok(ObservedState::default());
        };

        let status = job.status.clone().unwrap_or_default();
        let job_state = JobState {
            exists: true,
            active: status.active.unwrap_or(0),
            succeeded: status.succeeded.unwrap_or(0),
            failed: status.failed.unwrap_or(0),
            image_pull_failed: self.image_pull_failed(&job).await?,
        };

        Ok(ObservedState {
            job: job_state,
            ..Default::default()
        })
    }

    async fn image_pull_failed(&self, job: &Job) -> Result<bool, ControllerError> {
        let namespace = job.namespace().unwrap_or_default();
        let job_name = job.name_any();
        let labels = [(JOB_NAME_LABEL, job_name.as_str())];

        match cancellable(self.cancel, self.store.list_pods(&namespace, &labels)).await {
            Ok(pods) => Ok(pods.iter().any(|pod| match image_pull_failure(pod) {
                Some((container, reason)) => {
                    info!(
                        "Detected image pull failure in pod {}/{} container {}: {}",
                        namespace,
                        pod.name_any(),
                        container,
                        reason
                    );
                    true
                }
                None => false,
            })),
            Err(ControllerError::Cancelled) => Err(ControllerError::Cancelled),
            Err(e) => {
                let assumed = self.policy == ImagePullObservationPolicy::FailClosed;
                warn!(
                    "Failed to list pods for Job {}/{} ({}), assuming image_pull_failed={}",
                    namespace, job_name, e, assumed
                );
                Ok(assumed)
            }
        }
    }
}

/// Picks one Job when several claim the same owner: earliest creation
/// timestamp, then name.
pub fn select_job(mut jobs: Vec<Job>) -> Option<Job> {
    if jobs.len() > 1 {
        let names: Vec<String> = jobs.iter().map(|j| j.name_any()).collect();
        warn!("Found {} Jobs for one owner ({}), using the oldest", jobs.len(), names.join(", "));
    }
    jobs.sort_by(|a, b| {
        a.metadata
            .creation_timestamp
            .cmp(&b.metadata.creation_timestamp)
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });
    jobs.into_iter().next()
}

/// First container (then init container) waiting on an image pull, as
/// `(container name, reason)`.
pub fn image_pull_failure(pod: &Pod) -> Option<(&str, &str)> {
    let status = pod.status.as_ref()?;
    first_pull_failure(status.container_statuses.as_deref())
        .or_else(|| first_pull_failure(status.init_container_statuses.as_deref()))
}

fn first_pull_failure(statuses: Option<&[ContainerStatus]>) -> Option<(&str, &str)> {
    statuses?.iter().find_map(|cs| {
        let reason = cs.state.as_ref()?.waiting.as_ref()?.reason.as_deref()?;
        IMAGE_PULL_REASONS
            .contains(&reason)
            .then_some((cs.name.as_str(), reason))
    })
}
