//! Eva reconciler
//!
//! One pass per Eva key: fetch, finalizer handling, observe the owned Job,
//! decide the phase, create the Job when asked to and persist status.
//! Every store call races the caller's cancellation token.

pub mod builder;
pub mod observer;
pub mod phase;

use crate::config::ReconcilerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use builder::{JobOption, build_job};
use chrono::Utc;
use cluster_store::{ClusterStore, StoreError};
use crds::{Eva, set_condition};
use k8s_openapi::api::batch::v1::Job;
use kube::{Resource, ResourceExt};
use observer::StateObserver;
use phase::Decision;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Value of the `app` label on every Job the controller creates
pub const APP_LABEL_VALUE: &str = "eva-controller";

/// Runs `op` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ControllerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ControllerError::Cancelled),
        result = op => result.map_err(ControllerError::from),
    }
}

/// Reconciler for Eva resources
pub struct EvaReconciler {
    store: Arc<dyn ClusterStore>,
    config: ReconcilerConfig,
    metrics: Metrics,
}

impl EvaReconciler {
    pub fn new(store: Arc<dyn ClusterStore>, config: ReconcilerConfig, metrics: Metrics) -> Self {
        Self { store, config, metrics }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Reconcile the Eva `namespace/name`.
    ///
    /// Returns the requested requeue delay. Owned Job events drive further
    /// passes, so the delay is always `None` today.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>, ControllerError> {
        info!("Reconciling Eva {}/{}", namespace, name);

        let mut eva = match cancellable(cancel, self.store.get_eva(namespace, name)).await {
            Ok(eva) => eva,
            Err(e) if e.is_not_found() => {
                debug!("Eva {}/{} not found, nothing to do", namespace, name);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if eva.metadata.deletion_timestamp.is_some() {
            return self.finalize(eva, cancel).await;
        }

        if !self.has_finalizer(&eva) {
            eva.finalizers_mut().push(self.config.finalizer.clone());
            cancellable(cancel, self.store.update_eva(&eva)).await?;
            info!("Added finalizer {} to Eva {}/{}", self.config.finalizer, namespace, name);
            return Ok(None);
        }

        let observed = StateObserver::new(self.store.as_ref(), self.config.image_pull_policy, cancel)
            .observe(&eva)
            .await?;
        let generation = eva.metadata.generation.unwrap_or_default();
        let decision = phase::decide(&eva.spec, eva.status.as_ref(), &observed, generation);
        debug!(
            "Eva {}/{} observed {:?}, decided phase {:?}",
            namespace, name, observed.job, decision.phase
        );
        self.metrics.record_phase(decision.phase);

        if decision.create_job {
            let job = self.desired_job(&eva)?;
            cancellable(cancel, self.store.create_job(&job)).await?;
            self.metrics.record_job_created();
            info!(
                "Created Job {}/{} for Eva with image {}",
                namespace,
                job.name_any(),
                eva.spec.image
            );
        }

        self.write_status(eva, decision, generation, cancel).await?;
        Ok(None)
    }

    fn has_finalizer(&self, eva: &Eva) -> bool {
        eva.finalizers().iter().any(|f| *f == self.config.finalizer)
    }

    /// Deletion path: drop our finalizer and leave the Job to garbage collection.
    async fn finalize(&self, mut eva: Eva, cancel: &CancellationToken) -> Result<Option<Duration>, ControllerError> {
        if !self.has_finalizer(&eva) {
            debug!("Eva {}/{} is terminating without our finalizer", eva.namespace().unwrap_or_default(), eva.name_any());
            return Ok(None);
        }

        let finalizer = self.config.finalizer.clone();
        eva.finalizers_mut().retain(|f| *f != finalizer);
        cancellable(cancel, self.store.update_eva(&eva)).await?;
        info!(
            "Removed finalizer {} from Eva {}/{}",
            finalizer,
            eva.namespace().unwrap_or_default(),
            eva.name_any()
        );
        Ok(None)
    }

    /// The Job an Eva should own, with a controller owner reference back to it.
    pub fn desired_job(&self, eva: &Eva) -> Result<Job, ControllerError> {
        let name = eva.name_any();
        let namespace = eva
            .namespace()
            .ok_or_else(|| ControllerError::MissingMetadata(format!("Eva {} has no namespace", name)))?;
        let mut owner = eva.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::MissingMetadata(format!("Eva {}/{} has no uid for an owner reference", namespace, name))
        })?;
        // Foreground deletion of the Eva waits for the Job
        owner.block_owner_deletion = Some(true);

        let labels = BTreeMap::from([
            ("app".to_string(), APP_LABEL_VALUE.to_string()),
            ("eva-name".to_string(), name.clone()),
        ]);
        let mut options = vec![
            JobOption::Labels(labels),
            JobOption::ContainerName(format!("{}-container", name)),
            JobOption::Image(eva.spec.image.clone()),
            JobOption::Command(eva.spec.command.clone()),
            JobOption::ImagePullSecret(eva.spec.image_pull_secret.clone().unwrap_or_default()),
            JobOption::BackoffLimit(self.config.job_backoff_limit),
        ];
        if let Some(ttl) = self.config.job_ttl_seconds {
            options.push(JobOption::TtlSecondsAfterFinished(ttl));
        }

        let mut job = build_job(&format!("{}-job", name), &namespace, options);
        job.metadata.owner_references = Some(vec![owner]);
        Ok(job)
    }

    async fn write_status(
        &self,
        mut eva: Eva,
        decision: Decision,
        generation: i64,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let mut status = eva.status.take().unwrap_or_default();
        let now = Utc::now();
        for condition in decision.conditions {
            set_condition(&mut status.conditions, condition, now);
        }
        status.phase = decision.phase;
        status.observed_generation = generation;
        eva.status = Some(status);

        cancellable(cancel, self.store.update_eva_status(&eva)).await?;
        debug!(
            "Updated Eva {}/{} status: phase {}",
            eva.namespace().unwrap_or_default(),
            eva.name_any(),
            decision.phase
        );
        Ok(())
    }
}
