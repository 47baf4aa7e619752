//! Kubernetes resource watcher.
//!
//! Drives the reconciler from kube_runtime::Controller: Eva events and events
//! on the Jobs they own both enqueue the owning Eva.

use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::EvaReconciler;
use crds::Eva;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::{Api, ResourceExt};
use kube_runtime::{Controller, watcher, controller::{Action, Config as RuntimeConfig}};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared state handed to every reconcile
pub struct Context {
    pub reconciler: EvaReconciler,
    pub backoff: BackoffTracker,
    /// Cancels in-flight reconciles on shutdown
    pub cancel: CancellationToken,
}

fn object_key(eva: &Eva) -> String {
    format!("{}/{}", eva.namespace().unwrap_or_default(), eva.name_any())
}

async fn reconcile(eva: Arc<Eva>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = object_key(&eva);
    let namespace = eva
        .namespace()
        .ok_or_else(|| ControllerError::MissingMetadata(format!("Eva {} has no namespace", eva.name_any())))?;
    let name = eva.name_any();

    match ctx.reconciler.reconcile(&namespace, &name, &ctx.cancel).await {
        Ok(requeue) => {
            ctx.backoff.reset(&key);
            ctx.reconciler.metrics().record_reconcile("success");
            Ok(requeue.map_or_else(Action::await_change, Action::requeue))
        }
        Err(e) => {
            ctx.reconciler.metrics().record_reconcile(e.metric_label());
            Err(e)
        }
    }
}

/// Error policy: requeue with a per-object Fibonacci backoff
fn error_policy(eva: Arc<Eva>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = object_key(&eva);
    if matches!(error, ControllerError::Cancelled) {
        debug!("Reconcile of Eva {} cancelled", key);
        return Action::await_change();
    }

    let delay = ctx.backoff.next(&key);
    if error.is_conflict() {
        warn!("Conflict reconciling Eva {}, retrying in {:?}: {}", key, delay, error);
    } else {
        error!("Reconciliation error for Eva {}, retrying in {:?}: {}", key, delay, error);
    }
    Action::requeue(delay)
}

/// Watch Evas (and their Jobs) until `shutdown` is cancelled.
pub async fn run(
    evas: Api<Eva>,
    jobs: Api<Job>,
    ctx: Arc<Context>,
    config: &ControllerConfig,
    shutdown: CancellationToken,
) -> Result<(), ControllerError> {
    info!("Starting Eva watcher");

    let runtime_config = RuntimeConfig::default()
        .debounce(config.debounce)
        .concurrency(config.concurrency);

    Controller::new(evas, watcher::Config::default())
        .owns(jobs, watcher::Config::default())
        .with_config(runtime_config)
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled Eva {}/{}", obj.namespace.as_deref().unwrap_or_default(), obj.name),
                Err(e) => error!("Controller error for Eva: {}", e),
            }
        })
        .await;

    info!("Eva watcher stopped");
    Ok(())
}
