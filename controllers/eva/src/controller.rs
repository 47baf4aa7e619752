//! Main controller implementation.
//!
//! Wires the cluster store, reconciler, watcher and metrics server together
//! and runs them until shutdown. Readiness waits for the Job owner index to
//! finish its first listing.

use crate::backoff::BackoffTracker;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{APP_LABEL_VALUE, EvaReconciler};
use crate::server::{self, ServerState};
use crate::watcher::{self, Context};
use cluster_store::client::label_selector;
use cluster_store::{KubeClusterStore, OwnerIndex};
use crds::Eva;
use k8s_openapi::api::batch::v1::Job;
use kube::{Api, Client};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Main controller for Eva resources.
pub struct Controller {
    config: ControllerConfig,
    client: Client,
    job_index: OwnerIndex<Job>,
    job_selector: String,
    context: Arc<Context>,
    metrics: Metrics,
    shutdown: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Fails when the cluster is unreachable or the owner index is invalid.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Eva Controller");

        let client = Client::try_default().await?;
        let job_index = OwnerIndex::<Job>::new(
            config.reconciler.owner_index_key.clone(),
            config.reconciler.owner_kind.clone(),
        )?;
        info!(
            "Registered Job owner index {} for owner kind {}",
            job_index.key(),
            job_index.owner_kind()
        );

        let job_selector = label_selector(&[("app", APP_LABEL_VALUE)]);
        let store = Arc::new(KubeClusterStore::new(client.clone(), job_index.clone(), job_selector.clone()));
        let metrics = Metrics::new()?;
        let shutdown = CancellationToken::new();
        let reconciler = EvaReconciler::new(store, config.reconciler.clone(), metrics.clone());
        let context = Arc::new(Context {
            reconciler,
            backoff: BackoffTracker::default(),
            cancel: shutdown.clone(),
        });

        Ok(Self {
            config,
            client,
            job_index,
            job_selector,
            context,
            metrics,
            shutdown,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        let (evas, jobs): (Api<Eva>, Api<Job>) = match self.config.namespace.as_deref() {
            Some(ns) => (Api::namespaced(self.client.clone(), ns), Api::namespaced(self.client.clone(), ns)),
            None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
        };

        let signal = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            signal.cancel();
        });

        let ready = Arc::new(AtomicBool::new(false));
        let state = ServerState {
            metrics: self.metrics.clone(),
            ready: ready.clone(),
        };
        let mut server = tokio::spawn(server::serve(self.config.metrics_addr, state, self.shutdown.clone()));

        let index_jobs: Api<Job> = match self.config.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        {
            let index = self.job_index.clone();
            let config = kube::runtime::watcher::Config::default().labels(&self.job_selector);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = index.maintain(index_jobs, config) => {}
                    () = shutdown.cancelled() => {}
                }
            });
        }

        tokio::spawn(ready_when_synced(self.job_index.clone(), ready.clone(), self.shutdown.clone()));

        let mut watcher = {
            let ctx = self.context.clone();
            let config = self.config.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { watcher::run(evas, jobs, ctx, &config, shutdown).await })
        };
        info!("Eva Controller running");

        // Whichever side stops first takes the other down with it
        tokio::select! {
            result = &mut watcher => {
                self.shutdown.cancel();
                let other = server.await;
                joined(result, "Eva watcher").and(joined(other, "Metrics server"))
            }
            result = &mut server => {
                self.shutdown.cancel();
                let other = watcher.await;
                joined(result, "Metrics server").and(joined(other, "Eva watcher"))
            }
        }
    }
}

/// Flips `ready` once owned Jobs can be resolved from the index.
async fn ready_when_synced(index: OwnerIndex<Job>, ready: Arc<AtomicBool>, shutdown: CancellationToken) {
    tokio::select! {
        () = index.wait_synced() => {
            ready.store(true, Ordering::Relaxed);
            info!("Job index synced, reporting ready");
        }
        () = shutdown.cancelled() => {}
    }
}

fn joined(result: Result<Result<(), ControllerError>, JoinError>, task: &str) -> Result<(), ControllerError> {
    result.map_err(|e| ControllerError::Watch(format!("{} panicked: {}", task, e)))?
}
