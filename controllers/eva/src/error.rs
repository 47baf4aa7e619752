//! Controller-specific error types.
//!
//! This module defines error types specific to the Eva Controller
//! that are not covered by upstream library errors.

use cluster_store::StoreError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Eva Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes client error (startup and watch setup)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object lacks metadata needed to reconcile it
    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    /// Reconciliation aborted by the cancellation token
    #[error("Reconciliation cancelled")]
    Cancelled,

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics/probe server failed
    #[error("Server error: {0}")]
    Server(String),
}

impl ControllerError {
    /// Returns true if the error is a store not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Store(e) if e.is_not_found())
    }

    /// Returns true if a write lost an optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Store(e) if e.is_conflict())
    }

    /// Short label used for the reconcile outcome metric
    pub fn metric_label(&self) -> &'static str {
        match self {
            ControllerError::Store(StoreError::Conflict(_)) => "conflict",
            ControllerError::Store(_) | ControllerError::Kube(_) => "store_error",
            ControllerError::Cancelled => "cancelled",
            _ => "error",
        }
    }
}
