//! Controller configuration
//!
//! Loaded once at startup from environment variables. Invalid values fail
//! startup with `ControllerError::InvalidConfig`.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default finalizer attached to every Eva
pub const DEFAULT_FINALIZER: &str = "geofront.nerv.com/finalizer";

/// Default key the Job owner index is registered under
pub const DEFAULT_OWNER_INDEX_KEY: &str = ".metadata.controller";

/// How a failure to list pods is resolved while observing image pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImagePullObservationPolicy {
    /// Assume no image pull failure
    #[default]
    FailOpen,
    /// Treat the failure as an image pull failure
    FailClosed,
}

impl FromStr for ImagePullObservationPolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-open" | "failopen" => Ok(Self::FailOpen),
            "fail-closed" | "failclosed" => Ok(Self::FailClosed),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown image pull observation policy '{}', expected fail-open or fail-closed",
                other
            ))),
        }
    }
}

/// Values injected into the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Finalizer name guarding Eva deletion
    pub finalizer: String,
    /// Key the Job owner index is registered under
    pub owner_index_key: String,
    /// Kind expected on the Job's controller owner reference
    pub owner_kind: String,
    pub image_pull_policy: ImagePullObservationPolicy,
    /// `backoffLimit` stamped on created Jobs
    pub job_backoff_limit: i32,
    /// `ttlSecondsAfterFinished` stamped on created Jobs, if any
    ///
    /// Once the TTL expires Kubernetes deletes the finished Job, and the
    /// next pass over its Eva finds no Job: a Succeeded or Failed Eva is
    /// then reported as Failed with reason `JobMissing`. Leave unset unless
    /// that is acceptable.
    pub job_ttl_seconds: Option<i32>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            finalizer: DEFAULT_FINALIZER.to_string(),
            owner_index_key: DEFAULT_OWNER_INDEX_KEY.to_string(),
            owner_kind: "Eva".to_string(),
            image_pull_policy: ImagePullObservationPolicy::default(),
            job_backoff_limit: 0,
            job_ttl_seconds: None,
        }
    }
}

/// Process-wide configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
    /// Maximum concurrent reconciles
    pub concurrency: u16,
    /// Quiet period after the last event before reconciling
    pub debounce: Duration,
    /// Bind address of the metrics and probe server
    pub metrics_addr: SocketAddr,
    pub reconciler: ReconcilerConfig,
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of a variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let finalizer = var("EVA_FINALIZER").unwrap_or_else(|| DEFAULT_FINALIZER.to_string());
        let owner_index_key =
            var("EVA_OWNER_INDEX_KEY").unwrap_or_else(|| DEFAULT_OWNER_INDEX_KEY.to_string());
        let image_pull_policy = match var("EVA_IMAGE_PULL_POLICY") {
            Some(raw) => raw.parse()?,
            None => ImagePullObservationPolicy::default(),
        };
        let job_backoff_limit: i32 = parse_var(&var, "EVA_JOB_BACKOFF_LIMIT")?.unwrap_or(0);
        if job_backoff_limit < 0 {
            return Err(ControllerError::InvalidConfig(
                "EVA_JOB_BACKOFF_LIMIT must not be negative".to_string(),
            ));
        }
        let job_ttl_seconds: Option<i32> = parse_var(&var, "EVA_JOB_TTL_SECONDS")?;
        if job_ttl_seconds.is_some_and(|ttl| ttl < 0) {
            return Err(ControllerError::InvalidConfig(
                "EVA_JOB_TTL_SECONDS must not be negative".to_string(),
            ));
        }

        let concurrency: u16 = parse_var(&var, "EVA_CONCURRENCY")?.unwrap_or(3);
        let debounce = Duration::from_secs(parse_var::<u64>(&var, "EVA_DEBOUNCE_SECONDS")?.unwrap_or(1));
        let metrics_addr: SocketAddr = parse_var(&var, "METRICS_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        Ok(Self {
            namespace: var("WATCH_NAMESPACE"),
            concurrency,
            debounce,
            metrics_addr,
            reconciler: ReconcilerConfig {
                finalizer,
                owner_index_key,
                owner_kind: "Eva".to_string(),
                image_pull_policy,
                job_backoff_limit,
                job_ttl_seconds,
            },
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| ControllerError::InvalidConfig(format!("{}={}: {}", key, raw, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.namespace, None);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.debounce, Duration::from_secs(1));
        assert_eq!(config.metrics_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.reconciler, ReconcilerConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WATCH_NAMESPACE", "nerv"),
            ("EVA_FINALIZER", "example.com/cleanup"),
            ("EVA_IMAGE_PULL_POLICY", "fail-closed"),
            ("EVA_JOB_TTL_SECONDS", "600"),
            ("EVA_JOB_BACKOFF_LIMIT", "2"),
            ("EVA_CONCURRENCY", "8"),
            ("METRICS_ADDR", "127.0.0.1:9090"),
        ])
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("nerv"));
        assert_eq!(config.reconciler.finalizer, "example.com/cleanup");
        assert_eq!(config.reconciler.image_pull_policy, ImagePullObservationPolicy::FailClosed);
        assert_eq!(config.reconciler.job_ttl_seconds, Some(600));
        assert_eq!(config.reconciler.job_backoff_limit, 2);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.metrics_addr, "127.0.0.1:9090".parse().unwrap());
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("WATCH_NAMESPACE", ""), ("EVA_FINALIZER", "  ")]).unwrap();
        assert_eq!(config.namespace, None);
        assert_eq!(config.reconciler.finalizer, DEFAULT_FINALIZER);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let err = load(&[("EVA_IMAGE_PULL_POLICY", "sometimes")]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = load(&[("EVA_CONCURRENCY", "lots")]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let err = load(&[("EVA_JOB_TTL_SECONDS", "-5")]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}
