//! Job builder
//!
//! A Job is built from a base template and an ordered list of declarative
//! options. Later options win over earlier ones; none of them can fail.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, LocalObjectReference, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// A single declarative setter applied to a Job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOption {
    /// Container image
    Image(String),
    /// Container command, ignored when empty
    Command(Vec<String>),
    ContainerName(String),
    /// Labels merged into both the Job and its pod template
    Labels(BTreeMap<String, String>),
    /// Image pull secret name, ignored when empty
    ImagePullSecret(String),
    BackoffLimit(i32),
    TtlSecondsAfterFinished(i32),
}

impl JobOption {
    fn apply(self, job: &mut Job) {
        match self {
            JobOption::Image(image) => container_mut(job).image = Some(image),
            JobOption::Command(command) => {
                if !command.is_empty() {
                    container_mut(job).command = Some(command);
                }
            }
            JobOption::ContainerName(name) => container_mut(job).name = name,
            JobOption::Labels(labels) => {
                job.metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(labels.clone());
                template_mut(job)
                    .metadata
                    .get_or_insert_with(ObjectMeta::default)
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(labels);
            }
            JobOption::ImagePullSecret(secret) => {
                if !secret.is_empty() {
                    pod_spec_mut(job).image_pull_secrets = Some(vec![LocalObjectReference { name: secret }]);
                }
            }
            JobOption::BackoffLimit(limit) => job_spec_mut(job).backoff_limit = Some(limit),
            JobOption::TtlSecondsAfterFinished(ttl) => {
                job_spec_mut(job).ttl_seconds_after_finished = Some(ttl);
            }
        }
    }
}

/// Base template: one unnamed container, `restartPolicy: Never`, empty labels.
pub fn base_job(name: &str, namespace: &str) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::new()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::new()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container::default()],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build a Job named `name` in `namespace`, applying `options` in order.
pub fn build_job(name: &str, namespace: &str, options: impl IntoIterator<Item = JobOption>) -> Job {
    let mut job = base_job(name, namespace);
    for option in options {
        option.apply(&mut job);
    }
    job
}

fn job_spec_mut(job: &mut Job) -> &mut JobSpec {
    job.spec.get_or_insert_with(JobSpec::default)
}

fn template_mut(job: &mut Job) -> &mut PodTemplateSpec {
    &mut job_spec_mut(job).template
}

fn pod_spec_mut(job: &mut Job) -> &mut PodSpec {
    template_mut(job).spec.get_or_insert_with(PodSpec::default)
}

fn container_mut(job: &mut Job) -> &mut Container {
    let containers = &mut pod_spec_mut(job).containers;
    if containers.is_empty() {
        containers.push(Container::default());
    }
    &mut containers[0]
}
