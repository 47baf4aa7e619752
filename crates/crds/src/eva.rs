//! Eva CRD
//!
//! Declares a containerised workload that the controller runs to completion
//! as a single owned batch Job.

use crate::conditions::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "geofront.nerv.com",
    version = "v1alpha1",
    kind = "Eva",
    namespaced,
    status = "EvaStatus",
    shortname = "eva",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EvaSpec {
    /// Container image to run
    pub image: String,

    /// Command to run in the container (image entrypoint when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Name of a secret used to pull the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaStatus {
    /// Lifecycle phase of the Eva
    #[serde(default)]
    pub phase: EvaPhase,

    /// Latest observations, keyed by condition type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation of the spec last reconciled
    #[serde(default)]
    pub observed_generation: i64,
}

/// Eva lifecycle phase
///
/// Serializes as PascalCase ("Pending", "Running", etc.). The unset phase
/// serializes as the empty string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum EvaPhase {
    /// Never reconciled
    #[default]
    #[serde(rename = "")]
    Unset,

    /// Job requested, not yet observed
    Pending,

    /// Job exists and is making progress
    Running,

    /// Job completed successfully
    Succeeded,

    /// Job failed, went missing or could not pull its image
    Failed,
}

impl EvaPhase {
    /// Returns the wire representation of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaPhase::Unset => "",
            EvaPhase::Pending => "Pending",
            EvaPhase::Running => "Running",
            EvaPhase::Succeeded => "Succeeded",
            EvaPhase::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for EvaPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition types published on an Eva.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaConditionType {
    /// The workload's Job has been observed in a healthy or completed state
    Available,
}

impl EvaConditionType {
    /// Returns the condition type string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaConditionType::Available => "Available",
        }
    }
}
