//! Geofront CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Eva controller.

pub mod conditions;
pub mod eva;

pub use conditions::*;
pub use eva::*;

/// API group shared by all Geofront custom resources.
pub const API_GROUP: &str = "geofront.nerv.com";
