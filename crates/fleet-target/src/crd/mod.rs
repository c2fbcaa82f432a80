//! Custom resources of the `fleet.cattle.io/v1alpha1` API group which are read by the target
//! resolver.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod bundle;
mod cluster;
mod deployment;

pub use bundle::*;
pub use cluster::*;
pub use deployment::*;

/// The API group all resources in this module belong to.
pub const GROUP: &str = "fleet.cattle.io";

/// Condition status value signalling that a condition does not hold.
pub const CONDITION_STATUS_FALSE: &str = "False";

/// A condition as reported by the agent running on a downstream cluster.
///
/// Unlike [`k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition`], none of the fields
/// besides `type` and `status` are mandatory.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericCondition {
    /// Type of the condition, e.g. `Deployed` or `Monitored`.
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition, one of `True`, `False` or `Unknown`.
    pub status: String,

    /// Machine-readable reason for the last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable details about the condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}
