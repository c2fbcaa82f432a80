use k8s_openapi::apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{BundleDeploymentOptions, GenericCondition};

/// A named set of manifests together with the rules deciding which clusters receive them.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "Bundle",
    plural = "bundles",
    status = "BundleStatus",
    namespaced
)]
#[kube(derive = "Default", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Bundle-wide deployment options. Target definitions can override each field.
    #[serde(flatten)]
    pub options: BundleDeploymentOptions,

    /// Stops new deployments of this bundle from being rolled out to any cluster.
    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_strategy: Option<RolloutStrategy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<BundleResource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<BundleOverlay>,

    /// Target definitions in declaration order. The first definition matching a cluster wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<BundleTarget>,
}

impl BundleSpec {
    /// Names every unnamed target definition `target000`, `target001`, ... after its position.
    pub fn default_target_names(&mut self) {
        for (index, target) in self.targets.iter_mut().enumerate() {
            if target.name.is_empty() {
                target.name = format!("target{index:03}");
            }
        }
    }
}

/// A single manifest file of a bundle.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Encoding of `content`, e.g. `base64+gz`. Plain text if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// A named set of resources which target definitions can layer on top of the bundle resources.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOverlay {
    pub name: String,

    /// Further overlays applied before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<BundleResource>,
}

/// A rule selecting clusters, plus the option overrides applied to the clusters it selects.
///
/// A definition only matches if it declares at least one criterion and all declared criteria
/// are satisfied.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    #[serde(flatten)]
    pub options: BundleDeploymentOptions,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group_selector: Option<LabelSelector>,

    /// Names of [`BundleOverlay`]s layered on top of the bundle resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<String>,
}

/// Budgets limiting how far a rollout may proceed while clusters are unavailable.
///
/// Each budget is either an absolute count or a percentage string such as `"10%"`.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
    /// Defaults to `10%` of the targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Defaults to `0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_partitions: Option<IntOrString>,

    /// Defaults to `25%` of the targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_partition_size: Option<IntOrString>,

    /// Explicit partitions. If empty, targets are partitioned automatically.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionSpec>,
}

/// An explicitly declared partition. Cluster criteria follow the rules of [`BundleTarget`].
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Falls back to the rollout-wide `maxUnavailable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group_selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    #[serde(default)]
    pub summary: BundleSummary,

    #[serde(default)]
    pub unavailable: i32,

    #[serde(default)]
    pub unavailable_partitions: i32,

    #[serde(default)]
    pub max_unavailable: i32,

    #[serde(default)]
    pub max_unavailable_partitions: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<GenericCondition>,
}

/// Observed state of one partition of a rollout.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStatus {
    pub name: String,

    /// Number of targets in the partition.
    #[serde(default)]
    pub count: i32,

    #[serde(default)]
    pub max_unavailable: i32,

    /// Number of targets which are unavailable or not up to date.
    #[serde(default)]
    pub unavailable: i32,

    #[serde(default)]
    pub summary: BundleSummary,
}

/// Aggregated state of all targets of a bundle (or of one partition).
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    #[serde(default)]
    pub not_ready: i32,

    #[serde(default)]
    pub wait_applied: i32,

    #[serde(default)]
    pub err_applied: i32,

    #[serde(default)]
    pub out_of_sync: i32,

    #[serde(default)]
    pub modified: i32,

    #[serde(default)]
    pub ready: i32,

    #[serde(default)]
    pub pending: i32,

    #[serde(default)]
    pub desired_ready: i32,

    /// The first non-ready targets, capped at [`crate::summary::MAX_NON_READY_RESOURCES`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_ready_resources: Vec<NonReadyResource>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonReadyResource {
    /// `namespace/name` of the cluster.
    pub name: String,

    pub state: BundleState,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Lifecycle state of a bundle on one cluster. Derived on every resolution pass and never
/// stored as a transition history.
//
// Please note that the variant names are part of the status API and must not be renamed.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize, strum::Display,
)]
pub enum BundleState {
    Ready,
    NotReady,
    WaitApplied,
    ErrApplied,
    OutOfSync,
    Modified,
    /// No bundle deployment has been recorded for the cluster yet.
    #[default]
    Pending,
}
