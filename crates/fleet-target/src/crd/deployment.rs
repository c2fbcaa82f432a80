use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::GenericCondition;

/// Options controlling how the manifests of a bundle are deployed to a cluster.
///
/// The same type is used for the bundle-wide defaults and for the overrides of a single
/// [`BundleTarget`](crate::crd::BundleTarget). Unset fields of an override fall back to the
/// bundle-wide defaults, see [`crate::options::calculate`].
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentOptions {
    /// Namespace used for namespaced resources which do not specify one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    /// Forces all namespaced resources into this namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Service account used on the downstream cluster to apply the manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    #[serde(default, skip_serializing_if = "KustomizeOptions::is_empty")]
    pub kustomize: KustomizeOptions,

    #[serde(default, skip_serializing_if = "HelmOptions::is_empty")]
    pub helm: HelmOptions,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeOptions {
    /// Directory containing the `kustomization.yaml` to render.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl KustomizeOptions {
    pub fn is_empty(&self) -> bool {
        self.dir.is_none()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,

    /// Values passed to the chart. Nested objects are merged key by key.
    #[serde(default, skip_serializing_if = "GenericMap::is_empty")]
    pub values: GenericMap,
}

impl HelmOptions {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// An arbitrary JSON object, e.g. Helm values.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GenericMap(pub serde_json::Map<String, serde_json::Value>);

impl GenericMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for GenericMap {
    fn from(value: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(value)
    }
}

/// The durable record of what has been staged and applied for one (bundle, cluster) pair.
///
/// Bundle deployments are owned by the apply layer. The target resolver only reads them.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "BundleDeployment",
    plural = "bundledeployments",
    status = "BundleDeploymentStatus",
    namespaced
)]
#[kube(derive = "Default", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentSpec {
    /// Identity of the content staged for the next apply.
    #[serde(default, rename = "stagedDeploymentID")]
    pub staged_deployment_id: String,

    #[serde(default)]
    pub staged_options: BundleDeploymentOptions,

    /// Identity of the content the agent is asked to apply.
    #[serde(default, rename = "deploymentID")]
    pub deployment_id: String,

    #[serde(default)]
    pub options: BundleDeploymentOptions,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentStatus {
    /// Identity of the content the agent last applied successfully.
    #[serde(default, rename = "appliedDeploymentID")]
    pub applied_deployment_id: String,

    #[serde(default)]
    pub ready: bool,

    /// Whether the applied resources are unmodified since they were applied.
    #[serde(default)]
    pub non_modified: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<GenericCondition>,
}

impl BundleDeployment {
    /// Returns the identity last applied by the agent, or an empty string if nothing has been
    /// reported yet.
    pub fn applied_deployment_id(&self) -> &str {
        self.status
            .as_ref()
            .map_or("", |status| status.applied_deployment_id.as_str())
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.ready)
    }

    pub fn is_non_modified(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.non_modified)
    }

    /// Looks up a condition of the given type in the reported status.
    pub fn condition(&self, type_: &str) -> Option<&GenericCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|condition| condition.type_ == type_)
    }
}
