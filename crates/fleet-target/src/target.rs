//! Resolves the clusters a bundle is deployed to.
//!
//! The [`Manager`] reads clusters, cluster groups and bundle deployments from the caches it was
//! constructed with. For every cluster matched by a target definition of the bundle, it computes
//! a [`Target`] carrying the effective options and the deployment identity.

use std::{borrow::Borrow, collections::BTreeMap, sync::Arc};

use kube::{ResourceExt, api::ObjectMeta};
use snafu::{ResultExt, Snafu};

use crate::{
    cache::{ObjectCache, ReadError},
    crd::{
        Bundle, BundleDeployment, BundleDeploymentOptions, BundleState, BundleTarget, Cluster,
        ClusterGroup,
    },
    kvp::{BUNDLE_NAME_KEY, BUNDLE_NAMESPACE_KEY, Labels},
    manifest::{ContentStore, StoreError},
    matcher::{self, BundleMatcher, ClusterGroupLabels},
    options,
    selector::LabelSelectorExt,
    summary,
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// A cache shared between the [`Manager`] and whoever keeps it up to date.
pub type SharedCache<K> = Arc<dyn ObjectCache<K> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid target definitions in bundle {bundle:?}"))]
    BuildMatcher {
        source: matcher::Error,
        bundle: String,
    },

    #[snafu(display("failed to list clusters"))]
    ListClusters { source: ReadError },

    #[snafu(display("failed to list cluster groups"))]
    ListClusterGroups { source: ReadError },

    #[snafu(display("failed to list bundles"))]
    ListBundles { source: ReadError },

    #[snafu(display("failed to list bundle deployments"))]
    ListBundleDeployments { source: ReadError },

    #[snafu(display("failed to match cluster {cluster:?} against target definitions"))]
    MatchCluster {
        source: matcher::Error,
        cluster: String,
    },

    #[snafu(display("failed to compute deployment identity for cluster {cluster:?}"))]
    DeploymentId {
        source: options::Error,
        cluster: String,
    },

    #[snafu(display("failed to store manifest for cluster {cluster:?}"))]
    StoreManifest { source: StoreError, cluster: String },
}

/// Resolves bundles against the fleet of registered clusters.
pub struct Manager {
    clusters: SharedCache<Cluster>,
    cluster_groups: SharedCache<ClusterGroup>,
    bundles: SharedCache<Bundle>,
    bundle_deployments: SharedCache<BundleDeployment>,
    content_store: Arc<dyn ContentStore + Send + Sync>,
}

impl Manager {
    pub fn new(
        clusters: SharedCache<Cluster>,
        cluster_groups: SharedCache<ClusterGroup>,
        bundles: SharedCache<Bundle>,
        bundle_deployments: SharedCache<BundleDeployment>,
        content_store: Arc<dyn ContentStore + Send + Sync>,
    ) -> Self {
        Self {
            clusters,
            cluster_groups,
            bundles,
            bundle_deployments,
            content_store,
        }
    }

    /// Returns all cluster groups in the namespace of the cluster whose selector matches the
    /// cluster's labels, ordered by name.
    ///
    /// Groups without a selector never match. A group with an invalid selector is logged and
    /// skipped, so a single misconfigured group does not block the whole fleet.
    pub fn cluster_groups_for_cluster(&self, cluster: &Cluster) -> Result<Vec<Arc<ClusterGroup>>> {
        let namespace = cluster.namespace().unwrap_or_default();
        let cluster_groups = self
            .cluster_groups
            .list(Some(&namespace), &Labels::new())
            .context(ListClusterGroupsSnafu)?;

        let mut result = Vec::new();
        for cluster_group in cluster_groups {
            let Some(selector) = &cluster_group.spec.selector else {
                continue;
            };

            match selector.matches(cluster.labels()) {
                Ok(true) => result.push(cluster_group),
                Ok(false) => {}
                Err(err) => tracing::error!(
                    cluster_group.namespace = namespace,
                    cluster_group.name = cluster_group.name_any(),
                    error = &err as &dyn std::error::Error,
                    "Ignoring cluster group with invalid selector"
                ),
            }
        }

        result.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(result)
    }

    /// Returns all bundles in the namespace of the cluster which target the cluster.
    ///
    /// Bundles with invalid target definitions are logged and skipped.
    pub fn bundles_for_cluster(&self, cluster: &Cluster) -> Result<Vec<Arc<Bundle>>> {
        let namespace = cluster.namespace().unwrap_or_default();
        let bundles = self
            .bundles
            .list(Some(&namespace), &Labels::new())
            .context(ListBundlesSnafu)?;

        let cluster_name = cluster.name_any();
        let group_labels = cluster_groups_to_label_map(&self.cluster_groups_for_cluster(cluster)?);

        let mut result = Vec::new();
        for bundle in bundles {
            let matches = BundleMatcher::new(&bundle).and_then(|matcher| {
                matcher
                    .match_cluster(&cluster_name, &group_labels, cluster.labels())
                    .map(|matched| matched.is_some())
            });

            match matches {
                Ok(true) => result.push(bundle),
                Ok(false) => {}
                Err(err) => tracing::error!(
                    bundle.namespace = namespace,
                    bundle.name = bundle.name_any(),
                    error = &err as &dyn std::error::Error,
                    "Ignoring bad bundle"
                ),
            }
        }

        Ok(result)
    }

    /// Computes one [`Target`] per cluster in the bundle's namespace which is matched by a target
    /// definition of the bundle, ordered by cluster name.
    ///
    /// Existing bundle deployments are attached to the targets. Any error aborts the whole
    /// resolution, no partial result is returned.
    #[tracing::instrument(skip_all, fields(bundle.namespace = bundle.namespace(), bundle.name = bundle.name_any()))]
    pub fn targets(&self, bundle: &Arc<Bundle>) -> Result<Vec<Target>> {
        let matcher = BundleMatcher::new(bundle).context(BuildMatcherSnafu {
            bundle: bundle.name_any(),
        })?;

        let namespace = bundle.namespace().unwrap_or_default();
        let clusters = self
            .clusters
            .list(Some(&namespace), &Labels::new())
            .context(ListClustersSnafu)?;

        let mut targets = Vec::new();
        for cluster in clusters {
            let cluster_name = cluster.name_any();
            let cluster_groups = self.cluster_groups_for_cluster(&cluster)?;

            let matched = matcher
                .match_cluster(
                    &cluster_name,
                    &cluster_groups_to_label_map(&cluster_groups),
                    cluster.labels(),
                )
                .context(MatchClusterSnafu {
                    cluster: &cluster_name,
                })?;
            let Some(matched) = matched else {
                tracing::debug!(cluster.name = cluster_name, "No target definition matches");
                continue;
            };

            let manifest = matched.manifest();
            let options = options::calculate(&bundle.spec, matched.target);
            let deployment_id =
                options::deployment_id(&manifest, &options).context(DeploymentIdSnafu {
                    cluster: &cluster_name,
                })?;

            self.content_store
                .store(&manifest)
                .context(StoreManifestSnafu {
                    cluster: &cluster_name,
                })?;

            tracing::debug!(
                cluster.name = cluster_name,
                target = matched.target.name,
                deployment_id,
                "Cluster matched"
            );

            targets.push(Target {
                deployment: None,
                cluster_groups,
                cluster,
                bundle: Arc::clone(bundle),
                target: matched.target.clone(),
                options,
                deployment_id,
            });
        }

        targets.sort_by(|a, b| a.cluster.metadata.name.cmp(&b.cluster.metadata.name));

        self.fold_in_deployments(bundle, &mut targets)?;
        Ok(targets)
    }

    /// Attaches a copy of the recorded bundle deployment to every target whose cluster status
    /// namespace contains one.
    fn fold_in_deployments(&self, bundle: &Bundle, targets: &mut [Target]) -> Result<()> {
        let bundle_deployments = self
            .bundle_deployments
            .list(None, &deployment_labels(bundle))
            .context(ListBundleDeploymentsSnafu)?;

        let by_namespace: BTreeMap<String, Arc<BundleDeployment>> = bundle_deployments
            .into_iter()
            .map(|bundle_deployment| {
                let namespace = bundle_deployment.namespace().unwrap_or_default();
                (namespace, bundle_deployment)
            })
            .collect();

        for target in targets {
            target.deployment = target
                .cluster
                .status_namespace()
                .and_then(|namespace| by_namespace.get(namespace))
                .map(|bundle_deployment| bundle_deployment.as_ref().clone());
        }

        Ok(())
    }
}

/// Maps each cluster group name to the labels of the group.
pub fn cluster_groups_to_label_map(cluster_groups: &[Arc<ClusterGroup>]) -> ClusterGroupLabels {
    cluster_groups
        .iter()
        .map(|cluster_group| (cluster_group.name_any(), cluster_group.labels().clone()))
        .collect()
}

/// Returns the labels identifying the bundle deployments created for `bundle`.
pub fn deployment_labels(bundle: &Bundle) -> Labels {
    Labels::from([
        (BUNDLE_NAME_KEY.to_string(), bundle.name_any()),
        (
            BUNDLE_NAMESPACE_KEY.to_string(),
            bundle.namespace().unwrap_or_default(),
        ),
    ])
}

/// Returns the `(namespace, name)` of the bundle a bundle deployment was created for, as recorded
/// in its labels.
pub fn bundle_from_deployment(bundle_deployment: &BundleDeployment) -> Option<(&str, &str)> {
    let labels = bundle_deployment.labels();
    Some((
        labels.get(BUNDLE_NAMESPACE_KEY)?.as_str(),
        labels.get(BUNDLE_NAME_KEY)?.as_str(),
    ))
}

/// Lets functions accept both owned targets and references to them.
pub(crate) fn as_target<T: Borrow<Target>>(target: &T) -> &Target {
    Borrow::borrow(target)
}

/// The planned deployment of one bundle to one cluster.
///
/// Targets are computed fresh on every resolution pass and never persisted.
#[derive(Clone, Debug)]
pub struct Target {
    /// The bundle deployment recorded for this cluster, if any.
    pub deployment: Option<BundleDeployment>,
    pub cluster_groups: Vec<Arc<ClusterGroup>>,
    pub cluster: Arc<Cluster>,
    pub bundle: Arc<Bundle>,
    /// The target definition which matched the cluster.
    pub target: BundleTarget,
    pub options: BundleDeploymentOptions,
    pub deployment_id: String,
}

impl Target {
    pub fn is_paused(&self) -> bool {
        self.cluster.spec.paused || self.bundle.spec.paused
    }

    /// Replaces the attached deployment with a fresh, empty record for this cluster.
    pub fn assign_new_deployment(&mut self) {
        self.deployment = Some(BundleDeployment {
            metadata: ObjectMeta {
                name: Some(self.bundle.name_any()),
                namespace: self.cluster.status_namespace().map(str::to_string),
                labels: Some(deployment_labels(&self.bundle)),
                ..ObjectMeta::default()
            },
            ..BundleDeployment::default()
        });
    }

    pub fn state(&self) -> BundleState {
        summary::deployment_state(self.deployment.as_ref())
    }

    pub fn message(&self) -> String {
        summary::message_from_deployment(self.deployment.as_ref())
    }

    /// `namespace/name` of the cluster, used to identify the target in summaries.
    pub fn cluster_key(&self) -> String {
        format!(
            "{}/{}",
            self.cluster.namespace().unwrap_or_default(),
            self.cluster.name_any()
        )
    }
}
