//! Decides which target definition of a bundle applies to a cluster.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use snafu::{ResultExt, Snafu};

use crate::{
    crd::{Bundle, BundleResource, BundleTarget, PartitionSpec},
    kvp::Labels,
    manifest::Manifest,
    selector::{LabelSelectorExt, SelectorError},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// The labels of every cluster group a cluster belongs to, keyed by group name.
pub type ClusterGroupLabels = BTreeMap<String, Labels>;

#[derive(Debug, Eq, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("invalid cluster selector on {name:?}"))]
    InvalidClusterSelector { source: SelectorError, name: String },

    #[snafu(display("invalid cluster group selector on {name:?}"))]
    InvalidClusterGroupSelector { source: SelectorError, name: String },
}

/// The cluster criteria shared by target definitions and partitions.
///
/// Criteria only match if at least one of them is set. Every criterion which is set must be
/// satisfied. Both group criteria must be satisfied by the same cluster group.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterCriteria<'a> {
    /// Used to identify the criteria in errors.
    pub name: &'a str,
    pub cluster_name: Option<&'a str>,
    pub cluster_selector: Option<&'a LabelSelector>,
    pub cluster_group: Option<&'a str>,
    pub cluster_group_selector: Option<&'a LabelSelector>,
}

impl<'a> From<&'a BundleTarget> for ClusterCriteria<'a> {
    fn from(target: &'a BundleTarget) -> Self {
        Self {
            name: &target.name,
            cluster_name: non_empty(target.cluster_name.as_deref()),
            cluster_selector: target.cluster_selector.as_ref(),
            cluster_group: non_empty(target.cluster_group.as_deref()),
            cluster_group_selector: target.cluster_group_selector.as_ref(),
        }
    }
}

impl<'a> From<&'a PartitionSpec> for ClusterCriteria<'a> {
    fn from(partition: &'a PartitionSpec) -> Self {
        Self {
            name: &partition.name,
            cluster_name: non_empty(partition.cluster_name.as_deref()),
            cluster_selector: partition.cluster_selector.as_ref(),
            cluster_group: non_empty(partition.cluster_group.as_deref()),
            cluster_group_selector: partition.cluster_group_selector.as_ref(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

impl ClusterCriteria<'_> {
    pub fn is_empty(&self) -> bool {
        self.cluster_name.is_none()
            && self.cluster_selector.is_none()
            && self.cluster_group.is_none()
            && self.cluster_group_selector.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(selector) = self.cluster_selector {
            selector
                .validate()
                .context(InvalidClusterSelectorSnafu { name: self.name })?;
        }
        if let Some(selector) = self.cluster_group_selector {
            selector
                .validate()
                .context(InvalidClusterGroupSelectorSnafu { name: self.name })?;
        }
        Ok(())
    }

    pub fn matches(
        &self,
        cluster_name: &str,
        cluster_groups: &ClusterGroupLabels,
        cluster_labels: &Labels,
    ) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        if self.cluster_name.is_some_and(|name| name != cluster_name) {
            return Ok(false);
        }

        if let Some(selector) = self.cluster_selector {
            let matches = selector
                .matches(cluster_labels)
                .context(InvalidClusterSelectorSnafu { name: self.name })?;
            if !matches {
                return Ok(false);
            }
        }

        if self.cluster_group.is_none() && self.cluster_group_selector.is_none() {
            return Ok(true);
        }

        for (group_name, group_labels) in cluster_groups {
            if self.cluster_group.is_some_and(|name| name != group_name) {
                continue;
            }
            if let Some(selector) = self.cluster_group_selector {
                let matches = selector
                    .matches(group_labels)
                    .context(InvalidClusterGroupSelectorSnafu { name: self.name })?;
                if !matches {
                    continue;
                }
            }
            return Ok(true);
        }

        Ok(false)
    }
}

/// Matches clusters against the target definitions of one bundle.
#[derive(Debug)]
pub struct BundleMatcher<'a> {
    bundle: &'a Bundle,
    targets: Vec<(&'a BundleTarget, ClusterCriteria<'a>)>,
}

impl<'a> BundleMatcher<'a> {
    /// Validates all selectors of the bundle's target definitions up front, so a misconfigured
    /// bundle is rejected as a whole instead of matching some clusters.
    pub fn new(bundle: &'a Bundle) -> Result<Self> {
        let targets = bundle
            .spec
            .targets
            .iter()
            .map(|target| {
                let criteria = ClusterCriteria::from(target);
                criteria.validate().map(|()| (target, criteria))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { bundle, targets })
    }

    /// Returns the first target definition, in declaration order, which matches the cluster.
    ///
    /// [`None`] means the bundle is not deployed to the cluster.
    pub fn match_cluster(
        &self,
        cluster_name: &str,
        cluster_groups: &ClusterGroupLabels,
        cluster_labels: &Labels,
    ) -> Result<Option<BundleMatch<'a>>> {
        for (target, criteria) in &self.targets {
            if criteria.matches(cluster_name, cluster_groups, cluster_labels)? {
                return Ok(Some(BundleMatch {
                    bundle: self.bundle,
                    target,
                }));
            }
        }

        Ok(None)
    }
}

/// A target definition of a bundle which matched a cluster.
#[derive(Clone, Copy, Debug)]
pub struct BundleMatch<'a> {
    pub bundle: &'a Bundle,
    pub target: &'a BundleTarget,
}

impl BundleMatch<'_> {
    /// Returns the resources to deploy: the bundle resources with the overlays referenced by the
    /// target definition layered on top.
    ///
    /// Nested overlays are applied before the overlay referencing them. Every overlay is applied
    /// at most once. A resource of an overlay replaces an earlier resource with the same name.
    pub fn manifest(&self) -> Manifest {
        let mut resources = self.bundle.spec.resources.clone();
        let mut applied = BTreeSet::new();

        for overlay in &self.target.overlays {
            self.apply_overlay(overlay, &mut resources, &mut applied);
        }

        Manifest::new(resources)
    }

    fn apply_overlay<'b>(
        &'b self,
        name: &'b str,
        resources: &mut Vec<BundleResource>,
        applied: &mut BTreeSet<&'b str>,
    ) {
        if !applied.insert(name) {
            return;
        }
        let Some(overlay) = self
            .bundle
            .spec
            .overlays
            .iter()
            .find(|overlay| overlay.name == name)
        else {
            tracing::debug!(overlay = name, "ignoring reference to unknown overlay");
            return;
        };

        for nested in &overlay.overlays {
            self.apply_overlay(nested, resources, applied);
        }

        for resource in &overlay.resources {
            match resources
                .iter_mut()
                .find(|existing| existing.name == resource.name)
            {
                Some(existing) => existing.clone_from(resource),
                None => resources.push(resource.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn bundle(yaml: &str) -> Bundle {
        serde_yaml::from_str(yaml).expect("test YAML is valid")
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn targets_bundle() -> Bundle {
        bundle(indoc! {"
            apiVersion: fleet.cattle.io/v1alpha1
            kind: Bundle
            metadata:
              name: app
              namespace: fleet-default
            spec:
              targets:
              - name: by-name
                clusterName: special
              - name: prod
                clusterSelector:
                  matchLabels:
                    env: prod
              - name: eu-group
                clusterGroup: eu
                clusterGroupSelector:
                  matchLabels:
                    tier: gold
              - name: empty
        "})
    }

    #[test]
    fn first_matching_target_wins() {
        let bundle = targets_bundle();
        let matcher = BundleMatcher::new(&bundle).unwrap();

        let matched = matcher
            .match_cluster("special", &ClusterGroupLabels::new(), &labels(&[("env", "prod")]))
            .unwrap()
            .unwrap();
        assert_eq!(matched.target.name, "by-name");

        let matched = matcher
            .match_cluster("other", &ClusterGroupLabels::new(), &labels(&[("env", "prod")]))
            .unwrap()
            .unwrap();
        assert_eq!(matched.target.name, "prod");
    }

    #[test]
    fn group_criteria_must_hold_for_the_same_group() {
        let bundle = targets_bundle();
        let matcher = BundleMatcher::new(&bundle).unwrap();

        let split = ClusterGroupLabels::from([
            ("eu".to_string(), labels(&[("tier", "silver")])),
            ("us".to_string(), labels(&[("tier", "gold")])),
        ]);
        assert!(
            matcher
                .match_cluster("c1", &split, &Labels::new())
                .unwrap()
                .is_none()
        );

        let joined = ClusterGroupLabels::from([("eu".to_string(), labels(&[("tier", "gold")]))]);
        let matched = matcher
            .match_cluster("c1", &joined, &Labels::new())
            .unwrap()
            .unwrap();
        assert_eq!(matched.target.name, "eu-group");
    }

    #[test]
    fn target_without_criteria_matches_nothing() {
        let bundle = bundle(indoc! {"
            apiVersion: fleet.cattle.io/v1alpha1
            kind: Bundle
            metadata:
              name: app
            spec:
              targets:
              - name: empty
                clusterName: ''
        "});
        let matcher = BundleMatcher::new(&bundle).unwrap();

        assert!(
            matcher
                .match_cluster("", &ClusterGroupLabels::new(), &Labels::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn invalid_target_selector_rejects_bundle() {
        let bundle = bundle(indoc! {"
            apiVersion: fleet.cattle.io/v1alpha1
            kind: Bundle
            metadata:
              name: app
            spec:
              targets:
              - name: broken
                clusterSelector:
                  matchExpressions:
                  - key: env
                    operator: In
        "});

        let err = BundleMatcher::new(&bundle).unwrap_err();
        assert!(matches!(err, Error::InvalidClusterSelector { ref name, .. } if name == "broken"));
    }

    #[test]
    fn overlays_are_layered_on_top_of_resources() {
        let bundle = bundle(indoc! {"
            apiVersion: fleet.cattle.io/v1alpha1
            kind: Bundle
            metadata:
              name: app
            spec:
              resources:
              - name: deployment.yaml
                content: replicas-1
              - name: service.yaml
                content: service
              overlays:
              - name: prod
                overlays: [base-prod, prod]
                resources:
                - name: deployment.yaml
                  content: replicas-3
              - name: base-prod
                resources:
                - name: deployment.yaml
                  content: replicas-2
                - name: monitor.yaml
                  content: monitor
              targets:
              - name: prod
                clusterName: c1
                overlays: [prod, missing]
        "});
        let matcher = BundleMatcher::new(&bundle).unwrap();
        let matched = matcher
            .match_cluster("c1", &ClusterGroupLabels::new(), &Labels::new())
            .unwrap()
            .unwrap();

        let resources: Vec<_> = matched
            .manifest()
            .resources
            .into_iter()
            .map(|resource| (resource.name, resource.content))
            .collect();
        assert_eq!(
            resources,
            vec![
                ("deployment.yaml".to_string(), "replicas-3".to_string()),
                ("service.yaml".to_string(), "service".to_string()),
                ("monitor.yaml".to_string(), "monitor".to_string()),
            ]
        );
    }
}
