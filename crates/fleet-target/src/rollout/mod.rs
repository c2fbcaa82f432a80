//! Rollout gating.
//!
//! Budgets are [`IntOrString`]s: either an absolute number of targets or a percentage string
//! such as `"10%"`. [`limit`] turns a budget into an absolute number for a given population.

use std::borrow::Borrow;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    crd::{BundleDeployment, BundleStatus, PartitionStatus, RolloutStrategy},
    summary,
    target::{Target, as_target},
};

mod partition;

pub use partition::*;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Used for `maxUnavailable` if the rollout strategy does not set it.
pub const DEFAULT_MAX_UNAVAILABLE: &str = "10%";

/// Used for `maxUnavailablePartitions` if the rollout strategy does not set it.
pub const DEFAULT_MAX_UNAVAILABLE_PARTITIONS: i32 = 0;

/// Used for `autoPartitionSize` if the rollout strategy does not set it.
pub const DEFAULT_AUTO_PARTITION_SIZE: &str = "25%";

#[derive(Debug, Eq, PartialEq, Snafu)]
pub enum LimitError {
    #[snafu(display("invalid budget {value:?}, must be an integer or a percentage ending with %"))]
    MissingPercentSuffix { value: String },

    #[snafu(display("invalid percentage in budget {value:?}"))]
    ParsePercentage {
        source: std::num::ParseFloatError,
        value: String,
    },
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to compute maxUnavailable"))]
    MaxUnavailable { source: LimitError },

    #[snafu(display("failed to compute maxUnavailablePartitions"))]
    MaxUnavailablePartitions { source: LimitError },

    #[snafu(display("failed to partition targets"))]
    Partition { source: partition::Error },
}

/// Turns the first budget which is set into an absolute count for a population of `count`.
///
/// Falls back to [`DEFAULT_MAX_UNAVAILABLE`] if no budget is set. An empty population always
/// yields 1. Integer budgets are returned as they are, even if they are zero or negative. A
/// percentage is applied as `trunc(count * percent) / 100` and never yields less than 1.
pub fn limit(count: usize, budgets: &[Option<&IntOrString>]) -> Result<i32, LimitError> {
    if count == 0 {
        return Ok(1);
    }

    let default = IntOrString::String(DEFAULT_MAX_UNAVAILABLE.to_string());
    let budget = budgets.iter().flatten().next().copied().unwrap_or(&default);

    let value = match budget {
        IntOrString::Int(value) => return Ok(*value),
        IntOrString::String(value) => value,
    };

    let numeral = value
        .strip_suffix('%')
        .context(MissingPercentSuffixSnafu { value })?;
    let percent: f64 = numeral.parse().context(ParsePercentageSnafu { value })?;
    if percent <= 0.0 {
        return Ok(1);
    }

    // The truncation happens before the division, e.g. 3 * 50% = trunc(150.0) / 100 = 1
    let limit = (count as f64 * percent) as i64 / 100;
    if limit <= 0 {
        return Ok(1);
    }
    Ok(i32::try_from(limit).unwrap_or(i32::MAX))
}

/// All targets of a resolution pass belong to the same bundle, so the first one carries the
/// rollout strategy for all of them.
fn rollout_strategy<T: Borrow<Target>>(targets: &[T]) -> Option<&RolloutStrategy> {
    as_target(targets.first()?)
        .bundle
        .spec
        .rollout_strategy
        .as_ref()
}

pub(crate) fn saturating_count(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

/// The number of targets which may be unavailable at the same time.
pub fn max_unavailable<T: Borrow<Target>>(targets: &[T]) -> Result<i32, LimitError> {
    let budget = rollout_strategy(targets).and_then(|rollout| rollout.max_unavailable.as_ref());
    limit(targets.len(), &[budget])
}

/// The number of partitions which may be unavailable at the same time.
pub fn max_unavailable_partitions<T: Borrow<Target>>(
    partitions: &[Partition<'_>],
    targets: &[T],
) -> Result<i32, LimitError> {
    let default = IntOrString::Int(DEFAULT_MAX_UNAVAILABLE_PARTITIONS);
    let budget = rollout_strategy(targets)
        .and_then(|rollout| rollout.max_unavailable_partitions.as_ref());
    limit(partitions.len(), &[budget, Some(&default)])
}

/// Whether a recorded deployment is unavailable: the agent has not applied the requested
/// content yet, or the applied content is not ready.
///
/// A missing deployment is pending, not unavailable.
pub fn is_unavailable(deployment: Option<&BundleDeployment>) -> bool {
    deployment.is_some_and(|deployment| {
        deployment.applied_deployment_id() != deployment.spec.deployment_id
            || !deployment.is_ready()
    })
}

/// Whether the staged, requested and applied identities of the target's deployment all equal
/// the freshly computed deployment identity.
pub fn up_to_date(target: &Target) -> bool {
    target.deployment.as_ref().is_some_and(|deployment| {
        deployment.spec.staged_deployment_id == target.deployment_id
            && deployment.spec.deployment_id == target.deployment_id
            && deployment.applied_deployment_id() == target.deployment_id
    })
}

/// The number of targets whose deployment is unavailable.
pub fn unavailable<T: Borrow<Target>>(targets: &[T]) -> i32 {
    let count = targets
        .iter()
        .filter(|target| is_unavailable(as_target(*target).deployment.as_ref()))
        .count();
    saturating_count(count)
}

/// Recounts `status.unavailable` and returns whether it exceeds `status.max_unavailable`.
///
/// Within a partition a target counts as unavailable if it is not up to date, even if its
/// deployment is available.
pub fn is_partition_unavailable<T: Borrow<Target>>(
    status: &mut PartitionStatus,
    targets: &[T],
) -> bool {
    let count = targets
        .iter()
        .map(as_target)
        .filter(|target| !up_to_date(target) || is_unavailable(target.deployment.as_ref()))
        .count();

    status.unavailable = saturating_count(count);
    status.unavailable > status.max_unavailable
}

/// Computes the rollout figures and the summary of all targets of a bundle.
pub fn bundle_status(targets: &[Target]) -> Result<BundleStatus> {
    let mut partitions = partitions(targets).context(PartitionSnafu)?;

    let mut unavailable_partitions = 0;
    for partition in &mut partitions {
        if is_partition_unavailable(&mut partition.status, &partition.targets) {
            unavailable_partitions += 1;
        }
    }

    Ok(BundleStatus {
        summary: summary::summary(targets),
        unavailable: unavailable(targets),
        unavailable_partitions,
        max_unavailable: max_unavailable(targets).context(MaxUnavailableSnafu)?,
        max_unavailable_partitions: max_unavailable_partitions(&partitions, targets)
            .context(MaxUnavailablePartitionsSnafu)?,
        partitions: partitions
            .into_iter()
            .map(|partition| partition.status)
            .collect(),
        ..BundleStatus::default()
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use kube::api::ObjectMeta;
    use rstest::rstest;

    use super::*;
    use crate::crd::{
        Bundle, BundleDeploymentSpec, BundleDeploymentStatus, BundleSpec, Cluster, ClusterStatus,
    };

    fn int(value: i32) -> IntOrString {
        IntOrString::Int(value)
    }

    fn string(value: &str) -> IntOrString {
        IntOrString::String(value.to_string())
    }

    /// Builds targets for clusters `cluster-00`, `cluster-01`, ... with the given rollout strategy.
    pub(crate) fn targets(count: usize, rollout_strategy: Option<RolloutStrategy>) -> Vec<Target> {
        let bundle = Arc::new(Bundle {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("fleet-default".to_string()),
                ..ObjectMeta::default()
            },
            spec: BundleSpec {
                rollout_strategy,
                ..BundleSpec::default()
            },
            status: None,
        });

        (0..count)
            .map(|index| Target {
                deployment: None,
                cluster_groups: Vec::new(),
                cluster: Arc::new(Cluster {
                    metadata: ObjectMeta {
                        name: Some(format!("cluster-{index:02}")),
                        namespace: Some("fleet-default".to_string()),
                        ..ObjectMeta::default()
                    },
                    status: Some(ClusterStatus {
                        namespace: Some(format!("cluster-{index:02}-ns")),
                    }),
                    ..Cluster::default()
                }),
                bundle: Arc::clone(&bundle),
                target: Default::default(),
                options: Default::default(),
                deployment_id: "current".to_string(),
            })
            .collect()
    }

    pub(crate) fn deployment(
        staged: &str,
        requested: &str,
        applied: &str,
        ready: bool,
    ) -> BundleDeployment {
        BundleDeployment {
            spec: BundleDeploymentSpec {
                staged_deployment_id: staged.to_string(),
                deployment_id: requested.to_string(),
                ..BundleDeploymentSpec::default()
            },
            status: Some(BundleDeploymentStatus {
                applied_deployment_id: applied.to_string(),
                ready,
                non_modified: true,
                ..BundleDeploymentStatus::default()
            }),
            ..BundleDeployment::default()
        }
    }

    #[rstest]
    #[case(0, None, 1)]
    #[case(0, Some(string("abc%")), 1)]
    #[case(1, None, 1)]
    #[case(9, None, 1)]
    #[case(10, None, 1)]
    #[case(20, None, 2)]
    #[case(255, None, 25)]
    #[case(10, Some(string("50%")), 5)]
    #[case(3, Some(string("50%")), 1)]
    #[case(3, Some(string("34%")), 1)]
    #[case(10, Some(string("35.5%")), 3)]
    #[case(10, Some(string("0%")), 1)]
    #[case(10, Some(string("-5%")), 1)]
    #[case(100, Some(int(0)), 0)]
    #[case(100, Some(int(-2)), -2)]
    #[case(100, Some(int(7)), 7)]
    #[case(10, Some(string("100%")), 10)]
    fn limit_of_budget(
        #[case] count: usize,
        #[case] budget: Option<IntOrString>,
        #[case] expected: i32,
    ) {
        assert_eq!(limit(count, &[budget.as_ref()]), Ok(expected));
    }

    #[test]
    fn limit_uses_first_budget_set() {
        let first = string("50%");
        let second = int(3);

        assert_eq!(limit(10, &[None, Some(&first), Some(&second)]), Ok(5));
        assert_eq!(limit(10, &[None, None, Some(&second)]), Ok(3));
        assert_eq!(limit(10, &[]), Ok(1));
    }

    #[rstest]
    #[case("abc%")]
    #[case("%")]
    fn limit_rejects_unparsable_percentage(#[case] budget: &str) {
        let budget = string(budget);
        assert!(matches!(
            limit(10, &[Some(&budget)]),
            Err(LimitError::ParsePercentage { .. })
        ));
    }

    #[rstest]
    #[case("10")]
    #[case("ten")]
    fn limit_rejects_budget_without_percent_sign(#[case] budget: &str) {
        let budget = string(budget);
        assert_eq!(
            limit(10, &[Some(&budget)]),
            Err(LimitError::MissingPercentSuffix {
                value: budget_value(&budget)
            })
        );
    }

    fn budget_value(budget: &IntOrString) -> String {
        match budget {
            IntOrString::String(value) => value.clone(),
            IntOrString::Int(value) => value.to_string(),
        }
    }

    #[test]
    fn max_unavailable_uses_rollout_strategy() {
        let strategy = RolloutStrategy {
            max_unavailable: Some(string("20%")),
            ..RolloutStrategy::default()
        };

        assert_eq!(max_unavailable(&targets(10, Some(strategy))), Ok(2));
        assert_eq!(max_unavailable(&targets(30, None)), Ok(3));
        assert_eq!(max_unavailable::<Target>(&[]), Ok(1));
    }

    #[test]
    fn max_unavailable_partitions_defaults_to_zero() {
        let targets = targets(10, None);
        let partitions = partitions(&targets).unwrap();

        assert_eq!(max_unavailable_partitions(&partitions, &targets), Ok(0));
        assert_eq!(max_unavailable_partitions::<Target>(&[], &[]), Ok(1));
    }

    #[rstest]
    #[case(None, false)]
    #[case(Some(deployment("a", "a", "a", true)), false)]
    #[case(Some(deployment("a", "a", "a", false)), true)]
    #[case(Some(deployment("a", "b", "a", true)), true)]
    #[case(Some(deployment("b", "a", "a", true)), false)]
    fn unavailability(#[case] deployment: Option<BundleDeployment>, #[case] expected: bool) {
        assert_eq!(is_unavailable(deployment.as_ref()), expected);
    }

    #[test]
    fn deployment_without_status_is_unavailable() {
        let deployment = BundleDeployment::default();
        assert!(is_unavailable(Some(&deployment)));
    }

    #[rstest]
    #[case(None, false)]
    #[case(Some(deployment("current", "current", "current", false)), true)]
    #[case(Some(deployment("old", "current", "current", true)), false)]
    #[case(Some(deployment("current", "old", "current", true)), false)]
    #[case(Some(deployment("current", "current", "old", true)), false)]
    fn up_to_dateness(#[case] deployment: Option<BundleDeployment>, #[case] expected: bool) {
        let mut target = targets(1, None).remove(0);
        target.deployment = deployment;

        assert_eq!(up_to_date(&target), expected);
    }

    #[test]
    fn stale_targets_count_against_partition_but_not_globally() {
        let mut targets = targets(4, None);
        targets[0].deployment = Some(deployment("current", "current", "current", true));
        targets[1].deployment = Some(deployment("old", "old", "old", true));
        targets[2].deployment = Some(deployment("current", "current", "old", true));
        targets[3].deployment = None;

        assert_eq!(unavailable(&targets), 1);

        let mut status = PartitionStatus {
            max_unavailable: 2,
            ..PartitionStatus::default()
        };
        assert!(is_partition_unavailable(&mut status, &targets));
        assert_eq!(status.unavailable, 3);

        status.max_unavailable = 3;
        assert!(!is_partition_unavailable(&mut status, &targets));
    }

    #[test]
    fn bundle_status_collects_rollout_figures() {
        let mut targets = targets(3, None);
        targets[0].deployment = Some(deployment("current", "current", "current", true));
        targets[1].deployment = Some(deployment("current", "current", "old", true));

        let status = bundle_status(&targets).unwrap();

        assert_eq!(status.max_unavailable, 1);
        assert_eq!(status.unavailable, 1);
        assert_eq!(status.max_unavailable_partitions, 0);
        assert_eq!(status.unavailable_partitions, 1);
        assert_eq!(status.partitions.len(), 1);
        assert_eq!(status.partitions[0].unavailable, 2);
        assert_eq!(status.summary.desired_ready, 3);
    }
}
