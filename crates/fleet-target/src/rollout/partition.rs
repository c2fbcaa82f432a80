use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use snafu::{ResultExt, Snafu};

use crate::{
    crd::{PartitionStatus, RolloutStrategy},
    matcher::{self, ClusterCriteria},
    rollout::{DEFAULT_AUTO_PARTITION_SIZE, LimitError, limit, rollout_strategy, saturating_count},
    summary,
    target::{Target, cluster_groups_to_label_map},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Below this number of targets, automatic partitioning puts all targets into one partition.
pub const AUTO_PARTITION_THRESHOLD: usize = 200;

/// Name of the single partition used for small rollouts.
pub const ALL_PARTITION_NAME: &str = "All";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to compute autoPartitionSize"))]
    AutoPartitionSize { source: LimitError },

    #[snafu(display("failed to compute maxUnavailable of partition {partition:?}"))]
    PartitionMaxUnavailable {
        source: LimitError,
        partition: String,
    },

    #[snafu(display("invalid cluster criteria in partition"))]
    InvalidPartition { source: matcher::Error },
}

/// A subset of the targets of a bundle which is rolled out as one step.
#[derive(Debug)]
pub struct Partition<'a> {
    /// Observed state of the partition. `unavailable` is only filled in by
    /// [`is_partition_unavailable`](super::is_partition_unavailable).
    pub status: PartitionStatus,
    pub targets: Vec<&'a Target>,
}

impl<'a> Partition<'a> {
    fn new(
        name: String,
        targets: Vec<&'a Target>,
        max_unavailable: Option<&IntOrString>,
        rollout: Option<&RolloutStrategy>,
    ) -> Result<Self> {
        let rollout_max_unavailable = rollout.and_then(|rollout| rollout.max_unavailable.as_ref());
        let max_unavailable = limit(targets.len(), &[max_unavailable, rollout_max_unavailable])
            .context(PartitionMaxUnavailableSnafu { partition: &name })?;

        Ok(Self {
            status: PartitionStatus {
                name,
                count: saturating_count(targets.len()),
                max_unavailable,
                unavailable: 0,
                summary: summary::summary(&targets),
            },
            targets,
        })
    }
}

/// The maximum number of targets in an automatically created partition.
pub fn auto_partition_size(targets: &[Target]) -> Result<i32, LimitError> {
    let default = IntOrString::String(DEFAULT_AUTO_PARTITION_SIZE.to_string());
    let budget = rollout_strategy(targets).and_then(|rollout| rollout.auto_partition_size.as_ref());
    limit(targets.len(), &[budget, Some(&default)])
}

/// Splits the targets of a bundle into partitions.
///
/// If the rollout strategy declares partitions, each target joins the first declared partition
/// matching its cluster, and targets matching none are left out. Otherwise the targets are
/// chunked in order, see [`auto_partition_size`].
pub fn partitions(targets: &[Target]) -> Result<Vec<Partition<'_>>> {
    let rollout = rollout_strategy(targets);
    match rollout {
        Some(rollout) if !rollout.partitions.is_empty() => manual_partitions(rollout, targets),
        _ => auto_partitions(rollout, targets),
    }
}

fn auto_partitions<'a>(
    rollout: Option<&RolloutStrategy>,
    targets: &'a [Target],
) -> Result<Vec<Partition<'a>>> {
    if targets.len() < AUTO_PARTITION_THRESHOLD {
        return Ok(vec![Partition::new(
            ALL_PARTITION_NAME.to_string(),
            targets.iter().collect(),
            None,
            rollout,
        )?]);
    }

    let size = auto_partition_size(targets).context(AutoPartitionSizeSnafu)?;
    // Non-positive sizes would never make progress
    let size = usize::try_from(size).unwrap_or_default().max(1);

    let mut offset = 0;
    targets
        .chunks(size)
        .map(|chunk| {
            let name = format!("Partition {offset} - {}", offset + chunk.len());
            offset += chunk.len();
            Partition::new(name, chunk.iter().collect(), None, rollout)
        })
        .collect()
}

fn manual_partitions<'a>(
    rollout: &RolloutStrategy,
    targets: &'a [Target],
) -> Result<Vec<Partition<'a>>> {
    let criteria = rollout
        .partitions
        .iter()
        .map(|partition| {
            let criteria = ClusterCriteria::from(partition);
            criteria.validate().map(|()| criteria)
        })
        .collect::<Result<Vec<_>, _>>()
        .context(InvalidPartitionSnafu)?;

    let mut members: Vec<Vec<&Target>> = vec![Vec::new(); rollout.partitions.len()];
    for target in targets {
        let cluster_groups = cluster_groups_to_label_map(&target.cluster_groups);
        let cluster_name = target.cluster.name_any();

        for (index, criteria) in criteria.iter().enumerate() {
            if criteria
                .matches(&cluster_name, &cluster_groups, target.cluster.labels())
                .context(InvalidPartitionSnafu)?
            {
                members[index].push(target);
                break;
            }
        }
    }

    rollout
        .partitions
        .iter()
        .zip(members)
        .map(|(partition, targets)| {
            Partition::new(
                partition.name.clone(),
                targets,
                partition.max_unavailable.as_ref(),
                Some(rollout),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indoc::indoc;

    use super::*;
    use crate::rollout::tests::targets;

    fn strategy(yaml: &str) -> RolloutStrategy {
        serde_yaml::from_str(yaml).expect("test YAML is valid")
    }

    fn names(partitions: &[Partition<'_>]) -> Vec<String> {
        partitions
            .iter()
            .map(|partition| partition.status.name.clone())
            .collect()
    }

    #[test]
    fn small_rollouts_use_a_single_partition() {
        let targets = targets(199, None);
        let partitions = partitions(&targets).unwrap();

        assert_eq!(names(&partitions), ["All"]);
        assert_eq!(partitions[0].status.count, 199);
        assert_eq!(partitions[0].status.max_unavailable, 19);
        assert_eq!(partitions[0].status.summary.pending, 199);
    }

    #[test]
    fn large_rollouts_are_chunked() {
        let targets = targets(250, None);
        assert_eq!(auto_partition_size(&targets), Ok(62));

        let partitions = partitions(&targets).unwrap();

        assert_eq!(
            names(&partitions),
            [
                "Partition 0 - 62",
                "Partition 62 - 124",
                "Partition 124 - 186",
                "Partition 186 - 248",
                "Partition 248 - 250",
            ]
        );
        assert_eq!(partitions[4].status.count, 2);
        assert_eq!(partitions[4].status.max_unavailable, 1);
        assert_eq!(partitions[0].status.max_unavailable, 6);
    }

    #[test]
    fn auto_partition_size_is_configurable() {
        let targets = targets(
            200,
            Some(strategy(indoc! {"
                autoPartitionSize: 100
            "})),
        );

        assert_eq!(
            names(&partitions(&targets).unwrap()),
            ["Partition 0 - 100", "Partition 100 - 200"]
        );
    }

    #[test]
    fn targets_join_first_matching_declared_partition() {
        let mut targets = targets(
            4,
            Some(strategy(indoc! {"
                maxUnavailable: 0
                partitions:
                - name: canary
                  maxUnavailable: 1
                  clusterName: cluster-01
                - name: prod
                  clusterSelector:
                    matchLabels:
                      env: prod
            "})),
        );
        for index in [1, 2] {
            let mut cluster = targets[index].cluster.as_ref().clone();
            cluster.metadata.labels = Some([("env".to_string(), "prod".to_string())].into());
            targets[index].cluster = Arc::new(cluster);
        }

        let partitions = partitions(&targets).unwrap();

        assert_eq!(names(&partitions), ["canary", "prod"]);
        assert_eq!(partitions[0].status.count, 1);
        assert_eq!(partitions[0].status.max_unavailable, 1);
        assert_eq!(partitions[1].status.count, 1);
        assert_eq!(partitions[1].status.max_unavailable, 0);
        assert_eq!(
            partitions[1].targets[0].cluster.metadata.name.as_deref(),
            Some("cluster-02")
        );
    }

    #[test]
    fn invalid_partition_selector_fails() {
        let targets = targets(
            1,
            Some(strategy(indoc! {"
                partitions:
                - name: broken
                  clusterSelector:
                    matchExpressions:
                    - key: env
                      operator: Near
            "})),
        );

        assert!(matches!(
            partitions(&targets),
            Err(Error::InvalidPartition { .. })
        ));
    }
}
