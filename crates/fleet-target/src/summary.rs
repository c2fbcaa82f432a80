//! Folds the per-cluster state of a bundle into one [`BundleSummary`].

use std::borrow::Borrow;

use crate::{
    crd::{BundleDeployment, BundleState, BundleSummary, CONDITION_STATUS_FALSE, NonReadyResource},
    target::{Target, as_target},
};

/// The maximum number of entries in [`BundleSummary::non_ready_resources`].
pub const MAX_NON_READY_RESOURCES: usize = 10;

/// Condition reported by the agent once it applied (or failed to apply) a deployment.
pub const DEPLOYED_CONDITION: &str = "Deployed";

/// Condition reported by the agent while it monitors the applied resources.
pub const MONITORED_CONDITION: &str = "Monitored";

/// Derives the state of a bundle on a cluster from the recorded bundle deployment.
///
/// The checks are ordered, the first one failing determines the state.
pub fn deployment_state(deployment: Option<&BundleDeployment>) -> BundleState {
    let Some(deployment) = deployment else {
        return BundleState::Pending;
    };

    if deployment.applied_deployment_id() != deployment.spec.deployment_id {
        let deploy_failed = deployment
            .condition(DEPLOYED_CONDITION)
            .is_some_and(|condition| condition.status == CONDITION_STATUS_FALSE);
        return if deploy_failed {
            BundleState::ErrApplied
        } else {
            BundleState::WaitApplied
        };
    }

    if !deployment.is_ready() {
        BundleState::NotReady
    } else if deployment.spec.deployment_id != deployment.spec.staged_deployment_id {
        BundleState::OutOfSync
    } else if !deployment.is_non_modified() {
        BundleState::Modified
    } else {
        BundleState::Ready
    }
}

/// Returns the message of the `Deployed` condition, falling back to the `Monitored` condition.
pub fn message_from_deployment(deployment: Option<&BundleDeployment>) -> String {
    let Some(deployment) = deployment else {
        return String::new();
    };

    [DEPLOYED_CONDITION, MONITORED_CONDITION]
        .into_iter()
        .filter_map(|type_| deployment.condition(type_)?.message.as_deref())
        .find(|message| !message.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Counts `state` in `summary` and records non-ready states, up to [`MAX_NON_READY_RESOURCES`].
pub fn increment_state(
    summary: &mut BundleSummary,
    name: &str,
    state: BundleState,
    message: String,
) {
    let counter = match state {
        BundleState::Ready => &mut summary.ready,
        BundleState::NotReady => &mut summary.not_ready,
        BundleState::WaitApplied => &mut summary.wait_applied,
        BundleState::ErrApplied => &mut summary.err_applied,
        BundleState::OutOfSync => &mut summary.out_of_sync,
        BundleState::Modified => &mut summary.modified,
        BundleState::Pending => &mut summary.pending,
    };
    *counter += 1;

    if state != BundleState::Ready && summary.non_ready_resources.len() < MAX_NON_READY_RESOURCES {
        summary.non_ready_resources.push(NonReadyResource {
            name: name.to_string(),
            state,
            message,
        });
    }
}

/// Summarizes the state of all targets, in the order they are given.
pub fn summary<T: Borrow<Target>>(targets: &[T]) -> BundleSummary {
    let mut summary = BundleSummary::default();
    for target in targets.iter().map(as_target) {
        increment_state(
            &mut summary,
            &target.cluster_key(),
            target.state(),
            target.message(),
        );
        summary.desired_ready += 1;
    }
    summary
}
