use std::{io::Write, sync::Arc};

use fleet_target::{
    crd::{BundleState, BundleStatus},
    kube::ResourceExt,
    manifest::InMemoryContentStore,
    rollout,
    target::{self, Target},
};
use serde::Serialize;
use snafu::{ResultExt, Snafu, ensure};

use crate::snapshot::FleetSnapshot;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no bundle named {name:?} in snapshot"))]
    BundleNotFound { name: String },

    #[snafu(display("failed to resolve targets of bundle {bundle:?}"))]
    ResolveTargets {
        source: target::Error,
        bundle: String,
    },

    #[snafu(display("failed to compute rollout status of bundle {bundle:?}"))]
    RolloutStatus {
        source: rollout::Error,
        bundle: String,
    },

    #[snafu(display("failed to serialize plan as YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to serialize plan as JSON"))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("failed to write plan"))]
    WritePlan { source: std::io::Error },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// What would be rolled out for one bundle.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePlan {
    pub namespace: String,
    pub name: String,
    pub targets: Vec<TargetPlan>,
    pub status: BundleStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPlan {
    /// `namespace/name` of the cluster.
    pub cluster: String,
    /// Name of the matched target definition.
    pub target: String,
    pub deployment_id: String,
    pub state: BundleState,
    pub paused: bool,
    pub up_to_date: bool,
    pub unavailable: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl From<&Target> for TargetPlan {
    fn from(target: &Target) -> Self {
        Self {
            cluster: target.cluster_key(),
            target: target.target.name.clone(),
            deployment_id: target.deployment_id.clone(),
            state: target.state(),
            paused: target.is_paused(),
            up_to_date: rollout::up_to_date(target),
            unavailable: rollout::is_unavailable(target.deployment.as_ref()),
            message: target.message(),
        }
    }
}

/// Plans every bundle in the snapshot, or only the bundles named `bundle_name`.
pub fn plan(snapshot: &FleetSnapshot, bundle_name: Option<&str>) -> Result<Vec<BundlePlan>> {
    let manager = snapshot.manager(Arc::new(InMemoryContentStore::default()));

    let mut plans = Vec::new();
    for bundle in &snapshot.bundles {
        let name = bundle.name_any();
        if bundle_name.is_some_and(|bundle_name| bundle_name != name) {
            continue;
        }

        let bundle = Arc::new(bundle.clone());
        let targets = manager
            .targets(&bundle)
            .context(ResolveTargetsSnafu { bundle: &name })?;
        let status =
            rollout::bundle_status(&targets).context(RolloutStatusSnafu { bundle: &name })?;

        tracing::info!(
            bundle.namespace = bundle.namespace(),
            bundle.name = name,
            targets = targets.len(),
            unavailable = status.unavailable,
            max_unavailable = status.max_unavailable,
            "Planned bundle"
        );

        plans.push(BundlePlan {
            namespace: bundle.namespace().unwrap_or_default(),
            name,
            targets: targets.iter().map(TargetPlan::from).collect(),
            status,
        });
    }

    if let Some(name) = bundle_name {
        ensure!(!plans.is_empty(), BundleNotFoundSnafu { name });
    }

    Ok(plans)
}

pub fn write_plans(plans: &[BundlePlan], format: OutputFormat, mut writer: impl Write) -> Result<()> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_writer(&mut writer, plans).context(SerializeYamlSnafu)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, plans).context(SerializeJsonSnafu)?;
            writeln!(writer).context(WritePlanSnafu)?;
        }
    }

    writer.flush().context(WritePlanSnafu)
}
