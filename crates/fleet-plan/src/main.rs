//! Prints which clusters every bundle of a fleet snapshot would be deployed to, together with the
//! rollout figures gating the deployment. Nothing is applied or written back.

use std::{io::Write, path::PathBuf};

use clap::{Args, Parser};
use fleet_target::{
    crd::{Bundle, BundleDeployment, Cluster, ClusterGroup},
    kube::CustomResourceExt,
};
use snafu::{ResultExt, Snafu};

use crate::plan::OutputFormat;

mod logging;
mod plan;
mod snapshot;

const LOG_ENV: &str = "FLEET_PLAN_LOG";
const APP_NAME: &str = "fleet-plan";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    Logging { source: logging::Error },

    #[snafu(display("failed to load fleet snapshot"))]
    LoadSnapshot { source: snapshot::Error },

    #[snafu(display("failed to plan bundles"))]
    Plan { source: plan::Error },

    #[snafu(display("failed to serialize CRDs"))]
    SerializeCrds { source: serde_yaml::Error },

    #[snafu(display("failed to write to stdout"))]
    WriteStdout { source: std::io::Error },
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(version, about)]
enum Command {
    /// Print the CRDs of the fleet objects.
    Crd,

    /// Resolve the targets of the bundles in a snapshot and print the plan.
    Plan(PlanArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
struct PlanArguments {
    /// Path to a YAML file with the Cluster, ClusterGroup, Bundle and BundleDeployment objects
    #[arg(long, short = 's', value_name = "FILE", env = "FLEET_PLAN_SNAPSHOT")]
    snapshot: PathBuf,

    /// Only plan the bundle with this name
    #[arg(long, short = 'b', env = "FLEET_PLAN_BUNDLE")]
    bundle: Option<String>,

    #[arg(long, short = 'o', default_value_t, value_enum, env = "FLEET_PLAN_OUTPUT")]
    output: OutputFormat,
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let command = Command::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME).context(LoggingSnafu)?;

    match command {
        Command::Crd => print_crds(),
        Command::Plan(arguments) => run_plan(&arguments),
    }
}

fn run_plan(arguments: &PlanArguments) -> Result<(), Error> {
    tracing::info!(snapshot = %arguments.snapshot.display(), "Loading fleet snapshot");
    let snapshot =
        snapshot::FleetSnapshot::from_path(&arguments.snapshot).context(LoadSnapshotSnafu)?;

    let plans = plan::plan(&snapshot, arguments.bundle.as_deref()).context(PlanSnafu)?;
    plan::write_plans(&plans, arguments.output, std::io::stdout().lock()).context(PlanSnafu)
}

fn print_crds() -> Result<(), Error> {
    let mut stdout = std::io::stdout().lock();
    for crd in [
        Cluster::crd(),
        ClusterGroup::crd(),
        Bundle::crd(),
        BundleDeployment::crd(),
    ] {
        writeln!(stdout, "---").context(WriteStdoutSnafu)?;
        serde_yaml::to_writer(&mut stdout, &crd).context(SerializeCrdsSnafu)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Command::command().debug_assert();
    }

    #[test]
    fn plan_arguments_are_parsed() {
        let command =
            Command::parse_from(["fleet-plan", "plan", "-s", "fleet.yaml", "--output", "json"]);

        assert_eq!(
            command,
            Command::Plan(PlanArguments {
                snapshot: PathBuf::from("fleet.yaml"),
                bundle: None,
                output: OutputFormat::Json,
            })
        );
    }
}
