//! Effective deployment options per target and the deployment identity derived from them.

use snafu::{ResultExt, Snafu};

use crate::{
    crd::{BundleDeploymentOptions, BundleSpec, BundleTarget},
    hash,
    manifest::{self, Manifest},
};

pub mod merge;

use merge::Merge;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to compute manifest identity"))]
    ManifestId { source: manifest::Error },

    #[snafu(display("failed to serialize deployment options for hashing"))]
    SerializeOptions { source: serde_json::Error },
}

/// Computes the options a target is deployed with: the overrides of the target definition
/// layered on top of the bundle-wide defaults.
pub fn calculate(spec: &BundleSpec, target: &BundleTarget) -> BundleDeploymentOptions {
    let mut options = target.options.clone();
    options.merge(&spec.options);
    options
}

/// Computes the deployment identity `<manifest id>:<options digest>`.
///
/// Identical manifests and options always produce the same identity, independent of the order
/// in which maps were populated.
pub fn deployment_id(manifest: &Manifest, options: &BundleDeploymentOptions) -> Result<String> {
    let manifest_id = manifest.id().context(ManifestIdSnafu)?;
    let options_digest = hash::canonical_sha256(options).context(SerializeOptionsSnafu)?;

    Ok(format!("{manifest_id}:{options_digest}"))
}
