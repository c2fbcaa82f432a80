//! Loads a point-in-time copy of the fleet from a YAML stream.
//!
//! The stream may contain any number of documents. Each document is either a single object or a
//! `List` with `items`, e.g. the output of `kubectl get clusters,clustergroups,bundles -o yaml`.

use std::{fs, path::Path, sync::Arc};

use fleet_target::{
    cache::Snapshot,
    crd::{Bundle, BundleDeployment, Cluster, ClusterGroup},
    manifest::ContentStore,
    target::Manager,
};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read snapshot file {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to parse YAML document"))]
    ParseDocument { source: serde_yaml::Error },

    #[snafu(display("object is missing a kind"))]
    MissingKind,

    #[snafu(display("failed to parse {kind} object"))]
    ParseObject {
        source: serde_yaml::Error,
        kind: String,
    },
}

#[derive(Debug, Default)]
pub struct FleetSnapshot {
    pub clusters: Vec<Cluster>,
    pub cluster_groups: Vec<ClusterGroup>,
    pub bundles: Vec<Bundle>,
    pub bundle_deployments: Vec<BundleDeployment>,
}

impl FleetSnapshot {
    pub fn from_path(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::from_yaml(&yaml)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut snapshot = Self::default();
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document).context(ParseDocumentSnafu)?;
            snapshot.add(value)?;
        }

        for bundle in &mut snapshot.bundles {
            bundle.spec.default_target_names();
        }

        Ok(snapshot)
    }

    fn add(&mut self, value: serde_yaml::Value) -> Result<()> {
        // Empty documents, e.g. a trailing `---`
        if value.is_null() {
            return Ok(());
        }

        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .context(MissingKindSnafu)?
            .to_string();

        match kind.as_str() {
            "List" => {
                if let Some(serde_yaml::Value::Sequence(items)) = value.get("items") {
                    for item in items.clone() {
                        self.add(item)?;
                    }
                }
            }
            "Cluster" => self.clusters.push(parse(value, &kind)?),
            "ClusterGroup" => self.cluster_groups.push(parse(value, &kind)?),
            "Bundle" => self.bundles.push(parse(value, &kind)?),
            "BundleDeployment" => self.bundle_deployments.push(parse(value, &kind)?),
            _ => tracing::warn!(kind, "Ignoring object of unsupported kind"),
        }

        Ok(())
    }

    /// Builds a [`Manager`] reading from this snapshot.
    pub fn manager(&self, content_store: Arc<dyn ContentStore + Send + Sync>) -> Manager {
        Manager::new(
            Arc::new(Snapshot::new(self.clusters.iter().cloned())),
            Arc::new(Snapshot::new(self.cluster_groups.iter().cloned())),
            Arc::new(Snapshot::new(self.bundles.iter().cloned())),
            Arc::new(Snapshot::new(self.bundle_deployments.iter().cloned())),
            content_store,
        )
    }
}

fn parse<K: serde::de::DeserializeOwned>(value: serde_yaml::Value, kind: &str) -> Result<K> {
    serde_yaml::from_value(value).context(ParseObjectSnafu { kind })
}
