//! The manifest content selected for a target, and the content-addressed store it is persisted to.

use std::{collections::BTreeMap, sync::Mutex};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::{crd::BundleResource, hash};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Prefix of every manifest identity.
const MANIFEST_ID_PREFIX: &str = "s-";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize manifest for hashing"))]
    SerializeManifest { source: serde_json::Error },
}

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("failed to compute identity of manifest"))]
    ManifestId { source: Error },

    #[snafu(display("content store lock was poisoned"))]
    LockPoisoned,
}

/// The resolved set of resources which should be deployed to one cluster.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub resources: Vec<BundleResource>,
}

impl Manifest {
    pub fn new(resources: Vec<BundleResource>) -> Self {
        Self { resources }
    }

    /// Returns the content-addressed identity of the manifest, `s-` followed by the hex encoded
    /// SHA-256 of its resources.
    pub fn id(&self) -> Result<String> {
        let digest = hash::canonical_sha256(&self.resources).context(SerializeManifestSnafu)?;
        Ok(format!("{MANIFEST_ID_PREFIX}{digest}"))
    }
}

/// A content-addressed store for manifests.
///
/// Storing identical content twice must be a no-op and return the same reference.
pub trait ContentStore {
    fn store(&self, manifest: &Manifest) -> Result<String, StoreError>;
}

/// A [`ContentStore`] keeping manifests in memory, keyed by [`Manifest::id`].
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    manifests: Mutex<BTreeMap<String, Manifest>>,
}

impl InMemoryContentStore {
    pub fn get(&self, id: &str) -> Result<Option<Manifest>, StoreError> {
        let manifests = self.manifests.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(manifests.get(id).cloned())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let manifests = self.manifests.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(manifests.len())
    }
}

impl ContentStore for InMemoryContentStore {
    fn store(&self, manifest: &Manifest) -> Result<String, StoreError> {
        let id = manifest.id().context(ManifestIdSnafu)?;
        let mut manifests = self.manifests.lock().map_err(|_| StoreError::LockPoisoned)?;
        manifests
            .entry(id.clone())
            .or_insert_with(|| manifest.clone());

        Ok(id)
    }
}
