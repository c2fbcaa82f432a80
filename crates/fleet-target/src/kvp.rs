//! Well-known label keys used to link bundle deployments back to their bundle.

use std::collections::BTreeMap;

use const_format::concatcp;

/// The fleet-specific label key prefix.
const FLEET_KEY_PREFIX: &str = "fleet.cattle.io/";

/// The label key `fleet.cattle.io/bundle-name`. It carries the name of the
/// bundle a bundle deployment was created for.
pub const BUNDLE_NAME_KEY: &str = concatcp!(FLEET_KEY_PREFIX, "bundle-name");

/// The label key `fleet.cattle.io/bundle-namespace`. It carries the namespace
/// of the bundle a bundle deployment was created for.
pub const BUNDLE_NAMESPACE_KEY: &str = concatcp!(FLEET_KEY_PREFIX, "bundle-namespace");

/// A plain set of Kubernetes labels, as found in `metadata.labels`.
pub type Labels = BTreeMap<String, String>;
