//! Layering of deployment options.
//!
//! More specific options (a target definition) are merged onto less specific ones (the bundle
//! defaults) field by field: every field the specific layer sets is kept, everything else is
//! taken from the defaults. Leaf values are replaced as a whole, see [`Atomic`].

use serde_json::Value;

use crate::crd::{BundleDeploymentOptions, GenericMap, HelmOptions, KustomizeOptions};

/// A type which can be layered on top of a set of defaults.
pub trait Merge {
    /// Merges `defaults` into `self`. Values already set on `self` take precedence.
    fn merge(&mut self, defaults: &Self);
}

/// Marker for leaf types which cannot be merged any further. An [`Option`] of an atomic type is
/// only taken from the defaults if it is unset.
pub trait Atomic: Clone {}

impl Atomic for String {}
impl Atomic for bool {}
impl Atomic for i64 {}

impl<T: Atomic> Merge for Option<T> {
    fn merge(&mut self, defaults: &Self) {
        if self.is_none() {
            self.clone_from(defaults);
        }
    }
}

impl Merge for GenericMap {
    fn merge(&mut self, defaults: &Self) {
        merge_objects(&mut self.0, &defaults.0);
    }
}

/// Deep merge of JSON objects: nested objects are merged key by key, any other value already
/// present in `target` wins.
fn merge_objects(
    target: &mut serde_json::Map<String, Value>,
    defaults: &serde_json::Map<String, Value>,
) {
    for (key, default) in defaults {
        match (target.get_mut(key), default) {
            (None, _) => {
                target.insert(key.clone(), default.clone());
            }
            (Some(Value::Object(target)), Value::Object(default)) => merge_objects(target, default),
            (Some(_), _) => {}
        }
    }
}

impl Merge for KustomizeOptions {
    fn merge(&mut self, defaults: &Self) {
        self.dir.merge(&defaults.dir);
    }
}

impl Merge for HelmOptions {
    fn merge(&mut self, defaults: &Self) {
        self.chart.merge(&defaults.chart);
        self.repo.merge(&defaults.repo);
        self.release_name.merge(&defaults.release_name);
        self.version.merge(&defaults.version);
        self.timeout_seconds.merge(&defaults.timeout_seconds);
        self.force.merge(&defaults.force);
        self.values.merge(&defaults.values);
    }
}

impl Merge for BundleDeploymentOptions {
    fn merge(&mut self, defaults: &Self) {
        self.default_namespace.merge(&defaults.default_namespace);
        self.target_namespace.merge(&defaults.target_namespace);
        self.service_account.merge(&defaults.service_account);
        self.kustomize.merge(&defaults.kustomize);
        self.helm.merge(&defaults.helm);
    }
}
