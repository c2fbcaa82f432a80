//! Synchronous read accessors over cached snapshots of fleet objects.
//!
//! The resolver never talks to the API server itself. It reads from an [`ObjectCache`], which
//! is either backed by a live [`Store`] populated by a reflector, or by a fixed [`Snapshot`].

use std::{hash::Hash, sync::Arc};

use kube::{Resource, ResourceExt, runtime::reflector::Store};
use snafu::Snafu;

use crate::kvp::Labels;

/// Reading from a cache failed.
#[derive(Debug, Snafu)]
#[snafu(display("failed to read {kind} objects from cache"))]
pub struct ReadError {
    kind: String,
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl ReadError {
    pub fn new(
        kind: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
        }
    }

    /// The kind of object which could not be read.
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// A read-only view of all known objects of one kind.
pub trait ObjectCache<K> {
    /// Lists all objects in `namespace`, or in all namespaces if it is [`None`], which carry
    /// every label pair in `labels`.
    fn list(&self, namespace: Option<&str>, labels: &Labels) -> Result<Vec<Arc<K>>, ReadError>;
}

fn is_listed<K: Resource>(object: &K, namespace: Option<&str>, labels: &Labels) -> bool {
    if namespace.is_some_and(|namespace| object.meta().namespace.as_deref() != Some(namespace)) {
        return false;
    }

    let object_labels = object.labels();
    labels
        .iter()
        .all(|(key, value)| object_labels.get(key) == Some(value))
}

impl<K> ObjectCache<K> for Store<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn list(&self, namespace: Option<&str>, labels: &Labels) -> Result<Vec<Arc<K>>, ReadError> {
        Ok(self
            .state()
            .into_iter()
            .filter(|object| is_listed(object.as_ref(), namespace, labels))
            .collect())
    }
}

/// An immutable, in-memory set of objects.
#[derive(Debug)]
pub struct Snapshot<K> {
    objects: Vec<Arc<K>>,
}

impl<K> Default for Snapshot<K> {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
        }
    }
}

impl<K> Snapshot<K> {
    pub fn new(objects: impl IntoIterator<Item = K>) -> Self {
        objects.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<K> FromIterator<K> for Snapshot<K> {
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        Self {
            objects: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

impl<K: Resource> ObjectCache<K> for Snapshot<K> {
    fn list(&self, namespace: Option<&str>, labels: &Labels) -> Result<Vec<Arc<K>>, ReadError> {
        Ok(self
            .objects
            .iter()
            .filter(|object| is_listed(object.as_ref(), namespace, labels))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use kube::{
        api::ObjectMeta,
        runtime::{reflector::store::Writer, watcher},
    };

    use super::*;
    use crate::crd::Cluster;

    fn cluster(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Cluster {
        Cluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(key, value)| (key.to_string(), value.to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..Cluster::default()
        }
    }

    fn names(clusters: &[Arc<Cluster>]) -> Vec<String> {
        let mut names: Vec<_> = clusters.iter().map(|cluster| cluster.name_any()).collect();
        names.sort();
        names
    }

    fn fixtures() -> Vec<Cluster> {
        vec![
            cluster("fleet-default", "a", &[("env", "prod")]),
            cluster("fleet-default", "b", &[("env", "dev")]),
            cluster("fleet-local", "c", &[("env", "prod")]),
        ]
    }

    #[test]
    fn snapshot_filters_by_namespace_and_labels() {
        let snapshot: Snapshot<Cluster> = fixtures().into_iter().collect();

        let all = snapshot.list(None, &Labels::new()).unwrap();
        assert_eq!(names(&all), ["a", "b", "c"]);

        let default = snapshot.list(Some("fleet-default"), &Labels::new()).unwrap();
        assert_eq!(names(&default), ["a", "b"]);

        let prod = Labels::from([("env".to_string(), "prod".to_string())]);
        let prod = snapshot.list(None, &prod).unwrap();
        assert_eq!(names(&prod), ["a", "c"]);
    }

    #[test]
    fn store_filters_by_namespace_and_labels() {
        let mut writer = Writer::<Cluster>::default();
        for cluster in fixtures() {
            writer.apply_watcher_event(&watcher::Event::Apply(cluster));
        }
        let store = writer.as_reader();

        let prod = Labels::from([("env".to_string(), "prod".to_string())]);
        let listed = store.list(Some("fleet-default"), &prod).unwrap();
        assert_eq!(names(&listed), ["a"]);
    }
}
