//! Target resolution and rollout gating for multi-cluster bundle deployments.
//!
//! Given a [`Bundle`](crd::Bundle) and the clusters and cluster groups registered in its namespace,
//! the [`Manager`](target::Manager) decides which clusters receive the bundle and computes a
//! deterministic deployment identity per cluster. The functions in [`rollout`] and [`summary`]
//! operate on the resulting [`Target`](target::Target)s to decide how far a staged rollout may
//! proceed and to fold the per-cluster state into one bundle status.
//!
//! Nothing in here applies manifests or writes objects back. All reads go through the
//! [`ObjectCache`](cache::ObjectCache) accessors, which are expected to serve immutable snapshots.

pub mod cache;
pub mod crd;
mod hash;
pub mod kvp;
pub mod manifest;
pub mod matcher;
pub mod options;
pub mod rollout;
pub mod selector;
pub mod summary;
pub mod target;

// External re-exports
pub use k8s_openapi;
pub use kube;
