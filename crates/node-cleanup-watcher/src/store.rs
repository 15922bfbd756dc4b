//! Cluster-facing access to Node objects
//!
//! The watcher only talks to the cluster through [`NodeStore`], which keeps
//! the state machine testable without an API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::reflector::Store;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use node_cleanup_common::{Error, CONTROLLER_NAME};

use crate::finalizer::finalizer_patch;

/// Read and patch access to Node objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch the current state of a Node from the API server
    ///
    /// Returns [`Error::NodeNotFound`] when the Node is gone.
    async fn get(&self, name: &str) -> Result<Node, Error>;

    /// List all Nodes known to the local cache
    async fn list(&self) -> Result<Vec<Node>, Error>;

    /// Replace the finalizer list of a Node with a merge patch
    ///
    /// # Arguments
    ///
    /// * `name` - Node to patch
    /// * `finalizers` - Complete new finalizer list
    /// * `resource_version` - When set, the patch only applies to that version
    ///   and fails with a conflict otherwise
    async fn patch_finalizers(
        &self,
        name: &str,
        finalizers: &[String],
        resource_version: Option<String>,
    ) -> Result<(), Error>;
}

/// [`NodeStore`] backed by the Kubernetes API and a reflector cache
///
/// `get` always goes to the API server so that finalizer decisions see the
/// latest resourceVersion. `list` is served from the cache.
#[derive(Clone)]
pub struct KubeNodeStore {
    api: Api<Node>,
    cache: Store<Node>,
}

impl KubeNodeStore {
    /// Create a store over the given client and reflector cache
    pub fn with_cache(client: Client, cache: Store<Node>) -> Self {
        Self {
            api: Api::all(client),
            cache,
        }
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn get(&self, name: &str) -> Result<Node, Error> {
        self.api
            .get(name)
            .await
            .map_err(|e| Error::from_kube_for_node(name, e))
    }

    async fn list(&self) -> Result<Vec<Node>, Error> {
        Ok(self
            .cache
            .state()
            .iter()
            .map(|n| n.as_ref().clone())
            .collect())
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        finalizers: &[String],
        resource_version: Option<String>,
    ) -> Result<(), Error> {
        let patch = finalizer_patch(finalizers, resource_version.as_deref());
        debug!(node = %name, ?finalizers, ?resource_version, "Patching node finalizers");
        self.api
            .patch(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube_for_node(name, e))?;
        Ok(())
    }
}
